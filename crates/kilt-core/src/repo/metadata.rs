//! Metadata commit format.
//!
//! A patchset is declared on the branch by a commit whose subject is
//! `kilt metadata: patchset <name>` and whose body carries three
//! RFC-822-style fields:
//!
//! ```text
//! kilt metadata: patchset feature-x
//!
//! Patchset-Name: feature-x
//! Patchset-UUID: 3f2a6c0e-...
//! Patchset-Version: 1
//! ```
//!
//! Metadata commits have exactly one parent and leave the tree unchanged.
//! Ordinary commits may carry a `Patchset-Name: <name>` footer to associate
//! themselves with a patchset; the literal `unknown` means "belongs to the
//! patchset currently being collected".

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::patchset::{Patchset, Version};

/// Subject prefix identifying metadata commits.
pub const METADATA_PREFIX: &str = "kilt metadata: patchset ";

/// Name of the patchset footer on ordinary commits.
pub const NAME_FIELD: &str = "Patchset-Name";
pub const UUID_FIELD: &str = "Patchset-UUID";
pub const VERSION_FIELD: &str = "Patchset-Version";

/// Footer value that attributes a patch to the current patchset.
pub const UNKNOWN_PATCHSET: &str = "unknown";

static FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9-]+):[ \t]?(.*)$").expect("field regex compiles")
});

/// Whether `message` is a metadata commit message.
#[must_use]
pub fn is_metadata_message(message: &str) -> bool {
    message.starts_with(METADATA_PREFIX)
}

/// Render the full metadata commit message for a patchset.
#[must_use]
pub fn metadata_message(ps: &Patchset) -> String {
    format!(
        "{prefix}{name}\n\n{name_field}: {name}\n{uuid_field}: {uuid}\n{version_field}: {version}\n",
        prefix = METADATA_PREFIX,
        name = ps.name(),
        name_field = NAME_FIELD,
        uuid = ps.uuid(),
        uuid_field = UUID_FIELD,
        version = ps.version(),
        version_field = VERSION_FIELD,
    )
}

/// Extract `Key: value` fields from every line after the subject.
///
/// Later occurrences of a key win, matching how footers are usually read.
#[must_use]
pub fn parse_fields(message: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    for line in message.lines().skip(1) {
        if let Some(captures) = FIELD_RE.captures(line) {
            fields.insert(captures[1].to_string(), captures[2].to_string());
        }
    }
    fields
}

/// Reconstruct a patchset from a metadata commit message.
pub fn patchset_from_metadata(message: &str) -> Result<Patchset> {
    let fields = parse_fields(message);
    let name = fields
        .get(NAME_FIELD)
        .ok_or_else(|| Error::MetadataParse(format!("no {NAME_FIELD} field found")))?;
    if name.is_empty() {
        return Err(Error::MetadataParse(format!("empty {NAME_FIELD} field")));
    }
    let uuid_text = fields
        .get(UUID_FIELD)
        .ok_or_else(|| Error::MetadataParse(format!("no {UUID_FIELD} field found")))?;
    let uuid = Uuid::parse_str(uuid_text)
        .map_err(|err| Error::MetadataParse(format!("unable to parse uuid {uuid_text:?}: {err}")))?;
    let version_text = fields
        .get(VERSION_FIELD)
        .ok_or_else(|| Error::MetadataParse(format!("no {VERSION_FIELD} field found")))?;
    let version = Version::from_str(version_text).map_err(|err| {
        Error::MetadataParse(format!("unable to parse version {version_text:?}: {err}"))
    })?;
    Ok(Patchset::load(name.clone(), uuid, version))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_message_round_trips() {
        let ps = Patchset::new("feature-x");
        let message = metadata_message(&ps);

        assert!(is_metadata_message(&message));
        let parsed = patchset_from_metadata(&message).unwrap();
        assert!(parsed.equal(&ps));
    }

    #[test]
    fn subject_names_the_patchset() {
        let ps = Patchset::new("feature-x");
        let message = metadata_message(&ps);
        assert!(message.starts_with("kilt metadata: patchset feature-x\n\n"));
    }

    #[test]
    fn non_metadata_subjects_are_rejected() {
        assert!(!is_metadata_message("fix: handle empty input"));
        // The prefix only counts at the start of the subject.
        assert!(!is_metadata_message("see kilt metadata: patchset x"));
    }

    #[test]
    fn fields_skip_the_subject_line() {
        // A subject that itself looks like a field must not be picked up.
        let fields = parse_fields("Subject-Like: nope\n\nPatchset-Name: real\n");
        assert_eq!(fields.get("Patchset-Name").map(String::as_str), Some("real"));
        assert!(!fields.contains_key("Subject-Like"));
    }

    #[test]
    fn fields_tolerate_missing_space_after_colon() {
        let fields = parse_fields("subject\n\nPatchset-Name:tight\n");
        assert_eq!(fields.get("Patchset-Name").map(String::as_str), Some("tight"));
    }

    #[test]
    fn field_keys_are_restricted_to_alnum_and_dash() {
        let fields = parse_fields("subject\n\nGood-Key: yes\nbad key: no\n");
        assert_eq!(fields.get("Good-Key").map(String::as_str), Some("yes"));
        assert_eq!(fields.len(), 1);
    }

    #[test]
    fn missing_fields_fail_with_metadata_parse() {
        let message = format!("{METADATA_PREFIX}x\n\nPatchset-Name: x\n");
        let err = patchset_from_metadata(&message).unwrap_err();
        assert!(matches!(err, Error::MetadataParse(reason) if reason.contains(UUID_FIELD)));
    }

    #[test]
    fn malformed_uuid_and_version_fail() {
        let bad_uuid = format!(
            "{METADATA_PREFIX}x\n\nPatchset-Name: x\nPatchset-UUID: nope\nPatchset-Version: 1\n"
        );
        assert!(matches!(
            patchset_from_metadata(&bad_uuid),
            Err(Error::MetadataParse(_))
        ));

        let ps = Patchset::new("x");
        let bad_version = format!(
            "{METADATA_PREFIX}x\n\nPatchset-Name: x\nPatchset-UUID: {}\nPatchset-Version: two\n",
            ps.uuid()
        );
        assert!(matches!(
            patchset_from_metadata(&bad_version),
            Err(Error::MetadataParse(_))
        ));
    }
}
