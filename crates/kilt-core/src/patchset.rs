//! Patchset identity and versioning.
//!
//! A patchset is a named, versioned group of commits sharing a UUID. On the
//! branch it is anchored by a metadata commit; commits between one metadata
//! commit and the next belong to it, and commits elsewhere that carry a
//! `Patchset-Name` footer naming it are its "floating" patches (the ones a
//! rework folds back in).

use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

use uuid::Uuid;

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// A patchset version number. Starts at 1 and increments on every metadata
/// update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version(i64);

impl Version {
    /// The version patchsets start from.
    #[must_use]
    pub const fn initial() -> Self {
        Self(1)
    }

    /// The version before this one.
    #[must_use]
    pub const fn predecessor(self) -> Self {
        Self(self.0 - 1)
    }

    /// The version after this one.
    #[must_use]
    pub const fn successor(self) -> Self {
        Self(self.0 + 1)
    }

    /// Three-way comparison on the integer component.
    #[must_use]
    pub fn cmp_version(self, other: Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = ParseIntError;

    /// Parse a decimal version string.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(Self)
    }
}

// ---------------------------------------------------------------------------
// Patchset
// ---------------------------------------------------------------------------

/// A patchset: stable UUID identity, human name, version, and the commit ids
/// that make it up.
///
/// `metadata_commit` is `None` while the patchset exists only as floating
/// patches (it has been named in footers but never anchored); in that state
/// `patches` is always empty.
#[derive(Debug, Clone)]
pub struct Patchset {
    name: String,
    uuid: Uuid,
    version: Version,
    metadata_commit: Option<String>,
    patches: Vec<String>,
    floating: Vec<String>,
}

impl Patchset {
    /// Create a fresh patchset: new UUID, version 1, no commits.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self::load(name, Uuid::new_v4(), Version::initial())
    }

    /// Reconstruct a patchset with the given identity fields.
    ///
    /// Names are not validated here: metadata parsing rejects empty names,
    /// but the cache walk may build placeholder patchsets for whatever name
    /// a footer carries.
    #[must_use]
    pub fn load(name: impl Into<String>, uuid: Uuid, version: Version) -> Self {
        Self {
            name: name.into(),
            uuid,
            version,
            metadata_commit: None,
            patches: Vec::new(),
            floating: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// The id of the metadata commit anchoring this patchset, if any.
    #[must_use]
    pub fn metadata_commit(&self) -> Option<&str> {
        self.metadata_commit.as_deref()
    }

    /// Patches in branch order (base to tip).
    #[must_use]
    pub fn patches(&self) -> &[String] {
        &self.patches
    }

    /// Floating patches in branch order (base to tip).
    #[must_use]
    pub fn floating_patches(&self) -> &[String] {
        &self.floating
    }

    pub fn add_metadata_commit(&mut self, id: impl Into<String>) {
        self.metadata_commit = Some(id.into());
    }

    pub fn add_patch(&mut self, id: impl Into<String>) {
        self.patches.push(id.into());
    }

    pub fn add_floating_patch(&mut self, id: impl Into<String>) {
        self.floating.push(id.into());
    }

    /// Same patchset, regardless of version or name changes.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }

    /// Same patchset at the same version, ignoring name changes.
    #[must_use]
    pub fn same_version(&self, other: &Self) -> bool {
        self.same_as(other) && self.version == other.version
    }

    /// Same patchset, version, and name.
    #[must_use]
    pub fn equal(&self, other: &Self) -> bool {
        self.name == other.name && self.same_version(other)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_starts_at_one() {
        assert_eq!(Version::initial().to_string(), "1");
    }

    #[test]
    fn version_successor_and_predecessor_are_inverse() {
        let v = Version::initial();
        assert_eq!(v.successor().predecessor(), v);
        assert_eq!(v.successor().to_string(), "2");
        assert_eq!(v.predecessor().to_string(), "0");
    }

    #[test]
    fn version_parses_decimal_strings() {
        let v: Version = "17".parse().expect("decimal version");
        assert_eq!(v.to_string(), "17");
        assert!("".parse::<Version>().is_err());
        assert!("v2".parse::<Version>().is_err());
        assert!("1.5".parse::<Version>().is_err());
    }

    #[test]
    fn version_cmp_orders_by_integer() {
        use std::cmp::Ordering;
        let one = Version::initial();
        let two = one.successor();
        assert_eq!(one.cmp_version(two), Ordering::Less);
        assert_eq!(two.cmp_version(one), Ordering::Greater);
        assert_eq!(one.cmp_version(one), Ordering::Equal);
    }

    #[test]
    fn new_patchset_is_empty_at_version_one() {
        let ps = Patchset::new("feature-x");
        assert_eq!(ps.name(), "feature-x");
        assert_eq!(ps.version(), Version::initial());
        assert!(ps.metadata_commit().is_none());
        assert!(ps.patches().is_empty());
        assert!(ps.floating_patches().is_empty());
    }

    #[test]
    fn fresh_patchsets_get_distinct_uuids() {
        let a = Patchset::new("a");
        let b = Patchset::new("a");
        assert!(!a.same_as(&b));
    }

    #[test]
    fn same_as_ignores_name_and_version() {
        let uuid = Uuid::new_v4();
        let a = Patchset::load("old-name", uuid, Version::initial());
        let b = Patchset::load("new-name", uuid, Version::initial().successor());
        assert!(a.same_as(&b));
        assert!(!a.same_version(&b));
        assert!(!a.equal(&b));
    }

    #[test]
    fn same_version_ignores_name() {
        let uuid = Uuid::new_v4();
        let a = Patchset::load("old", uuid, Version::initial());
        let b = Patchset::load("new", uuid, Version::initial());
        assert!(a.same_version(&b));
        assert!(!a.equal(&b));
    }

    #[test]
    fn equal_requires_name_uuid_and_version() {
        let uuid = Uuid::new_v4();
        let a = Patchset::load("ps", uuid, Version::initial());
        let b = Patchset::load("ps", uuid, Version::initial());
        assert!(a.equal(&b));
    }

    #[test]
    fn patches_and_floating_keep_insertion_order() {
        let mut ps = Patchset::new("ps");
        ps.add_patch("aaa");
        ps.add_patch("bbb");
        ps.add_floating_patch("ccc");
        ps.add_metadata_commit("mmm");
        assert_eq!(ps.patches(), ["aaa", "bbb"]);
        assert_eq!(ps.floating_patches(), ["ccc"]);
        assert_eq!(ps.metadata_commit(), Some("mmm"));
    }
}
