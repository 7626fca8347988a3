//! Patchset cache construction.
//!
//! Walks the commits between the kilt base (exclusive) and the working head,
//! oldest first, and classifies each single-parent commit:
//!
//! - metadata commits open a new patchset and make it "current";
//! - commits whose `Patchset-Name` footer matches the current patchset (or
//!   is absent, or is the literal `unknown`) become its patches;
//! - commits naming some other patchset become floating patches of that
//!   patchset, creating a placeholder if it has not been seen yet.
//!
//! Merge commits are ignored. Malformed metadata degrades to a warning and
//! the commit is skipped; the walk itself never fails on message content.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{Error, Result};
use crate::patchset::Patchset;
use crate::repo::{metadata, Repo};

/// Immutable snapshot of the patchsets on the branch, base to tip.
#[derive(Debug, Default)]
pub struct PatchsetCache {
    patchsets: Vec<Patchset>,
    index: HashMap<String, usize>,
}

impl PatchsetCache {
    /// Build a cache from patchsets already in branch order.
    #[must_use]
    pub fn from_patchsets(patchsets: Vec<Patchset>) -> Self {
        let index = patchsets
            .iter()
            .enumerate()
            .map(|(i, ps)| (ps.name().to_string(), i))
            .collect();
        Self { patchsets, index }
    }

    /// Patchsets in branch order.
    #[must_use]
    pub fn patchsets(&self) -> &[Patchset] {
        &self.patchsets
    }

    /// Position of the named patchset in branch order.
    #[must_use]
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Patchset> {
        self.index_of(name).map(|i| &self.patchsets[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.patchsets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.patchsets.is_empty()
    }
}

/// Walk the repository and build the cache snapshot.
pub(crate) fn build_cache(repo: &Repo) -> Result<PatchsetCache> {
    let git = repo.git();

    let head_commit = repo.walk_head_commit()?;
    let base = git
        .revparse_single(repo.base())
        .map_err(|err| Error::backing(format!("failed to parse base {:?}", repo.base()), err))?;

    let mut revwalk = git
        .revwalk()
        .map_err(|err| Error::backing("failed to start revwalk", err))?;
    revwalk
        .set_sorting(git2::Sort::TOPOLOGICAL | git2::Sort::TIME | git2::Sort::REVERSE)
        .map_err(|err| Error::backing("failed to set walk order", err))?;
    revwalk
        .push(head_commit.id())
        .map_err(|err| Error::backing("failed to push head onto walk", err))?;
    revwalk
        .hide(base.id())
        .map_err(|err| Error::backing("failed to hide base from walk", err))?;

    let mut builder = CacheBuilder::default();
    for oid in revwalk {
        let oid = oid.map_err(|err| Error::backing("revwalk failed", err))?;
        let commit = git
            .find_commit(oid)
            .map_err(|err| Error::backing(format!("failed to lookup commit {oid}"), err))?;

        if commit.parent_count() != 1 {
            continue;
        }

        let message = commit.message().unwrap_or_default();
        builder.push(&oid.to_string(), message);
    }

    Ok(builder.finish())
}

/// Accumulates the walk into ordered patchsets plus the name index.
#[derive(Default)]
struct CacheBuilder {
    patchsets: Vec<Patchset>,
    index: HashMap<String, usize>,
    current: Option<usize>,
}

impl CacheBuilder {
    fn push(&mut self, id: &str, message: &str) {
        if metadata::is_metadata_message(message) {
            self.push_metadata(id, message);
        } else {
            self.push_patch(id, message);
        }
    }

    fn push_metadata(&mut self, id: &str, message: &str) {
        let mut ps = match metadata::patchset_from_metadata(message) {
            Ok(ps) => ps,
            Err(err) => {
                warn!(commit = %id, "error parsing metadata: {err}");
                return;
            }
        };
        if self.index.contains_key(ps.name()) {
            warn!(patchset = %ps.name(), commit = %id, "patchset seen twice");
            return;
        }
        ps.add_metadata_commit(id);
        self.current = Some(self.append(ps));
    }

    fn push_patch(&mut self, id: &str, message: &str) {
        let fields = metadata::parse_fields(message);
        // Only a missing footer defaults to "unknown"; a present value is
        // taken as written, even when empty.
        let name = fields
            .get(metadata::NAME_FIELD)
            .map_or(metadata::UNKNOWN_PATCHSET, String::as_str);

        if let Some(current) = self.current {
            let current_ps = &mut self.patchsets[current];
            if name == current_ps.name() || name == metadata::UNKNOWN_PATCHSET {
                current_ps.add_patch(id);
                return;
            }
        }

        // The commit lies outside the range of the patchset it names: it is
        // a floating patch, targeted by the next rework.
        self.current = None;
        if let Some(&existing) = self.index.get(name) {
            self.patchsets[existing].add_floating_patch(id);
        } else {
            warn!(
                commit = %id,
                patchset = %name,
                "patch belongs to patchset which hasn't been seen yet"
            );
            let mut ps = Patchset::new(name);
            ps.add_floating_patch(id);
            self.append(ps);
        }
    }

    fn append(&mut self, ps: Patchset) -> usize {
        let position = self.patchsets.len();
        self.index.insert(ps.name().to_string(), position);
        self.patchsets.push(ps);
        position
    }

    fn finish(self) -> PatchsetCache {
        PatchsetCache {
            patchsets: self.patchsets,
            index: self.index,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::metadata::metadata_message;

    fn builder_with(commits: &[(&str, String)]) -> PatchsetCache {
        let mut builder = CacheBuilder::default();
        for (id, message) in commits {
            builder.push(id, message);
        }
        builder.finish()
    }

    #[test]
    fn metadata_then_patches_form_one_patchset() {
        let foo = Patchset::new("foo");
        let cache = builder_with(&[
            ("m1", metadata_message(&foo)),
            ("p1", "first patch\n".to_string()),
            ("p2", "second patch\n\nPatchset-Name: foo\n".to_string()),
        ]);

        assert_eq!(cache.len(), 1);
        let ps = cache.get("foo").unwrap();
        assert_eq!(ps.metadata_commit(), Some("m1"));
        assert_eq!(ps.patches(), ["p1", "p2"]);
        assert!(ps.floating_patches().is_empty());
    }

    #[test]
    fn unknown_footer_sticks_to_the_current_patchset() {
        let foo = Patchset::new("foo");
        let cache = builder_with(&[
            ("m1", metadata_message(&foo)),
            ("p1", "patch\n\nPatchset-Name: unknown\n".to_string()),
        ]);
        assert_eq!(cache.get("foo").unwrap().patches(), ["p1"]);
    }

    #[test]
    fn footer_naming_an_earlier_patchset_floats() {
        let foo = Patchset::new("foo");
        let bar = Patchset::new("bar");
        let cache = builder_with(&[
            ("m1", metadata_message(&foo)),
            ("p1", "patch\n".to_string()),
            ("m2", metadata_message(&bar)),
            ("p2", "late fix\n\nPatchset-Name: foo\n".to_string()),
        ]);

        assert_eq!(cache.len(), 2);
        let foo = cache.get("foo").unwrap();
        assert_eq!(foo.patches(), ["p1"]);
        assert_eq!(foo.floating_patches(), ["p2"]);
    }

    #[test]
    fn after_floating_the_current_patchset_is_closed() {
        // A footer-less commit after a floating one must not be adopted by
        // the patchset that was current before.
        let foo = Patchset::new("foo");
        let bar = Patchset::new("bar");
        let cache = builder_with(&[
            ("m1", metadata_message(&foo)),
            ("m2", metadata_message(&bar)),
            ("p1", "fix\n\nPatchset-Name: foo\n".to_string()),
            ("p2", "stray\n".to_string()),
        ]);

        let unknown = cache.get("unknown").unwrap();
        assert_eq!(unknown.floating_patches(), ["p2"]);
        assert!(cache.get("bar").unwrap().patches().is_empty());
    }

    #[test]
    fn empty_footer_value_floats_instead_of_defaulting() {
        // "Patchset-Name:" with an empty value is not the same as no footer:
        // it names an (empty-named) patchset the walk has not seen, so the
        // commit floats on a placeholder instead of joining the current
        // patchset.
        let foo = Patchset::new("foo");
        let cache = builder_with(&[
            ("m1", metadata_message(&foo)),
            ("p1", "patch\n\nPatchset-Name:\n".to_string()),
        ]);

        assert!(cache.get("foo").unwrap().patches().is_empty());
        let placeholder = cache.get("").unwrap();
        assert_eq!(placeholder.floating_patches(), ["p1"]);
    }

    #[test]
    fn unseen_patchset_names_create_placeholders() {
        let cache = builder_with(&[("p1", "fix\n\nPatchset-Name: ghost\n".to_string())]);

        assert_eq!(cache.len(), 1);
        let ghost = cache.get("ghost").unwrap();
        assert!(ghost.metadata_commit().is_none());
        assert!(ghost.patches().is_empty());
        assert_eq!(ghost.floating_patches(), ["p1"]);
    }

    #[test]
    fn malformed_metadata_is_skipped_with_a_warning() {
        let foo = Patchset::new("foo");
        let cache = builder_with(&[
            (
                "bad",
                "kilt metadata: patchset broken\n\nPatchset-Name: broken\n".to_string(),
            ),
            ("m1", metadata_message(&foo)),
            ("p1", "patch\n".to_string()),
        ]);

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("foo").unwrap().patches(), ["p1"]);
    }

    #[test]
    fn duplicate_patchset_names_keep_the_first() {
        let foo = Patchset::new("foo");
        let dup = Patchset::new("foo");
        let cache = builder_with(&[
            ("m1", metadata_message(&foo)),
            ("m2", metadata_message(&dup)),
            ("p1", "patch\n".to_string()),
        ]);

        assert_eq!(cache.len(), 1);
        let ps = cache.get("foo").unwrap();
        assert_eq!(ps.metadata_commit(), Some("m1"));
        // The duplicate did not become current; the patch followed the
        // still-current first foo.
        assert_eq!(ps.patches(), ["p1"]);
    }

    #[test]
    fn indices_are_dense_and_match_order() {
        let a = Patchset::new("a");
        let b = Patchset::new("b");
        let cache = builder_with(&[
            ("m1", metadata_message(&a)),
            ("m2", metadata_message(&b)),
        ]);

        assert_eq!(cache.index_of("a"), Some(0));
        assert_eq!(cache.index_of("b"), Some(1));
        for (i, ps) in cache.patchsets().iter().enumerate() {
            assert_eq!(cache.index_of(ps.name()), Some(i));
        }
    }
}
