//! Patchset dependency graph.
//!
//! # Overview
//!
//! Patchsets may declare dependencies on patchsets earlier in the branch.
//! The graph drives target selection for reworks (reworking a patchset pulls
//! in everything that transitively depends on it) and builds (applying a
//! patchset pulls in everything it transitively depends on).
//!
//! # Invariants
//!
//! - No self loops, no duplicate edges: rejected by [`DepGraph::add`].
//! - Every edge points backwards in branch order: an edge `ps -> dep` is
//!   only accepted when `dep` precedes `ps` in the patchset cache. Since
//!   cache order is a topological order, graphs built through `add` are
//!   acyclic by construction.
//! - [`DepGraph::validate`] still checks for cycles with a three-coloured
//!   DFS, because [`DepGraph::load_map`] accepts arbitrary persisted edges.
//!
//! # Persistence
//!
//! `dependencies.json` is a JSON object mapping patchset name to the list of
//! its dependency names. Edge order within each list is insertion order;
//! top-level key order carries no meaning.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::patchset::Patchset;
use crate::repo::PatchsetCache;

/// Default path of the persisted graph, relative to the working directory.
pub const DEPENDENCIES_FILE: &str = "dependencies.json";

/// A patchset's dependency record: the owning patchset and its direct
/// dependencies in insertion order.
#[derive(Debug, Clone)]
struct DepRecord {
    patchset: Patchset,
    predicates: Vec<Patchset>,
}

/// Directed dependency graph over the patchsets of one cache snapshot.
///
/// Nodes are identified by patchset UUID; an edge `ps -> dep` means "ps
/// depends on dep".
#[derive(Debug)]
pub struct DepGraph {
    cache: Rc<PatchsetCache>,
    records: BTreeMap<String, DepRecord>,
    // Reverse adjacency, built on first use and dropped on mutation.
    reverse: RefCell<Option<HashMap<String, Vec<Patchset>>>>,
}

impl DepGraph {
    #[must_use]
    pub fn new(cache: Rc<PatchsetCache>) -> Self {
        Self {
            cache,
            records: BTreeMap::new(),
            reverse: RefCell::new(None),
        }
    }

    /// Load the graph from `path`, resolving names against `cache`.
    ///
    /// A missing file yields an empty graph; a malformed file or a name
    /// absent from the cache is an error.
    pub fn load_file(cache: Rc<PatchsetCache>, path: &Path) -> Result<Self> {
        let mut graph = Self::new(cache);
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(graph),
            Err(err) => return Err(err.into()),
        };
        let map: BTreeMap<String, Vec<String>> =
            serde_json::from_str(&text).map_err(|err| Error::DependencyFile {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        graph.load_map(&map)?;
        Ok(graph)
    }

    /// Whether any edges are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.values().all(|r| r.predicates.is_empty())
    }

    /// Add the edge `ps -> dep`.
    pub fn add(&mut self, ps: &Patchset, dep: &Patchset) -> Result<()> {
        if ps.same_as(dep) {
            return Err(Error::SelfDep(ps.name().to_string()));
        }
        if !self.check_order(ps, dep) {
            return Err(Error::OutOfOrder {
                ps: ps.name().to_string(),
                dep: dep.name().to_string(),
            });
        }
        let record = self
            .records
            .entry(ps.uuid().to_string())
            .or_insert_with(|| DepRecord {
                patchset: ps.clone(),
                predicates: Vec::new(),
            });
        if record.predicates.iter().any(|p| p.same_as(dep)) {
            return Err(Error::DuplicateDep {
                ps: ps.name().to_string(),
                dep: dep.name().to_string(),
            });
        }
        record.predicates.push(dep.clone());
        self.reverse.replace(None);
        Ok(())
    }

    /// Remove the edge `ps -> dep`.
    pub fn remove(&mut self, ps: &Patchset, dep: &Patchset) -> Result<()> {
        let missing = || Error::NoSuchDep {
            ps: ps.name().to_string(),
            dep: dep.name().to_string(),
        };
        let record = self
            .records
            .get_mut(&ps.uuid().to_string())
            .ok_or_else(missing)?;
        let index = record
            .predicates
            .iter()
            .position(|p| p.same_as(dep))
            .ok_or_else(missing)?;
        record.predicates.remove(index);
        self.reverse.replace(None);
        Ok(())
    }

    /// `dep` must come strictly before `ps` in the cache.
    fn check_order(&self, ps: &Patchset, dep: &Patchset) -> bool {
        match (
            self.cache.index_of(ps.name()),
            self.cache.index_of(dep.name()),
        ) {
            (Some(ps_index), Some(dep_index)) => ps_index > dep_index,
            _ => false,
        }
    }

    /// Check that the graph is a DAG.
    ///
    /// Nodes are visited in cache order, so the reported witness cycle is
    /// deterministic: the distinct patchset names on the cycle, in the order
    /// the DFS discovered them.
    pub fn validate(&self) -> Result<()> {
        let mut color: HashMap<String, Color> = HashMap::new();
        let mut stack: Vec<String> = Vec::new();

        for ps in self.cache.patchsets() {
            let uuid = ps.uuid().to_string();
            if !self.records.contains_key(&uuid) {
                continue;
            }
            if color.get(&uuid).copied().unwrap_or(Color::White) == Color::White {
                if let Some(cycle) = self.find_cycle(&uuid, &mut color, &mut stack) {
                    return Err(Error::Cycle(cycle));
                }
            }
        }
        Ok(())
    }

    fn find_cycle(
        &self,
        uuid: &str,
        color: &mut HashMap<String, Color>,
        stack: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        let record = self.records.get(uuid)?;
        color.insert(uuid.to_string(), Color::Gray);
        stack.push(record.patchset.name().to_string());

        for dep in &record.predicates {
            let dep_uuid = dep.uuid().to_string();
            match color.get(&dep_uuid).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = self.find_cycle(&dep_uuid, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    // Back edge: the cycle is the grey suffix of the stack.
                    let start = stack
                        .iter()
                        .position(|name| name == dep.name())
                        .unwrap_or(0);
                    return Some(stack[start..].to_vec());
                }
                Color::Black => {}
            }
        }

        stack.pop();
        color.insert(uuid.to_string(), Color::Black);
        None
    }

    /// All patchsets `ps` transitively depends on, excluding `ps` itself,
    /// in BFS discovery order.
    #[must_use]
    pub fn transitive_dependencies(&self, ps: &Patchset) -> Vec<Patchset> {
        self.closure(ps, |uuid| {
            self.records
                .get(uuid)
                .map(|r| r.predicates.clone())
                .unwrap_or_default()
        })
    }

    /// All patchsets transitively depending on `ps`, excluding `ps` itself,
    /// in BFS discovery order.
    #[must_use]
    pub fn transitive_reverse_dependencies(&self, ps: &Patchset) -> Vec<Patchset> {
        self.with_reverse(|reverse| {
            self.closure(ps, |uuid| reverse.get(uuid).cloned().unwrap_or_default())
        })
    }

    fn closure(&self, start: &Patchset, neighbors: impl Fn(&str) -> Vec<Patchset>) -> Vec<Patchset> {
        let mut out = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();

        seen.insert(start.uuid().to_string());
        queue.push_back(start.uuid().to_string());

        while let Some(uuid) = queue.pop_front() {
            for next in neighbors(&uuid) {
                let next_uuid = next.uuid().to_string();
                if seen.insert(next_uuid.clone()) {
                    out.push(next);
                    queue.push_back(next_uuid);
                }
            }
        }
        out
    }

    fn with_reverse<R>(&self, f: impl FnOnce(&HashMap<String, Vec<Patchset>>) -> R) -> R {
        let mut guard = self.reverse.borrow_mut();
        let reverse = guard.get_or_insert_with(|| {
            let mut map: HashMap<String, Vec<Patchset>> = HashMap::new();
            for ps in self.cache.patchsets() {
                map.entry(ps.uuid().to_string()).or_default();
                if let Some(record) = self.records.get(&ps.uuid().to_string()) {
                    for dep in &record.predicates {
                        map.entry(dep.uuid().to_string())
                            .or_default()
                            .push(ps.clone());
                    }
                }
            }
            map
        });
        f(reverse)
    }

    /// Flatten to the persisted shape: patchset name to dependency names.
    #[must_use]
    pub fn flatten(&self) -> BTreeMap<String, Vec<String>> {
        self.records
            .values()
            .map(|record| {
                (
                    record.patchset.name().to_string(),
                    record
                        .predicates
                        .iter()
                        .map(|p| p.name().to_string())
                        .collect(),
                )
            })
            .collect()
    }

    /// Serialize to pretty-printed JSON with a trailing newline.
    pub fn marshal_json(&self) -> Result<String> {
        let mut text = serde_json::to_string_pretty(&self.flatten()).map_err(|err| {
            Error::DependencyFile {
                path: DEPENDENCIES_FILE.into(),
                reason: err.to_string(),
            }
        })?;
        text.push('\n');
        Ok(text)
    }

    /// Load edges from the persisted shape, resolving every name against
    /// the cache.
    pub fn load_map(&mut self, map: &BTreeMap<String, Vec<String>>) -> Result<()> {
        for (name, dep_names) in map {
            let ps = self
                .cache
                .get(name)
                .ok_or_else(|| Error::PatchsetNotFound(name.clone()))?
                .clone();
            let mut predicates = Vec::with_capacity(dep_names.len());
            for dep_name in dep_names {
                let dep = self
                    .cache
                    .get(dep_name)
                    .ok_or_else(|| Error::PatchsetNotFound(dep_name.clone()))?;
                predicates.push(dep.clone());
            }
            self.records.insert(
                ps.uuid().to_string(),
                DepRecord { patchset: ps, predicates },
            );
        }
        self.reverse.replace(None);
        Ok(())
    }

    /// Insert an edge without order or duplicate checks. Test hook for
    /// exercising `validate` on graphs `add` would reject.
    #[cfg(test)]
    fn insert_unchecked(&mut self, ps: &Patchset, dep: &Patchset) {
        let record = self
            .records
            .entry(ps.uuid().to_string())
            .or_insert_with(|| DepRecord {
                patchset: ps.clone(),
                predicates: Vec::new(),
            });
        record.predicates.push(dep.clone());
        self.reverse.replace(None);
    }
}

/// DFS colours: unseen, on the stack, finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::PatchsetCache;

    /// Cache with the given patchsets in branch order (base to tip).
    fn cache_of(names: &[&str]) -> Rc<PatchsetCache> {
        Rc::new(PatchsetCache::from_patchsets(
            names.iter().map(|n| Patchset::new(*n)).collect(),
        ))
    }

    fn ps<'c>(cache: &'c PatchsetCache, name: &str) -> &'c Patchset {
        cache.get(name).expect("patchset in cache")
    }

    #[test]
    fn add_rejects_self_dependency() {
        let cache = cache_of(&["a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        let a = ps(&cache, "a").clone();
        let err = g.add(&a, &a).unwrap_err();
        assert!(matches!(err, Error::SelfDep(name) if name == "a"));
    }

    #[test]
    fn add_rejects_forward_edges() {
        // Cache order is [c, b, a]: c is closest to base.
        let cache = cache_of(&["c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));

        g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap();
        let err = g.add(ps(&cache, "b"), ps(&cache, "a")).unwrap_err();
        assert!(matches!(err, Error::OutOfOrder { ps, dep } if ps == "b" && dep == "a"));
    }

    #[test]
    fn add_rejects_duplicate_edges() {
        let cache = cache_of(&["b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap();
        let err = g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap_err();
        assert!(matches!(err, Error::DuplicateDep { .. }));
    }

    #[test]
    fn remove_requires_existing_edge() {
        let cache = cache_of(&["b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        let err = g.remove(ps(&cache, "a"), ps(&cache, "b")).unwrap_err();
        assert!(matches!(err, Error::NoSuchDep { .. }));

        g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap();
        g.remove(ps(&cache, "a"), ps(&cache, "b")).unwrap();
        let err = g.remove(ps(&cache, "a"), ps(&cache, "b")).unwrap_err();
        assert!(matches!(err, Error::NoSuchDep { .. }));
    }

    #[test]
    fn graphs_built_through_add_validate_clean() {
        let cache = cache_of(&["d", "c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap();
        g.add(ps(&cache, "a"), ps(&cache, "d")).unwrap();
        g.add(ps(&cache, "b"), ps(&cache, "c")).unwrap();
        g.add(ps(&cache, "c"), ps(&cache, "d")).unwrap();
        g.validate().unwrap();
    }

    #[test]
    fn validate_reports_the_witness_cycle() {
        let cache = cache_of(&["c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        g.insert_unchecked(ps(&cache, "a"), ps(&cache, "b"));
        g.insert_unchecked(ps(&cache, "b"), ps(&cache, "a"));

        let err = g.validate().unwrap_err();
        // DFS seeds in cache order, so the cycle is discovered from b.
        assert!(matches!(err, Error::Cycle(path) if path == ["b", "a"]));
    }

    #[test]
    fn validate_finds_longer_cycles() {
        let cache = cache_of(&["c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        g.insert_unchecked(ps(&cache, "c"), ps(&cache, "a"));
        g.insert_unchecked(ps(&cache, "a"), ps(&cache, "b"));
        g.insert_unchecked(ps(&cache, "b"), ps(&cache, "c"));

        match g.validate().unwrap_err() {
            Error::Cycle(path) => {
                assert_eq!(path.len(), 3);
                assert_eq!(path[0], "c");
            }
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn transitive_dependencies_is_the_smallest_closed_set() {
        let cache = cache_of(&["e", "d", "c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        // a -> b, a -> c, b -> d, c -> d; e unrelated.
        g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap();
        g.add(ps(&cache, "a"), ps(&cache, "c")).unwrap();
        g.add(ps(&cache, "b"), ps(&cache, "d")).unwrap();
        g.add(ps(&cache, "c"), ps(&cache, "d")).unwrap();

        let names: Vec<_> = g
            .transitive_dependencies(ps(&cache, "a"))
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        // BFS discovery order, a excluded, d deduplicated.
        assert_eq!(names, ["b", "c", "d"]);

        assert!(g.transitive_dependencies(ps(&cache, "e")).is_empty());
    }

    #[test]
    fn transitive_reverse_dependencies_mirrors_forward_edges() {
        let cache = cache_of(&["d", "c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        // b -> d, c -> d, a -> b.
        g.add(ps(&cache, "b"), ps(&cache, "d")).unwrap();
        g.add(ps(&cache, "c"), ps(&cache, "d")).unwrap();
        g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap();

        let names: Vec<_> = g
            .transitive_reverse_dependencies(ps(&cache, "d"))
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(names, ["b", "c", "a"]);
    }

    #[test]
    fn reverse_index_is_refreshed_after_mutation() {
        let cache = cache_of(&["c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        g.add(ps(&cache, "b"), ps(&cache, "c")).unwrap();

        let before: Vec<_> = g
            .transitive_reverse_dependencies(ps(&cache, "c"))
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(before, ["b"]);

        g.add(ps(&cache, "a"), ps(&cache, "c")).unwrap();
        let after: Vec<_> = g
            .transitive_reverse_dependencies(ps(&cache, "c"))
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(after, ["b", "a"]);
    }

    #[test]
    fn json_round_trips_structurally() {
        let cache = cache_of(&["c", "b", "a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        g.add(ps(&cache, "a"), ps(&cache, "c")).unwrap();
        g.add(ps(&cache, "a"), ps(&cache, "b")).unwrap();
        g.add(ps(&cache, "b"), ps(&cache, "c")).unwrap();

        let json = g.marshal_json().unwrap();
        let map: BTreeMap<String, Vec<String>> = serde_json::from_str(&json).unwrap();

        let mut reloaded = DepGraph::new(Rc::clone(&cache));
        reloaded.load_map(&map).unwrap();
        assert_eq!(reloaded.flatten(), g.flatten());
        // Edge order within a list is insertion order.
        assert_eq!(map["a"], ["c", "b"]);
    }

    #[test]
    fn load_rejects_names_missing_from_the_cache() {
        let cache = cache_of(&["a"]);
        let mut g = DepGraph::new(Rc::clone(&cache));
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), vec!["ghost".to_string()]);
        let err = g.load_map(&map).unwrap_err();
        assert!(matches!(err, Error::PatchsetNotFound(name) if name == "ghost"));
    }

    #[test]
    fn load_file_treats_missing_file_as_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = cache_of(&["a"]);
        let g = DepGraph::load_file(cache, &tmp.path().join(DEPENDENCIES_FILE)).unwrap();
        assert!(g.is_empty());
    }

    #[test]
    fn load_file_rejects_malformed_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(DEPENDENCIES_FILE);
        std::fs::write(&path, "{not json").unwrap();
        let cache = cache_of(&["a"]);
        let err = DepGraph::load_file(cache, &path).unwrap_err();
        assert!(matches!(err, Error::DependencyFile { .. }));
    }
}
