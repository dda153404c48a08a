//! Sparse boundary-tag assignments over edge indices.

use std::collections::BTreeMap;

/// Integer classifier of a boundary edge (native `int`).
pub type BoundaryTag = i32;

/// Reserved "untagged" value.
pub const DEFAULT_TAG: BoundaryTag = 0;

/// Sparse mapping from edge index to boundary tag.
///
/// Iteration is ordered by edge index, so two maps built from the same
/// assignments compare and print identically.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BoundaryTagMap {
    tags: BTreeMap<usize, BoundaryTag>,
}

impl BoundaryTagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns `tag` to `edge`, returning the previous value if any.
    pub fn insert(&mut self, edge: usize, tag: BoundaryTag) -> Option<BoundaryTag> {
        self.tags.insert(edge, tag)
    }

    pub fn get(&self, edge: usize) -> Option<BoundaryTag> {
        self.tags.get(&edge).copied()
    }

    /// Tag of `edge`, or [`DEFAULT_TAG`] if unassigned.
    pub fn tag_or_default(&self, edge: usize) -> BoundaryTag {
        self.get(edge).unwrap_or(DEFAULT_TAG)
    }

    pub fn remove(&mut self, edge: usize) -> Option<BoundaryTag> {
        self.tags.remove(&edge)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, BoundaryTag)> + '_ {
        self.tags.iter().map(|(&e, &t)| (e, t))
    }

    /// Overwrites entries with those of `later`; `later` wins on shared edges.
    pub fn overlay(&mut self, later: &BoundaryTagMap) {
        for (e, t) in later.iter() {
            self.tags.insert(e, t);
        }
    }

    /// Drops explicit default entries.
    pub fn without_defaults(mut self) -> Self {
        self.tags.retain(|_, t| *t != DEFAULT_TAG);
        self
    }

    /// Largest edge index present.
    pub fn max_edge(&self) -> Option<usize> {
        self.tags.keys().next_back().copied()
    }
}

impl FromIterator<(usize, BoundaryTag)> for BoundaryTagMap {
    fn from_iter<I: IntoIterator<Item = (usize, BoundaryTag)>>(iter: I) -> Self {
        Self {
            tags: iter.into_iter().collect(),
        }
    }
}
