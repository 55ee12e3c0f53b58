//! Query results

use serde::Serialize;

use crate::model::AttributedChange;

/// One page of matching changes
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub entity_id: String,
    /// Matching changes on this page, in sort order
    pub changes: Vec<AttributedChange>,
    /// Matches before paging
    pub total_matches: usize,
    pub has_more: bool,
    pub offset: usize,
    pub limit: usize,
    /// Log entries examined
    pub entries_scanned: usize,
    pub latency_ms: f64,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Offset of the next page, if there is one
    pub fn next_offset(&self) -> Option<usize> {
        self.has_more.then_some(self.offset + self.changes.len())
    }
}

/// A change and its whole causal chain
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelatedChanges {
    pub entity_id: String,
    pub change: AttributedChange,
    /// Transitive causes, nearest first
    pub ancestors: Vec<AttributedChange>,
    /// Transitive effects, breadth first
    pub descendants: Vec<AttributedChange>,
}

impl RelatedChanges {
    /// Ancestors then descendants
    pub fn all(&self) -> Vec<AttributedChange> {
        self.ancestors
            .iter()
            .chain(self.descendants.iter())
            .cloned()
            .collect()
    }
}
