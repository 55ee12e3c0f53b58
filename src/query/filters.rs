//! Change filtering
//!
//! All conditions are ANDed. Filters work on borrowed history; nothing is
//! cloned until the page is cut.

use super::options::QueryOptions;
use crate::model::{AttributedChange, ChangeLogEntry};

/// A change together with the entry that holds it
#[derive(Debug, Clone, Copy)]
pub struct Hit<'a> {
    pub entry: &'a ChangeLogEntry,
    pub change: &'a AttributedChange,
}

/// Evaluates [`QueryOptions`] conditions against stored changes
pub struct ChangeFilter<'a> {
    options: &'a QueryOptions,
    text: Option<String>,
    cause_name: Option<String>,
}

impl<'a> ChangeFilter<'a> {
    pub fn new(options: &'a QueryOptions) -> Self {
        Self {
            options,
            text: options.text.as_ref().map(|t| t.to_lowercase()),
            cause_name: options.cause_name.as_ref().map(|n| n.to_lowercase()),
        }
    }

    /// Cheap entry-level check; an entry outside the time range holds no hits.
    pub fn matches_entry(&self, entry: &ChangeLogEntry) -> bool {
        self.options
            .time_range
            .map_or(true, |range| range.contains(entry.timestamp))
    }

    pub fn matches(&self, change: &AttributedChange) -> bool {
        let options = self.options;
        let field = &change.change;

        if !options.categories.is_empty() && !options.categories.contains(&field.category) {
            return false;
        }
        if !options.priorities.is_empty() && !options.priorities.contains(&field.priority) {
            return false;
        }
        if let Some(attributed) = options.attributed {
            if change.is_attributed() != attributed {
                return false;
            }
        }
        if let Some(cause_type) = options.cause_type {
            if change.caused_by.as_ref().map(|l| l.cause_type) != Some(cause_type) {
                return false;
            }
        }
        if let Some(name) = &self.cause_name {
            match &change.caused_by {
                Some(link) if link.cause_name.to_lowercase() == *name => {}
                _ => return false,
            }
        }
        if let Some(text) = &self.text {
            if !field.description.to_lowercase().contains(text.as_str())
                && !field.field_path.to_lowercase().contains(text.as_str())
            {
                return false;
            }
        }
        true
    }

    /// Every matching change of `entries`, in history order
    pub fn collect<'e>(&self, entries: &'e [ChangeLogEntry]) -> Vec<Hit<'e>> {
        entries
            .iter()
            .filter(|entry| self.matches_entry(entry))
            .flat_map(|entry| {
                entry
                    .changes
                    .iter()
                    .filter(|change| self.matches(change))
                    .map(move |change| Hit { entry, change })
            })
            .collect()
    }
}
