//! Result sorting
//!
//! Stable: changes that compare equal keep their history order (entry
//! sequence, then position within the batch).

use std::cmp::Ordering;

use super::filters::Hit;
use super::options::{SortDirection, SortField, SortSpec};

pub struct ChangeSorter;

impl ChangeSorter {
    pub fn sort(hits: &mut [Hit<'_>], spec: &SortSpec) {
        hits.sort_by(|a, b| {
            let ordering = Self::compare(a, b, spec.field);
            match spec.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            }
        });
    }

    fn compare(a: &Hit<'_>, b: &Hit<'_>, field: SortField) -> Ordering {
        match field {
            SortField::Timestamp => a.entry.timestamp.cmp(&b.entry.timestamp),
            SortField::Priority => a.change.change.priority.cmp(&b.change.change.priority),
            SortField::Category => a
                .change
                .change
                .category
                .as_str()
                .cmp(b.change.change.category.as_str()),
            SortField::Confidence => {
                let confidence = |h: &Hit<'_>| h.change.caused_by.as_ref().map(|l| l.confidence);
                match (confidence(a), confidence(b)) {
                    (None, None) => Ordering::Equal,
                    (None, Some(_)) => Ordering::Less,
                    (Some(_), None) => Ordering::Greater,
                    (Some(x), Some(y)) => x.total_cmp(&y),
                }
            }
            SortField::FieldPath => a.change.change.field_path.cmp(&b.change.change.field_path),
        }
    }
}
