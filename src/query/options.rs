//! Query options
//!
//! Built fluently; everything is optional except paging and sorting, which
//! have defaults (newest first, 50 per page).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{QueryEngineResult, QueryError};
use crate::model::{CauseType, ChangeCategory, Priority};

pub const DEFAULT_LIMIT: usize = 50;
pub const MAX_LIMIT: usize = 1000;

/// Inclusive time range; an open end is unbounded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn since(start: DateTime<Utc>) -> Self {
        Self::new(Some(start), None)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }

    pub fn validate(&self) -> QueryEngineResult<()> {
        match (self.start, self.end) {
            (Some(start), Some(end)) if start > end => Err(QueryError::InvalidTimeRange { start, end }),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Timestamp,
    Priority,
    Category,
    /// Confidence of the change's direct cause; unattributed changes rank lowest
    Confidence,
    FieldPath,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "timestamp" => Ok(SortField::Timestamp),
            "priority" => Ok(SortField::Priority),
            "category" => Ok(SortField::Category),
            "confidence" => Ok(SortField::Confidence),
            "field_path" | "path" => Ok(SortField::FieldPath),
            _ => Err(format!("unknown sort field: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl FromStr for SortDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(format!("unknown sort direction: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Default for SortSpec {
    fn default() -> Self {
        Self {
            field: SortField::Timestamp,
            direction: SortDirection::Desc,
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = match self.direction {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        };
        write!(f, "{:?} {}", self.field, direction)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub time_range: Option<TimeRange>,
    /// Empty means every category
    pub categories: Vec<ChangeCategory>,
    /// Empty means every priority
    pub priorities: Vec<Priority>,
    pub cause_type: Option<CauseType>,
    /// Matched case-insensitively against the direct cause's name
    pub cause_name: Option<String>,
    /// `Some(true)`: only changes with a known cause; `Some(false)`: only without
    pub attributed: Option<bool>,
    /// Case-insensitive substring of the description or field path
    pub text: Option<String>,
    pub include_archived: bool,
    pub sort: SortSpec,
    pub offset: usize,
    pub limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            time_range: None,
            categories: Vec::new(),
            priorities: Vec::new(),
            cause_type: None,
            cause_name: None,
            attributed: None,
            text: None,
            include_archived: false,
            sort: SortSpec::default(),
            offset: 0,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn categories(mut self, categories: impl IntoIterator<Item = ChangeCategory>) -> Self {
        self.categories.extend(categories);
        self
    }

    pub fn category(self, category: ChangeCategory) -> Self {
        self.categories([category])
    }

    pub fn priorities(mut self, priorities: impl IntoIterator<Item = Priority>) -> Self {
        self.priorities.extend(priorities);
        self
    }

    pub fn priority(self, priority: Priority) -> Self {
        self.priorities([priority])
    }

    pub fn cause_type(mut self, cause_type: CauseType) -> Self {
        self.cause_type = Some(cause_type);
        self
    }

    pub fn cause_name(mut self, name: impl Into<String>) -> Self {
        self.cause_name = Some(name.into());
        self
    }

    pub fn attributed(mut self, attributed: bool) -> Self {
        self.attributed = Some(attributed);
        self
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn include_archived(mut self, include: bool) -> Self {
        self.include_archived = include;
        self
    }

    pub fn sort_by(mut self, field: SortField, direction: SortDirection) -> Self {
        self.sort = SortSpec { field, direction };
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn validate(&self) -> QueryEngineResult<()> {
        if self.limit == 0 || self.limit > MAX_LIMIT {
            return Err(QueryError::InvalidLimit {
                limit: self.limit,
                max: MAX_LIMIT,
            });
        }
        if let Some(range) = &self.time_range {
            range.validate()?;
        }
        Ok(())
    }
}
