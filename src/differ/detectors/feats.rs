use crate::differ::detector::{name_set, set_changes, CategoryDetector, ChangeDraft};
use crate::differ::errors::DetectionResult;
use crate::model::{ChangeCategory, Priority};
use crate::snapshot::Snapshot;

/// Feats gained or lost. Order in the list does not matter.
pub struct FeatDetector;

impl CategoryDetector for FeatDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Feats
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        let before = name_set(old, "feats")?;
        let after = name_set(new, "feats")?;
        Ok(set_changes(
            self.category(),
            "feats",
            &before,
            &after,
            Priority::High,
            "feat",
        ))
    }
}

/// Class and racial features
pub struct FeatureDetector;

impl CategoryDetector for FeatureDetector {
    fn category(&self) -> ChangeCategory {
        ChangeCategory::Features
    }

    fn detect(&self, old: &Snapshot, new: &Snapshot) -> DetectionResult<Vec<ChangeDraft>> {
        let before = name_set(old, "features")?;
        let after = name_set(new, "features")?;
        Ok(set_changes(
            self.category(),
            "features",
            &before,
            &after,
            Priority::Medium,
            "feature",
        ))
    }
}
