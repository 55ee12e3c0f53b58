//! Built-in category detectors

mod abilities;
mod combat;
mod feats;
mod inventory;
mod proficiencies;
mod profile;
mod progression;
mod spellcasting;

pub use abilities::{ability_modifier, AbilityScoreDetector, ABILITIES};
pub use combat::CombatStatsDetector;
pub use feats::{FeatDetector, FeatureDetector};
pub use inventory::InventoryDetector;
pub use proficiencies::ProficiencyDetector;
pub use profile::{MetadataDetector, PersonalityDetector};
pub use progression::ProgressionDetector;
pub use spellcasting::SpellcastingDetector;

use super::detector::CategoryDetector;

/// Every built-in detector, in registration order (one per category)
pub fn builtin() -> Vec<Box<dyn CategoryDetector>> {
    vec![
        Box::new(ProgressionDetector),
        Box::new(AbilityScoreDetector),
        Box::new(FeatDetector),
        Box::new(FeatureDetector),
        Box::new(CombatStatsDetector),
        Box::new(SpellcastingDetector),
        Box::new(InventoryDetector),
        Box::new(ProficiencyDetector),
        Box::new(PersonalityDetector),
        Box::new(MetadataDetector),
    ]
}
