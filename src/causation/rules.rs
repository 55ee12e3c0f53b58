//! Causation rules
//!
//! Each rule is a tagged variant with two halves: a trigger predicate
//! (does this change start a causal chain of my kind?) and an effect
//! assessment (how strongly does this other change look like my effect?).
//! Rules are evaluated in [`CausationRule::ORDERED`]; on equal confidence
//! the earlier rule wins.

use serde_json::Value;

use super::feats::{self, FeatEffect, FeatProfile};
use crate::differ::detectors::ability_modifier;
use crate::model::{CauseType, ChangeCategory, FieldChange};
use crate::snapshot::{display_value, numeric_value};

const EPSILON: f64 = 1e-9;

/// How closely an effect matches what its trigger predicts.
///
/// Variants are ordered weakest to strongest and confidence never
/// decreases with strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signal {
    /// Only co-occurrence in the same update
    Coincident,
    /// The effect is in a category the trigger is known to touch
    CategoryMatch,
    /// The effect moved in the direction the trigger predicts
    Directional,
    /// The numeric delta is close to the predicted one
    ApproximateDelta,
    /// The numeric delta is exactly the predicted one
    ExactDelta,
}

impl Signal {
    pub fn confidence(&self) -> f64 {
        match self {
            Signal::Coincident => 0.45,
            Signal::CategoryMatch => 0.72,
            Signal::Directional => 0.78,
            Signal::ApproximateDelta => 0.85,
            Signal::ExactDelta => 0.95,
        }
    }

    /// Grades an observed delta against the predicted one.
    pub fn for_delta(expected: f64, observed: Option<f64>) -> Option<Signal> {
        let observed = observed?;
        if (observed - expected).abs() < EPSILON {
            Some(Signal::ExactDelta)
        } else if observed * expected > 0.0 && (observed - expected).abs() <= 1.0 + EPSILON {
            Some(Signal::ApproximateDelta)
        } else if observed * expected > 0.0 {
            Some(Signal::Directional)
        } else {
            None
        }
    }
}

/// Facts about the whole batch that rules may consult
#[derive(Debug, Clone, Default)]
pub struct BatchFacts {
    /// Character level after the update, when the batch changed it
    pub new_level: Option<f64>,
}

impl BatchFacts {
    pub fn from_changes<'a>(changes: impl IntoIterator<Item = &'a FieldChange>) -> Self {
        let new_level = changes
            .into_iter()
            .find(|c| c.category == ChangeCategory::Progression && c.field_path == "level")
            .and_then(|c| c.new_value.as_ref())
            .and_then(numeric_value);
        Self { new_level }
    }
}

/// A change recognized as the start of a causal chain
#[derive(Debug, Clone)]
pub struct Trigger {
    pub rule: CausationRule,
    /// Human-meaningful name ("Alert", "Wizard", "Shield", "level 4")
    pub name: String,
    kind: TriggerKind,
}

#[derive(Debug, Clone)]
enum TriggerKind {
    Feat(Option<&'static FeatProfile>),
    Class,
    Equipment {
        direction: f64,
        ac_bonus: Option<f64>,
        attack_bonus: Option<f64>,
    },
    Level {
        new_level: f64,
    },
    Ability {
        ability: String,
        modifier_delta: f64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CausationRule {
    /// A feat was added
    FeatSelection,
    /// A new class was added
    Multiclass,
    /// An item was equipped, unequipped, or added/removed while equipped
    EquipmentChange,
    /// Character or class level went up
    LevelProgression,
    /// An ability score changed
    AbilityScoreChange,
}

impl CausationRule {
    pub const ORDERED: [CausationRule; 5] = [
        CausationRule::FeatSelection,
        CausationRule::Multiclass,
        CausationRule::EquipmentChange,
        CausationRule::LevelProgression,
        CausationRule::AbilityScoreChange,
    ];

    pub fn cause_type(&self) -> CauseType {
        match self {
            CausationRule::FeatSelection => CauseType::FeatSelection,
            CausationRule::Multiclass => CauseType::Multiclass,
            CausationRule::EquipmentChange => CauseType::EquipmentChange,
            CausationRule::LevelProgression => CauseType::LevelProgression,
            CausationRule::AbilityScoreChange => CauseType::AbilityScoreChange,
        }
    }

    /// Position in the evaluation order
    pub fn rank(&self) -> usize {
        Self::ORDERED
            .iter()
            .position(|r| r == self)
            .unwrap_or(Self::ORDERED.len())
    }

    /// Returns a trigger if `change` starts a chain of this rule's kind.
    pub fn trigger(&self, change: &FieldChange) -> Option<Trigger> {
        let segments: Vec<&str> = change.path_segments().collect();
        let (name, kind) = match self {
            CausationRule::FeatSelection => {
                if change.category != ChangeCategory::Feats || !change.is_addition() {
                    return None;
                }
                let name = change.subject_value().map(display_value)?;
                let profile = feats::lookup(&name);
                (name, TriggerKind::Feat(profile))
            }
            CausationRule::Multiclass => {
                if change.category != ChangeCategory::Progression
                    || segments.len() != 2
                    || segments[0] != "classes"
                    || !change.is_addition()
                {
                    return None;
                }
                (segments[1].to_string(), TriggerKind::Class)
            }
            CausationRule::EquipmentChange => {
                if change.category != ChangeCategory::Inventory || segments.len() < 2 {
                    return None;
                }
                let kind = match segments.len() {
                    3 if segments[2] == "equipped" => {
                        let now = change.new_value.as_ref().and_then(Value::as_bool)?;
                        TriggerKind::Equipment {
                            direction: if now { 1.0 } else { -1.0 },
                            ac_bonus: None,
                            attack_bonus: None,
                        }
                    }
                    2 => {
                        let item = change.subject_value()?;
                        if !item.get("equipped").and_then(Value::as_bool)? {
                            return None;
                        }
                        TriggerKind::Equipment {
                            direction: if change.is_addition() { 1.0 } else { -1.0 },
                            ac_bonus: item.get("ac_bonus").and_then(numeric_value),
                            attack_bonus: item.get("attack_bonus").and_then(numeric_value),
                        }
                    }
                    _ => return None,
                };
                (segments[1].to_string(), kind)
            }
            CausationRule::LevelProgression => {
                let is_level = change.field_path == "level"
                    || (segments.len() == 3 && segments[0] == "classes" && segments[2] == "level");
                if change.category != ChangeCategory::Progression || !is_level {
                    return None;
                }
                if change.old_value.is_none() || change.numeric_delta()? <= 0.0 {
                    return None;
                }
                let new_level = change.new_value.as_ref().and_then(numeric_value)?;
                let level = display_value(&Value::from(new_level));
                let name = if segments.len() == 3 {
                    format!("{} {}", segments[1], level)
                } else {
                    format!("level {}", level)
                };
                (name, TriggerKind::Level { new_level })
            }
            CausationRule::AbilityScoreChange => {
                if change.category != ChangeCategory::AbilityScores {
                    return None;
                }
                let old = change.old_value.as_ref().and_then(numeric_value)?;
                let new = change.new_value.as_ref().and_then(numeric_value)?;
                let ability = change.leaf().to_string();
                let modifier_delta = ability_modifier(new) - ability_modifier(old);
                (
                    capitalize(&ability),
                    TriggerKind::Ability {
                        ability,
                        modifier_delta,
                    },
                )
            }
        };
        Some(Trigger {
            rule: *self,
            name,
            kind,
        })
    }

    /// Grades how well `effect` matches what `trigger` predicts.
    ///
    /// Returns `None` when the change is not a plausible effect at all.
    pub fn assess(&self, trigger: &Trigger, effect: &FieldChange, facts: &BatchFacts) -> Option<Signal> {
        match &trigger.kind {
            TriggerKind::Feat(profile) => assess_feat(*profile, effect, facts),
            TriggerKind::Class => assess_class(effect),
            TriggerKind::Equipment {
                direction,
                ac_bonus,
                attack_bonus,
            } => {
                let expected = match effect.field_path.as_str() {
                    "combat.armor_class" => *ac_bonus,
                    "combat.attack_bonus" => *attack_bonus,
                    _ => return None,
                };
                let delta = effect.numeric_delta()?;
                match expected {
                    Some(bonus) => Signal::for_delta(bonus * direction, Some(delta)),
                    None if delta * direction > 0.0 => Some(Signal::Directional),
                    None => None,
                }
            }
            TriggerKind::Level { new_level } => assess_level(*new_level, effect),
            TriggerKind::Ability {
                ability,
                modifier_delta,
            } => assess_ability(ability, *modifier_delta, effect, facts),
        }
    }
}

fn assess_feat(profile: Option<&FeatProfile>, effect: &FieldChange, facts: &BatchFacts) -> Option<Signal> {
    let Some(profile) = profile else {
        // Unknown feats most often carry a +1 ability increase
        return match (effect.category, effect.numeric_delta()) {
            (ChangeCategory::AbilityScores, Some(d)) if (d - 1.0).abs() < EPSILON => {
                Some(Signal::CategoryMatch)
            }
            (ChangeCategory::Spellcasting | ChangeCategory::Proficiencies, _) if effect.is_addition() => {
                Some(Signal::Coincident)
            }
            _ => None,
        };
    };

    profile
        .effects
        .iter()
        .filter_map(|feat_effect| assess_feat_effect(feat_effect, effect, facts))
        .max()
}

fn assess_feat_effect(feat_effect: &FeatEffect, effect: &FieldChange, facts: &BatchFacts) -> Option<Signal> {
    let path = effect.field_path.as_str();
    match feat_effect {
        FeatEffect::Initiative(n) if path == "combat.initiative_bonus" => {
            Signal::for_delta(*n, effect.numeric_delta())
        }
        FeatEffect::Speed(n) if path == "combat.speed" => Signal::for_delta(*n, effect.numeric_delta()),
        FeatEffect::ArmorClass(n) if path == "combat.armor_class" => {
            Signal::for_delta(*n, effect.numeric_delta())
        }
        FeatEffect::HitPointsPerLevel(n) if path == "combat.max_hp" => match facts.new_level {
            Some(level) => Signal::for_delta(n * level, effect.numeric_delta()),
            None if effect.numeric_delta()? > 0.0 => Some(Signal::Directional),
            None => None,
        },
        FeatEffect::AbilityIncrease(options) if effect.category == ChangeCategory::AbilityScores => {
            if !options.is_empty() && !options.iter().any(|o| *o == effect.leaf()) {
                return None;
            }
            Signal::for_delta(1.0, effect.numeric_delta())
        }
        FeatEffect::AbilityScoreImprovement if effect.category == ChangeCategory::AbilityScores => {
            match effect.numeric_delta()? {
                d if (d - 1.0).abs() < EPSILON || (d - 2.0).abs() < EPSILON => Some(Signal::ExactDelta),
                d if d > 0.0 => Some(Signal::Directional),
                _ => None,
            }
        }
        FeatEffect::Spells if path.starts_with("spellcasting.spells.") && effect.is_addition() => {
            Some(Signal::Directional)
        }
        FeatEffect::Skills
            if (path.starts_with("proficiencies.skills.")
                || path.starts_with("proficiencies.tools.")
                || path.starts_with("proficiencies.languages."))
                && effect.is_addition() =>
        {
            Some(Signal::Directional)
        }
        FeatEffect::Armor if path.starts_with("proficiencies.armor.") && effect.is_addition() => {
            Some(Signal::Directional)
        }
        _ => None,
    }
}

fn assess_class(effect: &FieldChange) -> Option<Signal> {
    match effect.category {
        ChangeCategory::Spellcasting if effect.is_addition() => Some(Signal::Directional),
        ChangeCategory::Spellcasting => Some(Signal::CategoryMatch),
        ChangeCategory::Proficiencies | ChangeCategory::Features if effect.is_addition() => {
            Some(Signal::CategoryMatch)
        }
        _ => None,
    }
}

/// Proficiency bonus at a character level: +2 at 1-4, +3 at 5-8, ...
pub fn proficiency_bonus(level: f64) -> f64 {
    2.0 + ((level - 1.0).max(0.0) / 4.0).floor()
}

fn assess_level(new_level: f64, effect: &FieldChange) -> Option<Signal> {
    let path = effect.field_path.as_str();
    let increased = || effect.numeric_delta().map(|d| d > 0.0).unwrap_or(false);
    match effect.category {
        ChangeCategory::CombatStats => match path {
            "combat.max_hp" if increased() => Some(Signal::Directional),
            "combat.proficiency_bonus" if increased() => {
                let new = effect.new_value.as_ref().and_then(numeric_value)?;
                if (new - proficiency_bonus(new_level)).abs() < EPSILON {
                    Some(Signal::ExactDelta)
                } else {
                    Some(Signal::Directional)
                }
            }
            "combat.hit_dice" => Some(Signal::Directional),
            _ => None,
        },
        ChangeCategory::Features if effect.is_addition() => Some(Signal::Directional),
        ChangeCategory::Spellcasting if path.starts_with("spellcasting.slots.") && increased() => {
            Some(Signal::Directional)
        }
        ChangeCategory::Spellcasting if path.starts_with("spellcasting.spells.") && effect.is_addition() => {
            Some(Signal::Directional)
        }
        _ => None,
    }
}

fn assess_ability(ability: &str, modifier_delta: f64, effect: &FieldChange, facts: &BatchFacts) -> Option<Signal> {
    if modifier_delta.abs() < EPSILON {
        return None;
    }
    let path = effect.field_path.as_str();
    let delta = effect.numeric_delta();
    match (ability, path) {
        ("dexterity", "combat.initiative_bonus" | "combat.armor_class") => {
            Signal::for_delta(modifier_delta, delta)
        }
        ("strength", "combat.attack_bonus") => Signal::for_delta(modifier_delta, delta),
        ("constitution", "combat.max_hp") => match facts.new_level {
            Some(level) => Signal::for_delta(modifier_delta * level, delta),
            None => Signal::for_delta(modifier_delta, delta).map(|s| s.min(Signal::Directional)),
        },
        (
            "intelligence" | "wisdom" | "charisma",
            "spellcasting.spell_save_dc" | "spellcasting.spell_attack_bonus",
        ) => Signal::for_delta(modifier_delta, delta),
        _ => None,
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    use crate::model::Priority;

    fn change(category: ChangeCategory, path: &str, old: Option<Value>, new: Option<Value>) -> FieldChange {
        FieldChange {
            id: format!("b-{}", path),
            entity_id: "42".into(),
            category,
            field_path: path.into(),
            old_value: old,
            new_value: new,
            priority: Priority::Medium,
            description: String::new(),
            detected_at: Utc::now(),
        }
    }

    fn alert() -> Trigger {
        let feat = change(ChangeCategory::Feats, "feats.Alert", None, Some(json!("Alert")));
        CausationRule::FeatSelection.trigger(&feat).unwrap()
    }

    fn initiative(old: i64, new: i64) -> FieldChange {
        change(
            ChangeCategory::CombatStats,
            "combat.initiative_bonus",
            Some(json!(old)),
            Some(json!(new)),
        )
    }

    #[test]
    fn test_signal_confidence_is_monotonic() {
        let tiers = [
            Signal::Coincident,
            Signal::CategoryMatch,
            Signal::Directional,
            Signal::ApproximateDelta,
            Signal::ExactDelta,
        ];
        for pair in tiers.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].confidence() < pair[1].confidence());
        }
        assert!(Signal::CategoryMatch.confidence() >= 0.7);
        assert!(Signal::Coincident.confidence() < 0.7);
    }

    #[test]
    fn test_for_delta() {
        assert_eq!(Signal::for_delta(5.0, Some(5.0)), Some(Signal::ExactDelta));
        assert_eq!(Signal::for_delta(5.0, Some(4.0)), Some(Signal::ApproximateDelta));
        assert_eq!(Signal::for_delta(5.0, Some(12.0)), Some(Signal::Directional));
        assert_eq!(Signal::for_delta(5.0, Some(-5.0)), None);
        assert_eq!(Signal::for_delta(5.0, None), None);
    }

    #[test]
    fn test_alert_predicts_initiative() {
        let trigger = alert();
        assert_eq!(trigger.name, "Alert");
        let facts = BatchFacts::default();
        let rule = CausationRule::FeatSelection;
        assert_eq!(rule.assess(&trigger, &initiative(2, 7), &facts), Some(Signal::ExactDelta));
        assert_eq!(rule.assess(&trigger, &initiative(2, 6), &facts), Some(Signal::ApproximateDelta));
        assert_eq!(rule.assess(&trigger, &initiative(2, 1), &facts), None);
    }

    #[test]
    fn test_stronger_signal_never_lowers_confidence() {
        let trigger = alert();
        let facts = BatchFacts::default();
        let rule = CausationRule::FeatSelection;
        let exact = rule.assess(&trigger, &initiative(0, 5), &facts).unwrap();
        let approx = rule.assess(&trigger, &initiative(0, 6), &facts).unwrap();
        let loose = rule.assess(&trigger, &initiative(0, 9), &facts).unwrap();
        assert!(exact.confidence() >= approx.confidence());
        assert!(approx.confidence() >= loose.confidence());
    }

    #[test]
    fn test_feat_removal_is_not_a_trigger() {
        let removed = change(ChangeCategory::Feats, "feats.Alert", Some(json!("Alert")), None);
        assert!(CausationRule::FeatSelection.trigger(&removed).is_none());
    }

    #[test]
    fn test_level_rule_ignores_feats_and_initiative() {
        let level = change(ChangeCategory::Progression, "level", Some(json!(3)), Some(json!(4)));
        let trigger = CausationRule::LevelProgression.trigger(&level).unwrap();
        assert_eq!(trigger.name, "level 4");
        let facts = BatchFacts::default();
        let feat = change(ChangeCategory::Feats, "feats.Alert", None, Some(json!("Alert")));
        assert!(CausationRule::LevelProgression.assess(&trigger, &feat, &facts).is_none());
        assert!(CausationRule::LevelProgression
            .assess(&trigger, &initiative(2, 7), &facts)
            .is_none());
    }

    #[test]
    fn test_level_proficiency_bonus() {
        assert_eq!(proficiency_bonus(4.0), 2.0);
        assert_eq!(proficiency_bonus(5.0), 3.0);
        assert_eq!(proficiency_bonus(17.0), 6.0);

        let level = change(ChangeCategory::Progression, "level", Some(json!(4)), Some(json!(5)));
        let trigger = CausationRule::LevelProgression.trigger(&level).unwrap();
        let pb = change(
            ChangeCategory::CombatStats,
            "combat.proficiency_bonus",
            Some(json!(2)),
            Some(json!(3)),
        );
        assert_eq!(
            CausationRule::LevelProgression.assess(&trigger, &pb, &BatchFacts::default()),
            Some(Signal::ExactDelta)
        );
    }

    #[test]
    fn test_equipping_shield() {
        let shield = change(
            ChangeCategory::Inventory,
            "inventory.Shield",
            None,
            Some(json!({"name": "Shield", "quantity": 1, "equipped": true, "ac_bonus": 2})),
        );
        let trigger = CausationRule::EquipmentChange.trigger(&shield).unwrap();
        assert_eq!(trigger.name, "Shield");
        let ac = change(
            ChangeCategory::CombatStats,
            "combat.armor_class",
            Some(json!(16)),
            Some(json!(18)),
        );
        assert_eq!(
            CausationRule::EquipmentChange.assess(&trigger, &ac, &BatchFacts::default()),
            Some(Signal::ExactDelta)
        );
    }

    #[test]
    fn test_unequipped_item_is_not_a_trigger() {
        let rope = change(
            ChangeCategory::Inventory,
            "inventory.Rope",
            None,
            Some(json!({"name": "Rope", "quantity": 1, "equipped": false})),
        );
        assert!(CausationRule::EquipmentChange.trigger(&rope).is_none());
    }

    #[test]
    fn test_dexterity_modifier_drives_initiative() {
        let dex = change(
            ChangeCategory::AbilityScores,
            "ability_scores.dexterity",
            Some(json!(14)),
            Some(json!(16)),
        );
        let trigger = CausationRule::AbilityScoreChange.trigger(&dex).unwrap();
        assert_eq!(trigger.name, "Dexterity");
        assert_eq!(
            CausationRule::AbilityScoreChange.assess(&trigger, &initiative(2, 3), &BatchFacts::default()),
            Some(Signal::ExactDelta)
        );

        let odd = change(
            ChangeCategory::AbilityScores,
            "ability_scores.dexterity",
            Some(json!(14)),
            Some(json!(15)),
        );
        let trigger = CausationRule::AbilityScoreChange.trigger(&odd).unwrap();
        assert!(CausationRule::AbilityScoreChange
            .assess(&trigger, &initiative(2, 3), &BatchFacts::default())
            .is_none());
    }

    #[test]
    fn test_multiclass_trigger() {
        let wizard = change(
            ChangeCategory::Progression,
            "classes.Wizard",
            None,
            Some(json!({"name": "Wizard", "level": 1})),
        );
        let trigger = CausationRule::Multiclass.trigger(&wizard).unwrap();
        assert_eq!(trigger.name, "Wizard");
        let ability = change(
            ChangeCategory::Spellcasting,
            "spellcasting.ability",
            None,
            Some(json!("intelligence")),
        );
        assert_eq!(
            CausationRule::Multiclass.assess(&trigger, &ability, &BatchFacts::default()),
            Some(Signal::Directional)
        );
    }

    #[test]
    fn test_rule_rank_follows_order() {
        for (i, rule) in CausationRule::ORDERED.iter().enumerate() {
            assert_eq!(rule.rank(), i);
        }
    }
}
