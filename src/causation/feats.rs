//! Known mechanical effects of common feats

/// One mechanical effect a feat has on the character sheet
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeatEffect {
    /// Flat bonus to initiative
    Initiative(f64),
    /// Extra maximum hit points per character level
    HitPointsPerLevel(f64),
    /// Flat bonus to walking speed
    Speed(f64),
    /// Flat bonus to armor class
    ArmorClass(f64),
    /// +1 to one of the listed abilities (empty means any ability)
    AbilityIncrease(&'static [&'static str]),
    /// +2 to one ability or +1 to two
    AbilityScoreImprovement,
    /// Grants spells known
    Spells,
    /// Grants skill or tool proficiencies
    Skills,
    /// Grants armor proficiencies
    Armor,
}

#[derive(Debug, Clone, Copy)]
pub struct FeatProfile {
    pub name: &'static str,
    pub effects: &'static [FeatEffect],
}

const STR_DEX: &[&str] = &["strength", "dexterity"];
const STR_CON: &[&str] = &["strength", "constitution"];
const INT_WIS: &[&str] = &["intelligence", "wisdom"];
const MENTAL: &[&str] = &["intelligence", "wisdom", "charisma"];
const ANY: &[&str] = &[];

use FeatEffect::*;

const FEATS: &[FeatProfile] = &[
    FeatProfile { name: "Alert", effects: &[Initiative(5.0)] },
    FeatProfile { name: "Tough", effects: &[HitPointsPerLevel(2.0)] },
    FeatProfile { name: "Mobile", effects: &[Speed(10.0)] },
    FeatProfile { name: "Dual Wielder", effects: &[ArmorClass(1.0)] },
    FeatProfile { name: "Ability Score Improvement", effects: &[AbilityScoreImprovement] },
    FeatProfile { name: "Resilient", effects: &[AbilityIncrease(ANY)] },
    FeatProfile { name: "Athlete", effects: &[AbilityIncrease(STR_DEX)] },
    FeatProfile { name: "Observant", effects: &[AbilityIncrease(INT_WIS)] },
    FeatProfile { name: "Actor", effects: &[AbilityIncrease(&["charisma"])] },
    FeatProfile { name: "Durable", effects: &[AbilityIncrease(&["constitution"])] },
    FeatProfile { name: "Keen Mind", effects: &[AbilityIncrease(&["intelligence"])] },
    FeatProfile { name: "Linguist", effects: &[AbilityIncrease(&["intelligence"]), Skills] },
    FeatProfile { name: "Heavy Armor Master", effects: &[AbilityIncrease(&["strength"])] },
    FeatProfile { name: "Heavily Armored", effects: &[AbilityIncrease(&["strength"]), Armor] },
    FeatProfile { name: "Moderately Armored", effects: &[AbilityIncrease(STR_DEX), Armor] },
    FeatProfile { name: "Lightly Armored", effects: &[AbilityIncrease(STR_DEX), Armor] },
    FeatProfile { name: "Tavern Brawler", effects: &[AbilityIncrease(STR_CON)] },
    FeatProfile { name: "Crusher", effects: &[AbilityIncrease(STR_CON)] },
    FeatProfile { name: "Piercer", effects: &[AbilityIncrease(STR_DEX)] },
    FeatProfile { name: "Slasher", effects: &[AbilityIncrease(STR_DEX)] },
    FeatProfile { name: "Weapon Master", effects: &[AbilityIncrease(STR_DEX)] },
    FeatProfile { name: "Chef", effects: &[AbilityIncrease(&["constitution", "wisdom"])] },
    FeatProfile { name: "Fey Touched", effects: &[AbilityIncrease(MENTAL), Spells] },
    FeatProfile { name: "Shadow Touched", effects: &[AbilityIncrease(MENTAL), Spells] },
    FeatProfile { name: "Telekinetic", effects: &[AbilityIncrease(MENTAL), Spells] },
    FeatProfile { name: "Telepathic", effects: &[AbilityIncrease(MENTAL), Spells] },
    FeatProfile { name: "Skill Expert", effects: &[AbilityIncrease(ANY), Skills] },
    FeatProfile { name: "Magic Initiate", effects: &[Spells] },
    FeatProfile { name: "Ritual Caster", effects: &[Spells] },
    FeatProfile { name: "Spell Sniper", effects: &[Spells] },
    FeatProfile { name: "Skilled", effects: &[Skills] },
];

/// Looks up a feat by name, ignoring case and surrounding whitespace.
///
/// Names with a parenthesized choice ("Magic Initiate (Wizard)") match on
/// the part before the parenthesis.
pub fn lookup(name: &str) -> Option<&'static FeatProfile> {
    let base = name.split('(').next().unwrap_or(name).trim();
    FEATS.iter().find(|f| f.name.eq_ignore_ascii_case(base))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let alert = lookup("alert").unwrap();
        assert_eq!(alert.effects, &[Initiative(5.0)]);
        assert!(lookup("  TOUGH ").is_some());
        assert!(lookup("Magic Initiate (Wizard)").is_some());
        assert!(lookup("Homebrew Feat").is_none());
    }

    #[test]
    fn test_names_are_unique() {
        for (i, a) in FEATS.iter().enumerate() {
            for b in &FEATS[i + 1..] {
                assert!(!a.name.eq_ignore_ascii_case(b.name), "duplicate {}", a.name);
            }
        }
    }
}
