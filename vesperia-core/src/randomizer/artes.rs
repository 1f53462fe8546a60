use crate::layout::ArteEntryHead;
use crate::patch::{subset, EntryPatches};
use crate::randomizer::percent;
use crate::rng::RandomSource;
use crate::tables::{is_character_arte, GameData};
use crate::Result;

/// Chance that the evolve chain continues past slot `n`.
const EVOLVE_ODDS: [f64; 5] = [0.0, 0.0258, 0.0041, 0.0005, 0.005];
/// Chance that the learn chain continues past slot `n`. Slots 1 and 2 also
/// decide whether the chain is rewritten at all.
const LEARN_ODDS: [f64; 5] = [0.0, 0.75, 0.042, 0.8, 0.077];
/// Weights of the arte-usage and equip-skill conditions per learn slot.
const LEARN_TYPE_ODDS: [[f64; 2]; 5] = [[0.0, 0.0], [0.35, 0.05], [0.005, 0.005], [0.75, 0.05], [0.5, 0.5]];
const LEVEL_WEIGHT: f64 = 0.6;

const LEARN_LEVEL: u32 = 1;
const LEARN_ARTE_USAGE: u32 = 2;
const EQUIP_SKILL: u32 = 3;

const PATCHED_FIELDS: &[&str] = &[
    "name_string_key", "id", "tp_cost", "cast_time",
    "learn_condition1", "learn_condition2", "learn_condition3",
    "learn_condition4", "learn_condition5", "learn_condition6",
    "learn_parameter1", "learn_parameter2", "learn_parameter3",
    "learn_parameter4", "learn_parameter5", "learn_parameter6",
    "unknown3", "unknown4", "unknown5", "unknown6", "unknown7", "unknown8",
    "evolve_base",
    "evolve_condition1", "evolve_condition2", "evolve_condition3", "evolve_condition4",
    "evolve_parameter1", "evolve_parameter2", "evolve_parameter3", "evolve_parameter4",
    "fatal_strike_type",
];

/// Condition, parameter and meta value of a learn slot (1-6).
fn learn_slot(arte: &mut ArteEntryHead, slot: usize) -> (&mut u32, &mut u32, &mut u32) {
    match slot {
        1 => (&mut arte.learn_condition1, &mut arte.learn_parameter1, &mut arte.unknown3),
        2 => (&mut arte.learn_condition2, &mut arte.learn_parameter2, &mut arte.unknown4),
        3 => (&mut arte.learn_condition3, &mut arte.learn_parameter3, &mut arte.unknown5),
        4 => (&mut arte.learn_condition4, &mut arte.learn_parameter4, &mut arte.unknown6),
        5 => (&mut arte.learn_condition5, &mut arte.learn_parameter5, &mut arte.unknown7),
        6 => (&mut arte.learn_condition6, &mut arte.learn_parameter6, &mut arte.unknown8),
        _ => panic!("learn slot {slot} does not exist"),
    }
}

/// Condition and parameter of an evolve slot (1-4).
fn evolve_slot(arte: &mut ArteEntryHead, slot: usize) -> (&mut u32, &mut u32) {
    match slot {
        1 => (&mut arte.evolve_condition1, &mut arte.evolve_parameter1),
        2 => (&mut arte.evolve_condition2, &mut arte.evolve_parameter2),
        3 => (&mut arte.evolve_condition3, &mut arte.evolve_parameter3),
        4 => (&mut arte.evolve_condition4, &mut arte.evolve_parameter4),
        _ => panic!("evolve slot {slot} does not exist"),
    }
}

/// Scales by a factor in `[0.10, 2.00)`, rounding up.
fn rescale(value: u32, rng: &mut RandomSource) -> u32 {
    (value as f64 * (rng.randrange(10, 200) as f64 * 0.01)).ceil() as u32
}

fn randomize_learn(
    arte: &mut ArteEntryHead,
    character: u32,
    slot: usize,
    data: &GameData,
    rng: &mut RandomSource,
) -> Result<()> {
    let [usage_weight, skill_weight] = LEARN_TYPE_ODDS[slot];
    let condition = if slot <= 1 {
        rng.weighted(
            &[LEARN_LEVEL, LEARN_ARTE_USAGE, EQUIP_SKILL],
            &[LEVEL_WEIGHT, usage_weight, skill_weight],
        )
    } else {
        rng.weighted(&[LEARN_ARTE_USAGE, EQUIP_SKILL], &[usage_weight, skill_weight])
    };

    let (parameter, meta) = match condition {
        LEARN_LEVEL => {
            let cap = rng.randint(5, 20);
            (rng.randint(1, cap) as u32, 0)
        }
        LEARN_ARTE_USAGE => {
            let arte_id = rng.choice("character artes", data.artes_of(character))?;
            let uses = (10.0 * (rng.randrange(10, 200) as f64 / 100.0)).ceil() as u32;
            (arte_id, uses)
        }
        _ => (rng.choice("character skills", data.skills_of(character))?, 0),
    };

    let (slot_condition, slot_parameter, slot_meta) = learn_slot(arte, slot);
    *slot_condition = condition;
    *slot_parameter = parameter;
    *slot_meta = meta;
    Ok(())
}

#[derive(Default)]
struct Stats {
    total: usize,
    candidates: usize,
    tp: usize,
    cast: usize,
    fatal_strike: usize,
    evolve: usize,
    learn: usize,
}

pub fn randomize_artes(data: &GameData, rng: &mut RandomSource) -> Result<EntryPatches> {
    log::info!("> Randomizing Artes...");
    let mut stats = Stats::default();
    let mut patches = EntryPatches::new();

    for original in data.artes.iter().filter(|arte| is_character_arte(arte)) {
        stats.total += 1;
        if rng.random() <= 0.05 {
            continue;
        }
        stats.candidates += 1;

        let mut arte = original.head;
        let character = original.first_character().unwrap_or_default();

        if rng.random() <= 0.4 {
            stats.tp += 1;
            arte.tp_cost = rescale(arte.tp_cost, rng);
        }

        if arte.cast_time > 0 && rng.random() >= 0.3 {
            stats.cast += 1;
            arte.cast_time = rescale(arte.cast_time, rng);
        }

        if rng.random() <= 0.75 {
            stats.fatal_strike += 1;
            arte.fatal_strike_type = rng.randrange(0, 3) as u32;
        }

        // Only artes that already evolve get a new chain; the evolve base
        // itself is left alone.
        let has_evolve = arte.evolve_base != 0;
        let mut evolve_rewritten = false;
        if has_evolve {
            if rng.random() <= 0.258 {
                stats.evolve += 1;
                evolve_rewritten = true;

                let mut continuing = true;
                for slot in 1..EVOLVE_ODDS.len() {
                    let skill = if continuing {
                        Some(rng.choice("character skills", data.skills_of(character))?)
                    } else {
                        None
                    };
                    let (condition, parameter) = evolve_slot(&mut arte, slot);
                    match skill {
                        Some(skill) => {
                            *condition = EQUIP_SKILL;
                            *parameter = skill;
                        }
                        None => {
                            *condition = 0;
                            *parameter = 0;
                        }
                    }

                    if continuing && rng.random() > EVOLVE_ODDS[slot] {
                        continuing = false;
                    }
                }

                let usage = rng.randrange(5, 20) as u32;
                if rng.random() <= 0.4 {
                    // Result unused, but the draw is part of the sequence.
                    rng.randrange(10, 100);
                }
                arte.learn_condition1 = LEARN_ARTE_USAGE;
                arte.learn_parameter1 = arte.id;
                arte.unknown3 = usage;
            } else {
                arte.unknown3 = rng.randrange(5, 20) as u32;
            }
        }

        if rng.random() < LEARN_ODDS[usize::from(has_evolve) + 1] {
            stats.learn += 1;

            let mut continuing = true;
            let first = if has_evolve { 2 } else { 1 };
            for slot in first..LEARN_ODDS.len() {
                if continuing {
                    randomize_learn(&mut arte, character, slot, data, rng)?;
                } else {
                    let (condition, parameter, meta) = learn_slot(&mut arte, slot);
                    *condition = 0;
                    *parameter = 0;
                    *meta = 0;
                }

                if continuing && rng.random() > LEARN_ODDS[slot] {
                    continuing = false;
                }
            }

            if has_evolve && !evolve_rewritten {
                arte.evolve_base = 0;
                for slot in 1..EVOLVE_ODDS.len() {
                    let (condition, parameter) = evolve_slot(&mut arte, slot);
                    *condition = 0;
                    *parameter = 0;
                }
            }
        }

        patches.insert(arte.entry, subset(&arte, PATCHED_FIELDS)?);
    }

    log::info!("--- Artes Results -------------------");
    log::info!("Total Artes: {}", stats.total);
    log::info!("Randomized: {} ({:.2}%)", stats.candidates, percent(stats.candidates, stats.total));
    log::info!("Randomized TP: {} ({:.2}%)", stats.tp, percent(stats.tp, stats.candidates));
    log::info!("Randomized Cast Time: {} ({:.2}%)", stats.cast, percent(stats.cast, stats.candidates));
    log::info!(
        "Randomized Fatal Strike Type: {} ({:.2}%)",
        stats.fatal_strike,
        percent(stats.fatal_strike, stats.candidates)
    );
    log::info!("Randomized Evolve Conditions: {} ({:.2}%)", stats.evolve, percent(stats.evolve, stats.candidates));
    log::info!("Randomized Learn Conditions: {} ({:.2}%)", stats.learn, percent(stats.learn, stats.candidates));

    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::RecordPatch;
    use crate::tables::fixtures::game_data;

    fn field(patch: &RecordPatch, name: &str) -> u32 {
        patch[name].as_u64().unwrap() as u32
    }

    fn evolving_data() -> GameData {
        let mut data = game_data();
        // 501 evolves from 500.
        let arte = &mut data.artes[1].head;
        arte.evolve_base = 500;
        arte.evolve_condition1 = 3;
        arte.evolve_parameter1 = 101;
        arte.learn_condition1 = 2;
        arte.learn_parameter1 = 500;
        data
    }

    #[test]
    fn only_character_artes_are_patched() {
        let data = game_data();
        for seed in 0..50 {
            let patches = randomize_artes(&data, &mut RandomSource::new(seed)).unwrap();
            for (entry, patch) in &patches {
                assert!([0, 1, 2].contains(entry), "entry {entry} is not a character arte");
                assert!(patch.keys().all(|key| PATCHED_FIELDS.contains(&key.as_str())));
                assert!(!patch.contains_key("can_evolve"));
            }
        }
    }

    #[test]
    fn costs_stay_within_scale() {
        let data = game_data();
        for seed in 0..50 {
            let patches = randomize_artes(&data, &mut RandomSource::new(seed)).unwrap();
            if let Some(patch) = patches.get(&1) {
                let tp = field(patch, "tp_cost");
                assert!((2..=40).contains(&tp), "tp {tp}");
                assert!(field(patch, "fatal_strike_type") < 3);
                assert!((1..=20).contains(&field(patch, "cast_time")));
            }
        }
    }

    #[test]
    fn conditions_reference_the_owning_character() {
        let data = evolving_data();
        for seed in 0..300 {
            let patches = randomize_artes(&data, &mut RandomSource::new(seed)).unwrap();
            for (entry, patch) in &patches {
                let character = data.artes[*entry as usize].first_character().unwrap();
                for slot in 1..=6 {
                    let parameter = field(patch, &format!("learn_parameter{slot}"));
                    match field(patch, &format!("learn_condition{slot}")) {
                        1 => assert!((1..=20).contains(&parameter)),
                        2 if slot == 1 && parameter == field(patch, "id") => {}
                        2 => {
                            assert!(data.artes_of(character).contains(&parameter));
                            let uses = field(patch, &format!("unknown{}", slot + 2));
                            assert!((1..=20).contains(&uses));
                        }
                        3 => assert!(data.skills_of(character).contains(&parameter)),
                        _ => {}
                    }
                }
                for slot in 1..=4 {
                    if field(patch, &format!("evolve_condition{slot}")) == 3 {
                        let skill = field(patch, &format!("evolve_parameter{slot}"));
                        assert!(data.skills_of(character).contains(&skill));
                    }
                }
            }
        }
    }

    #[test]
    fn evolve_chain_rules_hold() {
        let data = evolving_data();
        let (mut rewritten, mut cleared) = (0, 0);
        for seed in 0..400 {
            let patches = randomize_artes(&data, &mut RandomSource::new(seed)).unwrap();
            let Some(patch) = patches.get(&1) else { continue };

            if field(patch, "evolve_base") == 0 {
                cleared += 1;
                for slot in 1..=4 {
                    assert_eq!(field(patch, &format!("evolve_condition{slot}")), 0);
                    assert_eq!(field(patch, &format!("evolve_parameter{slot}")), 0);
                }
            } else if field(patch, "learn_parameter1") == 501 {
                rewritten += 1;
                assert_eq!(field(patch, "learn_condition1"), 2);
                assert_eq!(field(patch, "evolve_condition1"), 3);
                assert!((5..20).contains(&field(patch, "unknown3")));
            } else {
                assert_eq!(field(patch, "learn_parameter1"), 500);
                assert!((5..20).contains(&field(patch, "unknown3")));
            }
        }
        assert!(rewritten > 0);
        assert!(cleared > 0);
    }

    #[test]
    fn arte_without_skills_fails_loudly() {
        let mut data = evolving_data();
        data.skills_by_char.clear();
        let failed = (0..200).any(|seed| randomize_artes(&data, &mut RandomSource::new(seed)).is_err());
        assert!(failed);
    }
}
