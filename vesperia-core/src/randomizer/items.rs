use std::collections::BTreeSet;

use crate::layout::ItemEntry;
use crate::patch::{subset, ItemsPatch};
use crate::randomizer::percent;
use crate::rng::RandomSource;
use crate::tables::GameData;
use crate::Result;

/// Chance of filling skill slot 1, 2 and 3, each only if the previous
/// slot was filled.
const SKILL_SLOT_ODDS: [f64; 3] = [0.96, 0.875, 0.61];
const WEAPON: u32 = 3;
const SUB_ITEM: u32 = 4;
const EMPTY_SLOT_LP: u32 = 100;

const PATCHED_FIELDS: &[&str] = &[
    "id", "buy_price", "skill1", "skill1_lp", "skill2", "skill2_lp", "skill3", "skill3_lp",
];

fn skill_slot(item: &mut ItemEntry, slot: usize) -> (&mut u32, &mut u32) {
    match slot {
        0 => (&mut item.skill1, &mut item.skill1_lp),
        1 => (&mut item.skill2, &mut item.skill2_lp),
        2 => (&mut item.skill3, &mut item.skill3_lp),
        _ => panic!("skill slot {slot} does not exist"),
    }
}

/// Skills any of the item's users can learn, sorted.
fn eligible_skills(item: &ItemEntry, data: &GameData) -> Vec<u32> {
    item.usable_by()
        .into_iter()
        .flat_map(|character| data.skills_of(character).iter().copied())
        .collect::<BTreeSet<u32>>()
        .into_iter()
        .collect()
}

pub fn randomize_items(data: &GameData, rng: &mut RandomSource) -> Result<ItemsPatch> {
    log::info!("> Randomizing Items...");
    let (mut candidates, mut price, mut skills) = (0, 0, 0);
    let mut patch = ItemsPatch::default();

    for original in &data.items {
        if rng.random() <= 0.05 {
            continue;
        }
        candidates += 1;
        let mut item = *original;

        if item.buy_price != 0 && rng.random() <= 0.95 {
            price += 1;
            let factor = rng.randrange_step(25, 200, 5) as f64 / 100.0;
            item.buy_price = (item.buy_price as f64 * factor) as u32;
        }

        if item.category == WEAPON || item.category == SUB_ITEM {
            skills += 1;
            let pool = eligible_skills(&item, data);

            let mut continuing = true;
            for (slot, odds) in SKILL_SLOT_ODDS.iter().enumerate() {
                let rolled = if continuing && rng.random() < *odds {
                    let skill = rng.choice("item skills", &pool)?;
                    Some((skill, rng.randrange_step(10, 100, 10) as u32))
                } else {
                    continuing = false;
                    None
                };
                let (skill, lp) = skill_slot(&mut item, slot);
                (*skill, *lp) = rolled.unwrap_or((0, EMPTY_SLOT_LP));
            }
        }

        patch.base.insert(item.entry, subset(&item, PATCHED_FIELDS)?);
    }

    log::info!("--- Items Results -------------------");
    log::info!("Total Items: {}", data.items.len());
    log::info!("Randomized: {candidates} ({:.2}%)", percent(candidates, data.items.len()));
    log::info!("Randomized Price: {price} ({:.2}%)", percent(price, candidates));
    log::info!("Randomized Skills: {skills} ({:.2}%)", percent(skills, candidates));

    Ok(patch)
}
