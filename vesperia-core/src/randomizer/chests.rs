use std::collections::BTreeSet;

use crate::patch::ChestsPatch;
use crate::randomizer::percent;
use crate::rng::RandomSource;
use crate::tables::{is_common_category, ChestItem, GameData};
use crate::Result;

/// Item id the chest tables use for money.
pub const GALD: u32 = 0xFFFF_FFFE;

const CANDIDACY: f64 = 0.85;
/// Above 1, so the roll always passes.
const ALWAYS: f64 = 2.0;
const SAME_CATEGORY: f64 = 0.2;
const GALD_STAYS_GALD: f64 = 0.85;
const AMOUNT_ODDS: f64 = 0.1;

#[derive(Default)]
struct Stats {
    total: usize,
    candidates: usize,
    same_category: usize,
    full_random: usize,
    gald: usize,
    amount: usize,
}

/// Rescales a gald amount: most of the time either by 0.1..1.4 (only for
/// amounts above 100) or by 2..9.
pub fn randomize_gald(amount: u32, rng: &mut RandomSource) -> u32 {
    if rng.random() > 0.9 {
        return amount;
    }
    if rng.random() <= 0.5 && amount > 100 {
        let tenths = rng.randrange(1, 15) as u64;
        (amount as u64 * tenths).div_ceil(10) as u32
    } else {
        amount.saturating_mul(rng.randrange(2, 10) as u32)
    }
}

struct ChestRandomizer<'a> {
    data: &'a GameData,
    eligible: Vec<u32>,
    stats: Stats,
}

impl<'a> ChestRandomizer<'a> {
    fn new(data: &'a GameData) -> Self {
        let mut eligible = data.common_items.clone();
        eligible.push(GALD);
        Self { data, eligible, stats: Stats::default() }
    }

    fn is_candidate(&self, item_id: u32) -> bool {
        item_id == GALD || is_common_category(self.data.category_of(item_id).unwrap_or_default())
    }

    /// Picks from `pool` minus what the chest already holds. Gald can appear
    /// any number of times.
    fn pick(
        &self,
        what: &str,
        pool: &[u32],
        in_chest: &BTreeSet<u32>,
        rng: &mut RandomSource,
    ) -> Result<u32> {
        let open: Vec<u32> = pool
            .iter()
            .filter(|id| **id == GALD || !in_chest.contains(id))
            .copied()
            .collect();
        rng.choice(what, &open)
    }

    fn reroll(&mut self, item: ChestItem, in_chest: &BTreeSet<u32>, rng: &mut RandomSource) -> Result<ChestItem> {
        self.stats.total += 1;
        let is_gald = item.item_id == GALD;
        let listed = !is_gald && in_chest.contains(&item.item_id);
        let candidacy = if listed { ALWAYS } else { CANDIDACY };
        let same_category = if is_gald { GALD_STAYS_GALD } else { SAME_CATEGORY };
        let mut rolled = item;

        if rng.random() <= candidacy {
            self.stats.candidates += 1;
            if rng.random() <= same_category {
                // Gald has no category to stay within.
                if !is_gald {
                    let category = self.data.category_of(item.item_id).unwrap_or_default();
                    let pool = self.data.items_in_category(category);
                    if pool.iter().any(|id| !in_chest.contains(id)) {
                        self.stats.same_category += 1;
                        rolled.item_id = self.pick("same category chest items", pool, in_chest, rng)?;
                    } else if listed {
                        self.stats.full_random += 1;
                        rolled.item_id = self.pick("chest items", &self.eligible, in_chest, rng)?;
                    }
                }
            } else {
                self.stats.full_random += 1;
                rolled.item_id = self.pick("chest items", &self.eligible, in_chest, rng)?;
            }
        }

        if rolled.item_id != GALD && rng.random() <= AMOUNT_ODDS {
            self.stats.amount += 1;
            rolled.amount = rng.randrange(1, 15) as u32;
        } else if rolled.item_id == GALD {
            self.stats.gald += 1;
            rolled.amount = randomize_gald(rolled.amount, rng);
        }
        Ok(rolled)
    }
}

pub fn randomize_chests(data: &GameData, rng: &mut RandomSource) -> Result<ChestsPatch> {
    log::info!("> Randomizing Chest Items...");
    let mut randomizer = ChestRandomizer::new(data);
    let mut patch = ChestsPatch::new();

    for (area, chests) in &data.chests {
        let area_patch = patch.entry(area.clone()).or_default();
        for (&chest_id, items) in chests {
            let mut rolled = Vec::with_capacity(items.len());
            for &item in items {
                if !randomizer.is_candidate(item.item_id) {
                    rolled.push(item);
                    continue;
                }
                let in_chest: BTreeSet<u32> = rolled.iter().map(|placed: &ChestItem| placed.item_id).collect();
                rolled.push(randomizer.reroll(item, &in_chest, rng)?);
            }
            area_patch.insert(chest_id, rolled);
        }
    }

    let stats = &randomizer.stats;
    log::info!("--- Chests Results -------------------");
    log::info!("Total Chest Items: {}", stats.total);
    log::info!("Randomized: {} ({:.2}%)", stats.candidates, percent(stats.candidates, stats.total));
    log::info!(
        "Randomized by Same Category: {} ({:.2}%)",
        stats.same_category,
        percent(stats.same_category, stats.candidates)
    );
    log::info!(
        "Randomized against any Item: {} ({:.2}%)",
        stats.full_random,
        percent(stats.full_random, stats.candidates)
    );
    log::info!("Randomized Amount: {} ({:.2}%)", stats.amount, percent(stats.amount, stats.candidates));
    log::info!("Randomized Gald: {} ({:.2}%)", stats.gald, percent(stats.gald, stats.candidates));

    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::fixtures::game_data;

    #[test]
    fn gald_rescale_stays_in_its_regimes() {
        for seed in 0..200 {
            let scaled = randomize_gald(500, &mut RandomSource::new(seed));
            let tenths = scaled % 50 == 0 && (50..=700).contains(&scaled);
            let multiple = scaled % 500 == 0 && (1000..=4500).contains(&scaled);
            assert!(scaled == 500 || tenths || multiple, "seed {seed}: {scaled}");

            // Small amounts only ever multiply.
            let small = randomize_gald(80, &mut RandomSource::new(seed));
            assert!(small == 80 || (small % 80 == 0 && (160..=720).contains(&small)));
        }
    }

    #[test]
    fn chests_keep_their_shape() {
        let data = game_data();
        let patch = randomize_chests(&data, &mut RandomSource::new(3)).unwrap();
        let area = &patch["CAS_R1"];
        assert_eq!(area.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(area[&1].len(), 1);
        assert_eq!(area[&2].len(), 2);
    }

    #[test]
    fn rolled_items_are_eligible_and_distinct() {
        let data = game_data();
        for seed in 0..300 {
            let patch = randomize_chests(&data, &mut RandomSource::new(seed)).unwrap();
            for chest in patch["CAS_R1"].values() {
                let mut seen = BTreeSet::new();
                for item in chest {
                    assert!(
                        item.item_id == GALD
                            || data.common_items.contains(&item.item_id)
                            || data.key_items.contains(&item.item_id),
                        "seed {seed}: {}",
                        item.item_id
                    );
                    assert!(item.item_id == GALD || seen.insert(item.item_id), "seed {seed}: repeat");
                    assert!(item.amount > 0);
                }
            }
        }
    }

    #[test]
    fn key_items_are_left_alone() {
        let mut data = game_data();
        data.chests.get_mut("CAS_R1").unwrap().insert(3, vec![ChestItem { item_id: 40, amount: 1 }]);
        for seed in 0..50 {
            let patch = randomize_chests(&data, &mut RandomSource::new(seed)).unwrap();
            assert_eq!(patch["CAS_R1"][&3], vec![ChestItem { item_id: 40, amount: 1 }]);
        }
    }
}
