use std::collections::{BTreeMap, BTreeSet};

use crate::patch::ShopsPatch;
use crate::randomizer::percent;
use crate::rng::RandomSource;
use crate::tables::{GameData, ShopGroup};
use crate::Result;

const CONSUMABLE: u32 = 2;
/// Above 1, so the roll always passes.
const ALWAYS: f64 = 2.0;

#[derive(Default)]
struct Stats {
    total: usize,
    candidates: usize,
    same_category: usize,
    full_random: usize,
}

struct ShopRandomizer<'a> {
    data: &'a GameData,
    common: BTreeSet<u32>,
    stats: Stats,
}

impl<'a> ShopRandomizer<'a> {
    fn new(data: &'a GameData) -> Self {
        Self {
            data,
            common: data.common_items.iter().copied().collect(),
            stats: Stats::default(),
        }
    }

    /// Rerolls one item. Items already on the shelf always get rerolled to
    /// something that is not.
    fn reroll(&mut self, item: u32, blacklist: &BTreeSet<u32>, rng: &mut RandomSource) -> Result<u32> {
        self.stats.total += 1;
        let category = self.data.category_of(item).unwrap_or_default();
        let listed = blacklist.contains(&item);

        // Consumables are rarely touched unless they would repeat.
        let (candidacy, same_category) = match (category == CONSUMABLE, listed) {
            (true, true) => (ALWAYS, ALWAYS),
            (true, false) => (0.3, 0.4),
            (false, true) => (ALWAYS, 0.25),
            (false, false) => (0.9, 0.25),
        };

        if rng.random() > candidacy {
            return Ok(item);
        }
        self.stats.candidates += 1;

        let same: Vec<u32> = self
            .data
            .items_in_category(category)
            .iter()
            .filter(|id| !blacklist.contains(id))
            .copied()
            .collect::<BTreeSet<u32>>()
            .into_iter()
            .collect();
        if !same.is_empty() && rng.random() <= same_category {
            self.stats.same_category += 1;
            return rng.choice("same category shop items", &same);
        }

        self.stats.full_random += 1;
        let any: Vec<u32> = self.common.difference(blacklist).copied().collect();
        rng.choice("shop items", &any)
    }

    fn reroll_list(&mut self, items: &[u32], shelved: &[u32], rng: &mut RandomSource) -> Result<Vec<u32>> {
        let mut rolled = Vec::with_capacity(items.len());
        for &item in items {
            // Dummy, key and DLC items stay where they are.
            if !self.common.contains(&item) {
                rolled.push(item);
                continue;
            }
            let blacklist: BTreeSet<u32> = rolled.iter().chain(shelved).copied().collect();
            let new_item = self.reroll(item, &blacklist, rng)?;
            rolled.push(new_item);
        }
        Ok(rolled)
    }
}

pub fn randomize_shops(data: &GameData, rng: &mut RandomSource) -> Result<ShopsPatch> {
    log::info!("> Randomizing Shop Items...");
    let mut randomizer = ShopRandomizer::new(data);
    let mut shelves: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    let mut patch = ShopsPatch::default();

    for group in &data.shops.commons {
        let shelved = group
            .shops
            .first()
            .and_then(|shop| shelves.get(shop))
            .cloned()
            .unwrap_or_default();
        let items = randomizer.reroll_list(&group.items, &shelved, rng)?;

        for shop in &group.shops {
            shelves.entry(*shop).or_default().extend(&items);
        }
        patch.commons.push(ShopGroup { shops: group.shops.clone(), items });
    }

    for (&shop, items) in &data.shops.uniques {
        let shelved = shelves.get(&shop).cloned().unwrap_or_default();
        let items = randomizer.reroll_list(items, &shelved, rng)?;
        patch.uniques.insert(shop, items);
    }

    let stats = &randomizer.stats;
    log::info!("--- Shop Items Results -------------------");
    log::info!("Total Shop Items: {}", stats.total);
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

    Ok(patch)
}
