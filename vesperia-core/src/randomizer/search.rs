use serde_json::json;

use crate::layout::SearchPointItemEntry;
use crate::patch::{RecordPatch, SearchPatch};
use crate::rng::RandomSource;
use crate::tables::GameData;
use crate::Result;

/// Points in the rebuilt table, not counting the two mirrored ones.
pub const SEARCH_POINTS: usize = 88;
const TREASURE: u32 = 9;
const TREASURE_ODDS: f64 = 0.7;

fn record(value: serde_json::Value) -> RecordPatch {
    match value {
        serde_json::Value::Object(map) => map,
        _ => RecordPatch::new(),
    }
}

fn search_item(data: &GameData, rng: &mut RandomSource) -> Result<u32> {
    if rng.random() <= TREASURE_ODDS {
        rng.choice("treasure items", data.items_in_category(TREASURE))
    } else {
        rng.choice("search point items", &data.common_items)
    }
}

/// Generates a whole new search point table. Every point gets between one and
/// five pools, each holding one to five items.
pub fn randomize_search_points(data: &GameData, rng: &mut RandomSource) -> Result<SearchPatch> {
    log::info!("> Randomizing Search Points Items...");
    let mut patch = SearchPatch { guarantee: true, ..SearchPatch::default() };
    let mut pools_per_point = Vec::with_capacity(SEARCH_POINTS);
    let mut items_per_pool = Vec::new();

    for _ in 0..SEARCH_POINTS {
        let content_range = rng.triangular_low(1, 5);
        patch.definitions.push(record(json!({
            "type": rng.randint(0, 3),
            "content_range": content_range,
            "max_use": rng.triangular_low(1, 5),
        })));

        let ranges: Vec<i64> = (0..content_range).map(|_| rng.randint(1, 5)).collect();
        for &item_range in &ranges {
            patch.contents.push(record(json!({
                "item_range": item_range,
                "chance": rng.triangular_high(1, 10) * 10,
            })));
        }

        for _ in 0..ranges.iter().sum::<i64>() {
            let id = search_item(data, rng)?;
            let count = rng.triangular_low(1, 15) as u32;
            patch.items.push(SearchPointItemEntry { id, count });
        }

        pools_per_point.push(content_range as usize);
        items_per_pool.extend(ranges.into_iter().map(|range| range as usize));
    }

    let average = |counts: &[usize]| counts.iter().sum::<usize>() as f64 / counts.len().max(1) as f64;
    log::info!("--- Search Point Results -------------------");
    log::info!("Total Item Pools: {}", patch.contents.len());
    log::info!("Total Items: {}", patch.items.len());
    log::info!("Average Item Pools per Search Point: {:.2}", average(&pools_per_point));
    log::info!("Average Items per Item Pool: {:.2}", average(&items_per_pool));

    Ok(patch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tables::fixtures::game_data;

    fn field(patch: &RecordPatch, name: &str) -> i64 {
        patch[name].as_i64().unwrap()
    }

    #[test]
    fn sections_agree_on_their_counts() {
        let data = game_data();
        let patch = randomize_search_points(&data, &mut RandomSource::new(42)).unwrap();
        assert!(patch.guarantee);
        assert_eq!(patch.definitions.len(), SEARCH_POINTS);

        let pools: i64 = patch.definitions.iter().map(|d| field(d, "content_range")).sum();
        assert_eq!(patch.contents.len() as i64, pools);
        let items: i64 = patch.contents.iter().map(|c| field(c, "item_range")).sum();
        assert_eq!(patch.items.len() as i64, items);
    }

    #[test]
    fn generated_values_stay_in_range() {
        let data = game_data();
        for seed in 0..20 {
            let patch = randomize_search_points(&data, &mut RandomSource::new(seed)).unwrap();
            for definition in &patch.definitions {
                assert!((0..=3).contains(&field(definition, "type")));
                assert!((1..=5).contains(&field(definition, "content_range")));
                assert!((1..=5).contains(&field(definition, "max_use")));
            }
            for content in &patch.contents {
                let chance = field(content, "chance");
                assert!((10..=100).contains(&chance) && chance % 10 == 0);
            }
            for item in &patch.items {
                assert!(data.common_items.contains(&item.id));
                assert!((1..=15).contains(&item.count));
            }
        }
    }

    #[test]
    fn generated_table_applies_to_an_archive() {
        use crate::patcher::search::{patch_search_points, tests::search_file};

        let data = game_data();
        let mut patch = randomize_search_points(&data, &mut RandomSource::new(9)).unwrap();
        patch.definitions.truncate(2);
        let pools: usize = patch.definitions.iter().map(|d| field(d, "content_range") as usize).sum();
        patch.contents.truncate(pools);
        let items: usize = patch.contents.iter().map(|c| field(c, "item_range") as usize).sum();
        patch.items.truncate(items);

        let mut archive = search_file(4);
        let header = patch_search_points(&mut archive, &patch).unwrap();
        assert_eq!(header.definition_entries, 4);
    }
}
