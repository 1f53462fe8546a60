//! Turns the reference tables and a seed into a patch document.
//!
//! Every domain draws from the same [`RandomSource`], in the fixed target
//! order, so a seed reproduces its document exactly.

pub mod artes;
pub mod chests;
pub mod items;
pub mod search;
pub mod shops;
pub mod skills;

use crate::patch::PatchDocument;
use crate::rng::RandomSource;
use crate::tables::GameData;
use crate::{resolve_targets, RandomizerSettings, Result, Target};

pub fn randomize(settings: &RandomizerSettings) -> Result<PatchDocument> {
    let targets = resolve_targets(&settings.targets);
    let data = GameData::load(&settings.data_dir, &targets)?;
    generate(&data, settings.seed, &settings.player, &targets)
}

/// Builds a document for `targets` from already loaded tables.
pub fn generate(data: &GameData, seed: u64, player: &str, targets: &[Target]) -> Result<PatchDocument> {
    let mut rng = RandomSource::new(seed);
    let mut document = PatchDocument::new(seed, player);

    for target in resolve_targets(targets) {
        match target {
            Target::Artes => document.artes = Some(artes::randomize_artes(data, &mut rng)?),
            Target::Skills => document.skills = Some(skills::randomize_skills(data, &mut rng)?),
            Target::Items => document.items = Some(items::randomize_items(data, &mut rng)?),
            Target::Shops => document.shops = Some(shops::randomize_shops(data, &mut rng)?),
            Target::Chests => document.chests = Some(chests::randomize_chests(data, &mut rng)?),
            Target::Search => document.search = Some(search::randomize_search_points(data, &mut rng)?),
        }
    }
    Ok(document)
}

/// Percentage for the statistics summaries; zero when there is nothing to
/// divide by.
pub(crate) fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
