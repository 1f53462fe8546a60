//! Read-only reference tables extracted from the game, and the indices
//! derived from them.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use crate::layout::{ArteEntry, ItemEntry, SkillEntry};
use crate::{Result, Target, VesperiaError};

pub const ARTES_FILE: &str = "artes.json";
pub const SKILLS_FILE: &str = "skills.json";
pub const ITEMS_FILE: &str = "item.json";
pub const SHOP_ITEMS_FILE: &str = "shop_items.json";
pub const CHESTS_FILE: &str = "chests.json";

/// Arte types that never belong to a playable character's list.
const NON_CHARACTER_ARTE_TYPES: [u32; 3] = [12, 14, 15];
pub const KEY_ITEM_CATEGORY: u32 = 10;

/// Shops that share one physical inventory across story progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopGroup {
    pub shops: Vec<u32>,
    pub items: Vec<u32>,
}

/// One original shop inventory row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopStock {
    pub shop_id: u32,
    pub item_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopTable {
    #[serde(default)]
    pub commons: Vec<ShopGroup>,
    #[serde(default)]
    pub uniques: BTreeMap<u32, Vec<u32>>,
    /// Every original row, including shops left out of the groupings.
    #[serde(default)]
    pub items: Vec<ShopStock>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChestItem {
    pub item_id: u32,
    pub amount: u32,
}

/// Map name -> chest id -> contents.
pub type ChestTable = BTreeMap<String, BTreeMap<u32, Vec<ChestItem>>>;

#[derive(Deserialize)]
struct ArtesFile {
    artes: Vec<ArteEntry>,
}

#[derive(Deserialize)]
struct SkillsFile {
    skills: Vec<SkillEntry>,
}

#[derive(Deserialize)]
struct ItemsFile {
    items: Vec<ItemEntry>,
}

fn read_table<T: DeserializeOwned>(data_dir: &Path, name: &str) -> Result<T> {
    let path = data_dir.join(name);
    if !path.is_file() {
        return Err(VesperiaError::Config(format!(
            "Reference table not found: {}",
            path.display()
        )));
    }
    let text = fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn load_shop_table(data_dir: &Path) -> Result<ShopTable> {
    read_table(data_dir, SHOP_ITEMS_FILE)
}

/// Arte that a playable character can learn and that costs TP.
pub fn is_character_arte(arte: &ArteEntry) -> bool {
    !NON_CHARACTER_ARTE_TYPES.contains(&arte.head.arte_type)
        && arte.character_ids.iter().any(|&c| c > 0 && c < 10)
        && arte.head.tp_cost > 0
}

/// Reference data plus derived indices, built once and shared read-only by
/// every randomizer.
#[derive(Debug, Default)]
pub struct GameData {
    pub artes: Vec<ArteEntry>,
    pub skills: Vec<SkillEntry>,
    pub items: Vec<ItemEntry>,
    pub shops: ShopTable,
    pub chests: ChestTable,

    pub artes_by_char: BTreeMap<u32, Vec<u32>>,
    pub skills_by_char: BTreeMap<u32, Vec<u32>>,
    pub item_category: HashMap<u32, u32>,
    pub items_by_category: BTreeMap<u32, Vec<u32>>,
    pub common_items: Vec<u32>,
    pub key_items: Vec<u32>,
}

impl GameData {
    /// Loads only the tables the targets need.
    pub fn load(data_dir: &Path, targets: &[Target]) -> Result<Self> {
        let wants = |target| targets.contains(&target);
        let needs_items = targets.iter().any(|t| *t != Target::Skills);

        let artes = if wants(Target::Artes) {
            read_table::<ArtesFile>(data_dir, ARTES_FILE)?.artes
        } else {
            Vec::new()
        };
        let skills = if wants(Target::Skills) {
            read_table::<SkillsFile>(data_dir, SKILLS_FILE)?.skills
        } else {
            Vec::new()
        };
        let items = if needs_items {
            read_table::<ItemsFile>(data_dir, ITEMS_FILE)?.items
        } else {
            Vec::new()
        };
        let shops = if wants(Target::Shops) {
            load_shop_table(data_dir)?
        } else {
            ShopTable::default()
        };
        let chests = if wants(Target::Chests) {
            read_table(data_dir, CHESTS_FILE)?
        } else {
            ChestTable::new()
        };

        let data = Self::from_tables(artes, skills, items, shops, chests);
        log::debug!(
            "loaded {} artes, {} skills, {} items, {} shop groups, {} chest maps",
            data.artes.len(),
            data.skills.len(),
            data.items.len(),
            data.shops.commons.len(),
            data.chests.len()
        );
        Ok(data)
    }

    pub fn from_tables(
        artes: Vec<ArteEntry>,
        skills: Vec<SkillEntry>,
        items: Vec<ItemEntry>,
        shops: ShopTable,
        chests: ChestTable,
    ) -> Self {
        let mut artes_by_char: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        for arte in artes.iter().filter(|arte| is_character_arte(arte)) {
            for &character in &arte.character_ids {
                artes_by_char.entry(character).or_default().push(arte.head.id);
            }
        }

        let mut skill_sets: BTreeMap<u32, BTreeSet<u32>> = BTreeMap::new();
        let mut item_category = HashMap::new();
        let mut items_by_category: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
        let mut common_items = Vec::new();
        let mut key_items = Vec::new();

        for item in &items {
            if item.character_usable != 0 {
                for character in item.usable_by() {
                    let owned = skill_sets.entry(character).or_default();
                    owned.extend(item.skills().into_iter().filter(|&skill| skill != 0));
                }
            }

            item_category.insert(item.id, item.category);
            items_by_category.entry(item.category).or_default().push(item.id);
            if is_common_category(item.category) {
                common_items.push(item.id);
            } else if item.category == KEY_ITEM_CATEGORY {
                key_items.push(item.id);
            }
        }

        let skills_by_char = skill_sets
            .into_iter()
            .filter(|(_, skills)| !skills.is_empty())
            .map(|(character, skills)| (character, skills.into_iter().collect()))
            .collect();

        Self {
            artes,
            skills,
            items,
            shops,
            chests,
            artes_by_char,
            skills_by_char,
            item_category,
            items_by_category,
            common_items,
            key_items,
        }
    }

    pub fn category_of(&self, item_id: u32) -> Option<u32> {
        self.item_category.get(&item_id).copied()
    }

    pub fn items_in_category(&self, category: u32) -> &[u32] {
        self.items_by_category
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn skills_of(&self, character: u32) -> &[u32] {
        self.skills_by_char
            .get(&character)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn artes_of(&self, character: u32) -> &[u32] {
        self.artes_by_char
            .get(&character)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Categories 2 through 9 hold regular obtainable items.
pub fn is_common_category(category: u32) -> bool {
    category > 1 && category < 10
}


#[cfg(test)]
mod tests {
    use super::fixtures::game_data;
    use super::*;

    #[test]
    fn arte_ownership_skips_enemy_and_free_artes() {
        let data = game_data();
        assert_eq!(data.artes_of(1), &[500, 501]);
        assert_eq!(data.artes_of(2), &[600]);
        assert!(data.artes_of(11).is_empty());
    }

    #[test]
    fn skills_follow_item_character_bits() {
        let data = game_data();
        assert_eq!(data.skills_of(1), &[101, 102, 103, 202]);
        assert_eq!(data.skills_of(2), &[103, 201, 202]);
        assert!(data.skills_of(3).is_empty());
    }

    #[test]
    fn items_are_partitioned_by_category() {
        let data = game_data();
        assert_eq!(data.items_in_category(2), &[10, 11, 12]);
        assert_eq!(data.key_items, vec![40]);
        assert!(!data.common_items.contains(&40));
        assert!(!data.common_items.contains(&50));
        assert!(data.common_items.contains(&20));
        assert_eq!(data.category_of(31), Some(5));
        assert_eq!(data.category_of(999), None);
    }

    #[test]
    fn load_only_reads_needed_tables() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(ITEMS_FILE),
            r#"{"items": [{"id": 20, "category": 9, "entry": 0}, {"id": 10, "category": 2, "entry": 1}]}"#,
        )
        .unwrap();

        let data = GameData::load(dir.path(), &[Target::Search]).unwrap();
        assert_eq!(data.items_in_category(9), &[20]);
        assert!(data.artes.is_empty());

        let err = GameData::load(dir.path(), &[Target::Artes]).unwrap_err();
        assert!(matches!(err, VesperiaError::Config(message) if message.contains(ARTES_FILE)));
    }

    #[test]
    fn shop_table_keys_are_integers() {
        let table: ShopTable = serde_json::from_str(
            r#"{"commons": [{"shops": [7, 9], "items": [1]}], "uniques": {"9": [2, 3]}}"#,
        )
        .unwrap();
        assert_eq!(table.uniques[&9], vec![2, 3]);
        assert!(table.items.is_empty());
    }
}
