//! The patch document exchanged between the randomizer and the patchers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::layout::{Record, SearchPointItemEntry};
use crate::tables::{ChestTable, ShopGroup, ShopStock};
use crate::{Result, VesperiaError};

pub const PATCH_VERSION: &str = "0.1";
pub const CREATED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Partial record: field name -> new value.
pub type RecordPatch = serde_json::Map<String, Value>;

/// Entry index -> partial record.
pub type EntryPatches = BTreeMap<u32, RecordPatch>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemsPatch {
    #[serde(default)]
    pub base: EntryPatches,
    /// Reserved for new items; carried through untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShopsPatch {
    #[serde(default)]
    pub commons: Vec<ShopGroup>,
    #[serde(default)]
    pub uniques: BTreeMap<u32, Vec<u32>>,
    /// Extra stock added on top of the groupings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<ShopStock>,
}

/// Map name -> chest id -> replacement contents.
pub type ChestsPatch = ChestTable;

/// A replacement search point table. Definitions and contents only carry
/// the fields they change; indices are recomputed by the patcher.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPatch {
    #[serde(default)]
    pub guarantee: bool,
    #[serde(default)]
    pub definitions: Vec<RecordPatch>,
    #[serde(default)]
    pub contents: Vec<RecordPatch>,
    #[serde(default)]
    pub items: Vec<SearchPointItemEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchDocument {
    pub version: String,
    pub created: String,
    pub seed: u64,
    pub player: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artes: Option<EntryPatches>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<EntryPatches>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<ItemsPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shops: Option<ShopsPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chests: Option<ChestsPatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchPatch>,
}

impl PatchDocument {
    pub fn new(seed: u64, player: impl Into<String>) -> Self {
        Self {
            version: PATCH_VERSION.to_string(),
            created: chrono::Local::now().format(CREATED_FORMAT).to_string(),
            seed,
            player: player.into(),
            artes: None,
            skills: None,
            items: None,
            shops: None,
            chests: None,
            search: None,
        }
    }

    /// `player-date-seed`, used to name build output.
    pub fn identifier(&self) -> String {
        let date = self.created.split(' ').next().unwrap_or_default();
        format!("{}-{}-{}", self.player, date, self.seed)
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(VesperiaError::Config(format!(
                "Patch file does not exist: {}",
                path.display()
            )));
        }
        let text = fs::read_to_string(path)?;
        let document: Self = serde_json::from_str(&text)?;
        if document.version != PATCH_VERSION {
            log::warn!(
                "Patch version {} differs from supported version {PATCH_VERSION}",
                document.version
            );
        }
        Ok(document)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

/// Overlays `delta` onto a copy of `original`. Every key in `delta` must
/// name a field of the record.
pub fn merge_record<R>(original: &R, delta: &RecordPatch) -> Result<R>
where
    R: Record + Serialize + DeserializeOwned,
{
    let mut value = serde_json::to_value(original)?;
    let fields = value.as_object_mut().ok_or_else(|| {
        VesperiaError::InvalidPatch(format!("{} does not serialize to an object", R::NAME))
    })?;

    for (key, new_value) in delta {
        match fields.get_mut(key) {
            Some(slot) => *slot = new_value.clone(),
            None => {
                return Err(VesperiaError::InvalidPatch(format!(
                    "{} has no field `{key}`",
                    R::NAME
                )))
            }
        }
    }

    serde_json::from_value(value)
        .map_err(|err| VesperiaError::InvalidPatch(format!("{}: {err}", R::NAME)))
}

/// Copies the named fields of a record into a partial record.
pub fn subset<R: Serialize>(record: &R, fields: &[&str]) -> Result<RecordPatch> {
    let value = serde_json::to_value(record)?;
    let mut out = RecordPatch::new();
    if let Value::Object(all) = value {
        for &field in fields {
            if let Some(v) = all.get(field) {
                out.insert(field.to_string(), v.clone());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{SearchPointDefinitionEntry, SkillEntry};
    use crate::tables::ChestItem;
    use serde_json::json;

    fn delta(value: Value) -> RecordPatch {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn merge_overrides_only_named_fields() {
        let original = SkillEntry {
            entry: 4,
            id: 77,
            sp_cost: 10,
            lp_cost: 200,
            symbol: 2,
            ..SkillEntry::default()
        };
        let merged = merge_record(&original, &delta(json!({"sp_cost": 3, "symbol": 0}))).unwrap();
        assert_eq!(merged.sp_cost, 3);
        assert_eq!(merged.symbol, 0);
        assert_eq!(merged.lp_cost, 200);
        assert_eq!(merged.id, 77);
    }

    #[test]
    fn merge_rejects_unknown_fields_and_bad_values() {
        let original = SkillEntry::default();
        let err = merge_record(&original, &delta(json!({"mana": 1}))).unwrap_err();
        assert!(matches!(err, VesperiaError::InvalidPatch(message) if message.contains("mana")));

        let err = merge_record(&original, &delta(json!({"sp_cost": "lots"}))).unwrap_err();
        assert!(matches!(err, VesperiaError::InvalidPatch(_)));
    }

    #[test]
    fn raw_identifier_field_is_patchable_by_plain_name() {
        let merged = merge_record(
            &SearchPointDefinitionEntry::default(),
            &delta(json!({"type": 3, "max_use": 2})),
        )
        .unwrap();
        assert_eq!(merged.r#type, 3);
        assert_eq!(merged.max_use, 2);
    }

    #[test]
    fn subset_picks_listed_fields() {
        let skill = SkillEntry { id: 9, sp_cost: 4, ..SkillEntry::default() };
        let picked = subset(&skill, &["id", "sp_cost", "nonexistent"]).unwrap();
        assert_eq!(Value::Object(picked), json!({"id": 9, "sp_cost": 4}));
    }

    #[test]
    fn document_round_trips_with_string_keys() {
        let mut document = PatchDocument::new(42, "tester");
        document.created = "2024-05-01 12:30:00".to_string();
        document.artes = Some(BTreeMap::from([(3, delta(json!({"tp_cost": 75})))]));
        document.chests = Some(ChestTable::from([(
            "CAS_R1".to_string(),
            BTreeMap::from([(5, vec![ChestItem { item_id: 1, amount: 2 }])]),
        )]));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.tovdepatch");
        document.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"3\""));
        assert!(!text.contains("\"skills\""));

        let loaded = PatchDocument::load(&path).unwrap();
        assert_eq!(loaded, document);
        assert_eq!(loaded.identifier(), "tester-2024-05-01-42");
    }

    #[test]
    fn absent_sections_load_as_none() {
        let document: PatchDocument = serde_json::from_str(
            r#"{"version": "0.1", "created": "2024-01-01 00:00:00", "seed": 1, "player": "p",
                "artes": {"3": {"tp_cost": 75}}}"#,
        )
        .unwrap();
        assert_eq!(document.artes.unwrap()[&3]["tp_cost"], json!(75));
        assert!(document.shops.is_none());
        assert!(document.search.is_none());
    }
}
