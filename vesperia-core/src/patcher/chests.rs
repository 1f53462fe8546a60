use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::buffer::{Archive, ByteStore, Sizing};
use crate::layout::{ChestDirectoryEntry, ChestHeader, ChestItemEntry, Record};
use crate::patcher::unknown_key;
use crate::tables::ChestItem;
use crate::Result;

pub const CHEST_FILE: &str = "0004.dec";

/// Finds every extracted chest table under `maps/<AREA>/0004.dec`, keyed by
/// area name.
pub fn discover_chest_maps(maps_dir: &Path) -> BTreeMap<String, PathBuf> {
    WalkDir::new(maps_dir)
        .min_depth(2)
        .max_depth(2)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == CHEST_FILE)
        .filter_map(|e| {
            let area = e.path().parent()?.file_name()?.to_str()?.to_string();
            Some((area, e.into_path()))
        })
        .collect()
}

/// Overwrites the item lists of the patched chests in one map.
///
/// Each chest keeps its original item count: extra patch items are dropped
/// and missing ones leave the original items in place.
pub fn patch_chests<S: ByteStore>(
    archive: &mut Archive<S>,
    patches: &BTreeMap<u32, Vec<ChestItem>>,
) -> Result<usize> {
    let header: ChestHeader = archive.read_header()?;

    let mut pending: BTreeMap<u32, &Vec<ChestItem>> =
        patches.iter().map(|(id, items)| (*id, items)).collect();
    let mut writes = Vec::new();
    let mut position = header.item_start as usize;

    for entry in archive.entries::<ChestDirectoryEntry>(
        header.chest_start as usize,
        header.chest_entries as usize,
        Sizing::Fixed,
    ) {
        let (_, chest) = entry?;
        let capacity = chest.item_amount as usize;

        if let Some(items) = pending.remove(&chest.chest_id) {
            if items.len() > capacity {
                log::warn!(
                    "Chest {} holds {capacity} items, dropping {} from the patch",
                    chest.chest_id,
                    items.len() - capacity
                );
            }
            for (i, item) in items.iter().take(capacity).enumerate() {
                let record = ChestItemEntry { item_id: item.item_id, amount: item.amount };
                writes.push((position + i * ChestItemEntry::SIZE, record));
            }
        }
        position += capacity * ChestItemEntry::SIZE;
    }

    if let Some(chest_id) = pending.keys().next() {
        return Err(unknown_key("chests", chest_id));
    }

    for (offset, record) in &writes {
        archive.write_entry_at(*offset, record);
    }
    Ok(writes.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FixedString;
    use crate::VesperiaError;

    /// Two chests (ids 10 and 11) holding 2 and 1 items.
    fn chest_map() -> Archive<Vec<u8>> {
        let chest_start = ChestHeader::SIZE;
        let item_start = chest_start + 2 * ChestDirectoryEntry::SIZE;
        let header = ChestHeader {
            magic_number: FixedString::new("TOVNPCT"),
            file_end: (item_start + 3 * ChestItemEntry::SIZE) as u32,
            chest_start: chest_start as u32,
            chest_entries: 2,
            item_start: item_start as u32,
            item_entries: 3,
            dummy: 0,
        };
        let mut bytes = header.encode();
        for (chest_id, item_amount) in [(10, 2), (11, 1)] {
            let row = ChestDirectoryEntry { chest_id, item_amount, unknown: [7; 14] };
            bytes.extend(row.encode());
        }
        for (item_id, amount) in [(100, 1), (101, 2), (102, 3)] {
            bytes.extend(ChestItemEntry { item_id, amount }.encode());
        }
        Archive::from_store(bytes)
    }

    fn item(item_id: u32, amount: u32) -> ChestItem {
        ChestItem { item_id, amount }
    }

    #[test]
    fn extra_items_are_truncated_and_next_chest_is_untouched() {
        let mut archive = chest_map();
        let header: ChestHeader = archive.read_header().unwrap();
        let next_chest_items = header.item_start as usize + 2 * ChestItemEntry::SIZE;
        let before = archive.bytes()[next_chest_items..].to_vec();

        let patches = BTreeMap::from([(10, vec![item(1, 5), item(2, 6), item(3, 7)])]);
        assert_eq!(patch_chests(&mut archive, &patches).unwrap(), 2);

        let start = header.item_start as usize;
        let first: ChestItemEntry = archive.read_at(start).unwrap();
        let second: ChestItemEntry = archive.read_at(start + 8).unwrap();
        assert_eq!((first.item_id, second.item_id), (1, 2));
        assert_eq!(&archive.bytes()[next_chest_items..], &before[..]);
    }

    #[test]
    fn later_chest_is_found_by_running_total() {
        let mut archive = chest_map();
        let patches = BTreeMap::from([(11, vec![item(0xFFFF_FFFE, 900)])]);
        patch_chests(&mut archive, &patches).unwrap();

        let header: ChestHeader = archive.read_header().unwrap();
        let third: ChestItemEntry = archive.read_at(header.item_start as usize + 16).unwrap();
        assert_eq!(third, ChestItemEntry { item_id: 0xFFFF_FFFE, amount: 900 });
        let first: ChestItemEntry = archive.read_at(header.item_start as usize).unwrap();
        assert_eq!(first.item_id, 100);
    }

    #[test]
    fn unknown_chest_is_rejected_before_writing() {
        let mut archive = chest_map();
        let before = archive.bytes().to_vec();
        let patches = BTreeMap::from([(10, vec![item(1, 1)]), (99, vec![item(2, 2)])]);
        let err = patch_chests(&mut archive, &patches).unwrap_err();
        assert!(matches!(err, VesperiaError::UnknownPatchKey { domain: "chests", key } if key == "99"));
        assert_eq!(archive.bytes(), &before[..]);
    }

    #[test]
    fn chest_maps_are_discovered_by_area() {
        let dir = tempfile::tempdir().unwrap();
        for area in ["CAS_R1", "ZAP_T2"] {
            std::fs::create_dir_all(dir.path().join(area)).unwrap();
            std::fs::write(dir.path().join(area).join(CHEST_FILE), b"").unwrap();
        }
        std::fs::create_dir_all(dir.path().join("FIELD")).unwrap();
        std::fs::write(dir.path().join("FIELD").join("0005.dec"), b"").unwrap();

        let maps = discover_chest_maps(dir.path());
        assert_eq!(maps.keys().cloned().collect::<Vec<_>>(), vec!["CAS_R1", "ZAP_T2"]);
        assert_eq!(maps["CAS_R1"], dir.path().join("CAS_R1").join(CHEST_FILE));
        assert!(discover_chest_maps(&dir.path().join("missing")).is_empty());
    }
}
