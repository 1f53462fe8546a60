use byteorder::BigEndian;

use crate::buffer::{Archive, ByteStore};
use crate::layout::{ItemEntry, ItemSortEntry, Record};
use crate::patch::{merge_record, ItemsPatch};
use crate::patcher::{keep_structural, unknown_key};
use crate::{Result, VesperiaError};

pub fn item_offset(entry: u32) -> usize {
    entry as usize * ItemEntry::SIZE
}

/// `ITEM.DAT` has no header; entry `e` lives at `e * 740`.
pub fn patch_items<S: ByteStore>(archive: &mut Archive<S>, patch: &ItemsPatch) -> Result<usize> {
    let count = archive.len() / ItemEntry::SIZE;

    let mut writes = Vec::with_capacity(patch.base.len());
    for (&entry, delta) in &patch.base {
        if entry as usize >= count {
            return Err(unknown_key("items", entry));
        }
        let offset = item_offset(entry);
        let original: ItemEntry = archive.read_at(offset)?;
        if original.entry != entry {
            return Err(VesperiaError::MalformedRecord {
                record: ItemEntry::NAME,
                offset,
                reason: format!("expected entry {entry}, found {}", original.entry),
            });
        }
        let merged: ItemEntry = merge_record(&original, delta)?;
        keep_structural("item", entry, "entry", original.entry, merged.entry)?;
        writes.push((offset, merged));
    }

    for (offset, item) in &writes {
        archive.write_entry_at(*offset, item);
    }

    if patch.custom.is_some() {
        log::debug!("Custom items are not supported yet, skipping");
    }

    log::info!("Patched {} items", writes.len());
    Ok(writes.len())
}

/// Appends one sort row per `(entry, id)` to `ITEMSORT.DAT` and bumps the
/// leading big-endian count.
pub fn append_sort_entries<S: ByteStore>(archive: &mut Archive<S>, new_items: &[(u32, u32)]) -> Result<()> {
    if new_items.is_empty() {
        return Ok(());
    }

    let count = archive.read_u32_at::<BigEndian>(0)?;
    let table_end = 4 + count as usize * ItemSortEntry::SIZE;
    let old_len = archive.len();
    let grow = new_items.len() * ItemSortEntry::SIZE;

    archive.resize(old_len + grow)?;
    if old_len > table_end {
        archive.move_range(table_end + grow, table_end, old_len - table_end);
    }
    for (i, &(entry, id)) in new_items.iter().enumerate() {
        let offset = table_end + i * ItemSortEntry::SIZE;
        archive.write_entry_at(offset, &ItemSortEntry::for_item(entry, id));
    }
    archive.write_u32_at::<BigEndian>(0, count + new_items.len() as u32);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FixedString;
    use serde_json::json;

    fn items_archive(count: u32) -> Archive<Vec<u8>> {
        let bytes = (0..count)
            .flat_map(|entry| {
                ItemEntry {
                    id: 1000 + entry,
                    entry,
                    buy_price: 300,
                    category: 3,
                    picture: FixedString::new("ICON_SWORD"),
                    ..ItemEntry::default()
                }
                .encode()
            })
            .collect();
        Archive::from_store(bytes)
    }

    #[test]
    fn writes_land_at_entry_stride() {
        let mut archive = items_archive(3);
        let before = archive.bytes().to_vec();
        let patch: ItemsPatch = serde_json::from_value(json!({
            "base": {"1": {"buy_price": 450, "skill1": 12, "skill1_lp": 40}}
        }))
        .unwrap();

        assert_eq!(patch_items(&mut archive, &patch).unwrap(), 1);

        let after = archive.bytes();
        for (i, (old, new)) in before.iter().zip(after).enumerate() {
            if old != new {
                assert!((740..1480).contains(&i), "byte {i} changed");
            }
        }
        assert_eq!(&after[740 + 8..740 + 12], &450u32.to_be_bytes());
        let item: ItemEntry = archive.read_at(740).unwrap();
        assert_eq!((item.skill1, item.skill1_lp, item.id), (12, 40, 1001));
        assert_eq!(item.picture.as_str(), "ICON_SWORD");
    }

    #[test]
    fn custom_section_is_ignored() {
        let mut archive = items_archive(1);
        let before = archive.bytes().to_vec();
        let patch: ItemsPatch = serde_json::from_value(json!({"custom": {"new": []}})).unwrap();
        assert_eq!(patch_items(&mut archive, &patch).unwrap(), 0);
        assert_eq!(archive.bytes(), &before[..]);
    }

    #[test]
    fn entry_past_the_table_is_unknown() {
        let mut archive = items_archive(2);
        let patch: ItemsPatch =
            serde_json::from_value(json!({"base": {"5": {"buy_price": 1}}})).unwrap();
        assert!(matches!(
            patch_items(&mut archive, &patch),
            Err(VesperiaError::UnknownPatchKey { domain: "items", .. })
        ));
    }

    #[test]
    fn misaligned_table_is_malformed() {
        let mut archive = items_archive(3);
        let entry_at = item_offset(2) + 704;
        archive.write_u32_at::<BigEndian>(entry_at, 7);
        let patch: ItemsPatch =
            serde_json::from_value(json!({"base": {"2": {"buy_price": 1}}})).unwrap();
        assert!(matches!(
            patch_items(&mut archive, &patch),
            Err(VesperiaError::MalformedRecord { record: "ItemEntry", offset: 1480, .. })
        ));
    }

    #[test]
    fn entry_field_cannot_be_rewritten() {
        let mut archive = items_archive(2);
        let before = archive.bytes().to_vec();
        let patch: ItemsPatch =
            serde_json::from_value(json!({"base": {"0": {"entry": 1, "buy_price": 9}}})).unwrap();
        assert!(matches!(patch_items(&mut archive, &patch), Err(VesperiaError::InvalidPatch(_))));
        assert_eq!(archive.bytes(), &before[..]);
    }

    #[test]
    fn sort_rows_are_appended_before_trailing_data() {
        let mut bytes = 1u32.to_be_bytes().to_vec();
        bytes.extend(ItemSortEntry::for_item(0, 1).encode());
        bytes.extend(b"TAIL");
        let mut archive = Archive::from_store(bytes);

        append_sort_entries(&mut archive, &[(1, 1841), (2, 1842)]).unwrap();

        assert_eq!(archive.read_u32_at::<BigEndian>(0).unwrap(), 3);
        let added: ItemSortEntry = archive.read_at(4 + 44).unwrap();
        assert_eq!(added, ItemSortEntry::for_item(1, 1841));
        assert_eq!(added.magic_defense_sort, 1841);
        let bytes = archive.into_store();
        assert_eq!(bytes.len(), 4 + 3 * 44 + 4);
        assert_eq!(&bytes[bytes.len() - 4..], b"TAIL");
    }
}
