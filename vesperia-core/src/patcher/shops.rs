use std::collections::BTreeMap;

use crate::buffer::{Archive, ByteStore};
use crate::layout::{ensure_len, Record, ShopItemEntry};
use crate::patch::ShopsPatch;
use crate::tables::ShopStock;
use crate::Result;

/// Offset of the first shop row in the decompressed scenario script.
pub const SHOP_ITEM_START: usize = 0x980;
/// Number of shop rows in the shipped script.
pub const SHOP_ITEM_CAPACITY: usize = 1521;
/// Shops only reachable during a story window. Their original stock is
/// always restored.
pub const MISSABLE_SHOPS: [u32; 7] = [1, 27, 28, 29, 34, 36, 39];

pub fn is_missable(shop_id: u32) -> bool {
    MISSABLE_SHOPS.contains(&shop_id)
}

/// Flattens the patch into one sorted item list per shop.
pub fn shop_lists(patch: &ShopsPatch, original: &[ShopStock]) -> BTreeMap<u32, Vec<u32>> {
    let mut by_shop: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

    for group in &patch.commons {
        for &shop in &group.shops {
            by_shop.entry(shop).or_default().extend(&group.items);
        }
    }
    for (&shop, items) in &patch.uniques {
        by_shop.entry(shop).or_default().extend(items);
    }
    for stock in patch
        .custom
        .iter()
        .chain(original.iter().filter(|stock| is_missable(stock.shop_id)))
    {
        by_shop.entry(stock.shop_id).or_default().push(stock.item_id);
    }

    for items in by_shop.values_mut() {
        items.sort_unstable();
    }
    by_shop
}

/// Rewrites the shop rows in place. Rows past the capacity are dropped.
pub fn patch_shops<S: ByteStore>(
    archive: &mut Archive<S>,
    patch: &ShopsPatch,
    original: &[ShopStock],
) -> Result<usize> {
    ensure_len(
        ShopItemEntry::NAME,
        archive.bytes(),
        SHOP_ITEM_START,
        SHOP_ITEM_CAPACITY * ShopItemEntry::SIZE,
    )?;

    let rows: Vec<ShopItemEntry> = shop_lists(patch, original)
        .into_iter()
        .flat_map(|(shop, items)| items.into_iter().map(move |item| ShopItemEntry::new(shop, item)))
        .collect();

    if rows.len() > SHOP_ITEM_CAPACITY {
        log::warn!(
            "{} shop items do not fit in {SHOP_ITEM_CAPACITY} slots, dropping {}",
            rows.len(),
            rows.len() - SHOP_ITEM_CAPACITY
        );
    }

    let written = rows.len().min(SHOP_ITEM_CAPACITY);
    for (i, row) in rows.iter().take(written).enumerate() {
        archive.write_entry_at(SHOP_ITEM_START + i * ShopItemEntry::SIZE, row);
    }
    log::info!("Patched {written} shop items");
    Ok(written)
}

/// Inserts a row right after the first `row_count` shop rows, shifting the
/// rest of the script down.
pub fn insert_shop_item<S: ByteStore>(
    archive: &mut Archive<S>,
    row_count: usize,
    shop_id: u32,
    item_id: u32,
) -> Result<()> {
    let insert_at = SHOP_ITEM_START + row_count * ShopItemEntry::SIZE;
    ensure_len(ShopItemEntry::NAME, archive.bytes(), SHOP_ITEM_START, row_count * ShopItemEntry::SIZE)?;

    let old_len = archive.len();
    archive.resize(old_len + ShopItemEntry::SIZE)?;
    if old_len > insert_at {
        archive.move_range(insert_at + ShopItemEntry::SIZE, insert_at, old_len - insert_at);
    }
    archive.write_entry_at(insert_at, &ShopItemEntry::new(shop_id, item_id));
    Ok(())
}
