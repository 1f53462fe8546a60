use std::collections::BTreeMap;

use crate::buffer::{Archive, ByteStore, Sizing};
use crate::layout::{ArteEntry, ArtesHeader, Record};
use crate::patch::{merge_record, EntryPatches, RecordPatch};
use crate::patcher::{keep_structural, unknown_key};
use crate::{Result, VesperiaError};

/// Arte records vary in length, so the table is walked from the first record
/// using each record's stored size until every patched entry has been seen.
pub fn patch_artes<S: ByteStore>(archive: &mut Archive<S>, patches: &EntryPatches) -> Result<usize> {
    let header: ArtesHeader = archive.read_header()?;
    header.verify()?;

    let mut pending: BTreeMap<u32, &RecordPatch> =
        patches.iter().map(|(entry, delta)| (*entry, delta)).collect();
    let mut writes = Vec::with_capacity(pending.len());

    let mut entries = archive.entries::<ArteEntry>(
        ArtesHeader::SIZE,
        header.entries as usize,
        Sizing::LeadingLength,
    );
    while !pending.is_empty() && entries.position() < header.entry_end as usize {
        let Some(next) = entries.next() else { break };
        let (offset, original) = next?;

        let Some(delta) = pending.remove(&original.head.entry) else {
            continue;
        };
        let mut merged = merge_record(&original, delta)?;
        if merged.byte_len() != original.byte_len() {
            return Err(VesperiaError::InvalidPatch(format!(
                "arte entry {} cannot change its character list length",
                original.head.entry
            )));
        }
        let entry = original.head.entry;
        keep_structural(
            "arte",
            entry,
            "next_entry_offset",
            original.head.next_entry_offset,
            merged.head.next_entry_offset,
        )?;
        keep_structural("arte", entry, "entry", entry, merged.head.entry)?;
        merged.head.can_evolve = u32::from(merged.head.evolve_condition1 != 0);
        writes.push((offset, merged));
    }

    if let Some(entry) = pending.keys().next() {
        return Err(unknown_key("artes", entry));
    }

    for (offset, arte) in &writes {
        log::debug!("arte entry {} (id {}) at {offset:#x}", arte.head.entry, arte.head.id);
        archive.write_entry_at(*offset, arte);
    }
    log::info!("Patched {} artes", writes.len());
    Ok(writes.len())
}
