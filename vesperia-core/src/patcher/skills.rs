use crate::buffer::{Archive, ByteStore};
use crate::layout::{Record, SkillEntry, SkillsHeader};
use crate::patch::{merge_record, EntryPatches};
use crate::patcher::{keep_structural, unknown_key};
use crate::{Result, VesperiaError};

pub fn skill_offset(entry: u32) -> usize {
    SkillsHeader::SIZE + entry as usize * SkillEntry::SIZE
}

/// Skill records are fixed-size, so each patched entry is addressed directly.
pub fn patch_skills<S: ByteStore>(archive: &mut Archive<S>, patches: &EntryPatches) -> Result<usize> {
    let header: SkillsHeader = archive.read_header()?;
    header.verify()?;

    let mut writes = Vec::with_capacity(patches.len());
    for (&entry, delta) in patches {
        if entry >= header.entries {
            return Err(unknown_key("skills", entry));
        }
        let offset = skill_offset(entry);
        let original: SkillEntry = archive.read_at(offset)?;
        if original.entry != entry {
            return Err(VesperiaError::MalformedRecord {
                record: SkillEntry::NAME,
                offset,
                reason: format!("expected entry {entry}, found {}", original.entry),
            });
        }
        let merged: SkillEntry = merge_record(&original, delta)?;
        keep_structural("skill", entry, "entry", original.entry, merged.entry)?;
        keep_structural(
            "skill",
            entry,
            "next_entry_offset",
            original.next_entry_offset,
            merged.next_entry_offset,
        )?;
        writes.push((offset, merged));
    }

    for (offset, skill) in &writes {
        archive.write_entry_at(*offset, skill);
    }
    log::info!("Patched {} skills", writes.len());
    Ok(writes.len())
}
