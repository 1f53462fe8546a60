use crate::buffer::{Archive, ByteStore, Sizing};
use crate::layout::{
    Record, SearchPointContentEntry, SearchPointDefinitionEntry, SearchPointHeader,
    SearchPointItemEntry,
};
use crate::patch::{merge_record, RecordPatch, SearchPatch};
use crate::patcher::keep_structural;
use crate::{Result, VesperiaError};

/// The first two definitions of the shipped table repeat the next two, pools
/// included. The rebuilt table keeps that shape.
pub const MIRRORED_DEFINITIONS: usize = 2;
pub const GUARANTEED_CHANCE: u16 = 100;
pub const TERMINATOR: &[u8; 6] = b"dummy\0";

#[derive(Debug, Clone, PartialEq)]
struct Pool {
    content: SearchPointContentEntry,
    items: Vec<SearchPointItemEntry>,
}

/// A definition together with the pools it points at.
#[derive(Debug, Clone, PartialEq)]
struct Point {
    definition: SearchPointDefinitionEntry,
    pools: Vec<Pool>,
}

fn read_section<R: Record, S: ByteStore>(archive: &Archive<S>, start: u32, count: u32) -> Result<Vec<R>> {
    archive
        .entries::<R>(start as usize, count as usize, Sizing::Fixed)
        .map(|entry| entry.map(|(_, record)| record))
        .collect()
}

fn slice_range<'a, T>(what: &'static str, all: &'a [T], start: u32, len: u32) -> Result<&'a [T]> {
    let (start, len) = (start as usize, len as usize);
    all.get(start..start + len).ok_or_else(|| VesperiaError::MalformedRecord {
        record: what,
        offset: start,
        reason: format!("range of {len} past the end of {} entries", all.len()),
    })
}

fn original_points<S: ByteStore>(archive: &Archive<S>, header: &SearchPointHeader) -> Result<Vec<Point>> {
    let definitions: Vec<SearchPointDefinitionEntry> =
        read_section(archive, header.definition_start, header.definition_entries)?;
    let contents: Vec<SearchPointContentEntry> =
        read_section(archive, header.content_start, header.content_entries)?;
    let items: Vec<SearchPointItemEntry> =
        read_section(archive, header.item_start, header.item_entries)?;

    definitions
        .into_iter()
        .map(|definition| {
            let pools = slice_range(
                SearchPointContentEntry::NAME,
                &contents,
                definition.content_index,
                definition.content_range,
            )?
            .iter()
            .map(|content| {
                let pool_items = slice_range(
                    SearchPointItemEntry::NAME,
                    &items,
                    content.item_index,
                    content.item_range,
                )?;
                Ok(Pool { content: *content, items: pool_items.to_vec() })
            })
            .collect::<Result<_>>()?;
            Ok(Point { definition, pools })
        })
        .collect()
}

/// Cursor over one of the patch's flat lists.
struct Stream<'a, T> {
    what: &'static str,
    all: &'a [T],
    next: usize,
}

impl<'a, T> Stream<'a, T> {
    fn new(what: &'static str, all: &'a [T]) -> Self {
        Self { what, all, next: 0 }
    }

    fn take(&mut self, count: usize) -> Result<&'a [T]> {
        let taken = self.all.get(self.next..self.next + count).ok_or_else(|| {
            VesperiaError::InvalidPatch(format!(
                "search patch ran out of {} ({} given)",
                self.what,
                self.all.len()
            ))
        })?;
        self.next += count;
        Ok(taken)
    }

    fn finish(&self) -> Result<()> {
        if self.next != self.all.len() {
            return Err(VesperiaError::InvalidPatch(format!(
                "search patch has {} unused {}",
                self.all.len() - self.next,
                self.what
            )));
        }
        Ok(())
    }
}

fn patched_points(original: &[Point], patch: &SearchPatch) -> Result<Vec<Point>> {
    let available = original.len().saturating_sub(MIRRORED_DEFINITIONS);
    if original.len() < 2 * MIRRORED_DEFINITIONS {
        return Err(VesperiaError::MalformedRecord {
            record: SearchPointDefinitionEntry::NAME,
            offset: 0,
            reason: format!("only {} definitions in the original table", original.len()),
        });
    }
    if patch.definitions.len() > available {
        return Err(VesperiaError::InvalidPatch(format!(
            "{} search point definitions given, the table holds {available}",
            patch.definitions.len()
        )));
    }

    let mut contents = Stream::new("contents", &patch.contents);
    let mut items = Stream::new("items", &patch.items);
    let mut points = original.to_vec();

    for (i, delta) in patch.definitions.iter().enumerate() {
        let target = &mut points[i + MIRRORED_DEFINITIONS];
        let mut definition = merge_record(&target.definition, delta)?;
        keep_structural("search point", i, "index", target.definition.index, definition.index)?;
        if patch.guarantee {
            definition.chance = GUARANTEED_CHANCE;
        }

        let pools = contents
            .take(definition.content_range as usize)?
            .iter()
            .map(|content_delta: &RecordPatch| {
                let content = merge_record(&SearchPointContentEntry::default(), content_delta)?;
                let pool_items = items.take(content.item_range as usize)?.to_vec();
                Ok(Pool { content, items: pool_items })
            })
            .collect::<Result<_>>()?;

        *target = Point { definition, pools };
    }
    contents.finish()?;
    items.finish()?;

    for i in 0..MIRRORED_DEFINITIONS {
        points[i] = points[i + MIRRORED_DEFINITIONS].clone();
    }
    Ok(points)
}

/// Replaces the search point table with the patched one, growing or
/// shrinking the file as needed. Returns the new header.
pub fn patch_search_points<S: ByteStore>(
    archive: &mut Archive<S>,
    patch: &SearchPatch,
) -> Result<SearchPointHeader> {
    let original_header: SearchPointHeader = archive.read_header()?;
    original_header.verify()?;

    let points = patched_points(&original_points(archive, &original_header)?, patch)?;

    let mut definitions = Vec::with_capacity(points.len());
    let mut contents = Vec::new();
    let mut items = Vec::new();
    for point in points {
        let mut definition = point.definition;
        definition.content_index = contents.len() as u32;
        definition.content_range = point.pools.len() as u32;
        definitions.push(definition);

        for pool in point.pools {
            let mut content = pool.content;
            content.item_index = items.len() as u32;
            content.item_range = pool.items.len() as u32;
            contents.push(content);
            items.extend(pool.items);
        }
    }

    let definition_start = SearchPointHeader::SIZE;
    let content_start = definition_start + definitions.len() * SearchPointDefinitionEntry::SIZE;
    let item_start = content_start + contents.len() * SearchPointContentEntry::SIZE;
    let entry_end = item_start + items.len() * SearchPointItemEntry::SIZE;
    let file_size = entry_end + TERMINATOR.len();

    let header = SearchPointHeader {
        file_size: file_size as u32,
        definition_start: definition_start as u32,
        definition_entries: definitions.len() as u32,
        content_start: content_start as u32,
        content_entries: contents.len() as u32,
        item_start: item_start as u32,
        item_entries: items.len() as u32,
        entry_end: entry_end as u32,
        ..original_header
    };

    archive.resize(file_size)?;
    archive.write_entry_at(0, &header);
    for (i, definition) in definitions.iter().enumerate() {
        archive.write_entry_at(definition_start + i * SearchPointDefinitionEntry::SIZE, definition);
    }
    for (i, content) in contents.iter().enumerate() {
        archive.write_entry_at(content_start + i * SearchPointContentEntry::SIZE, content);
    }
    for (i, item) in items.iter().enumerate() {
        archive.write_entry_at(item_start + i * SearchPointItemEntry::SIZE, item);
    }
    archive.write_bytes_at(entry_end, TERMINATOR);

    log::info!(
        "Rebuilt {} search points with {} pools and {} items",
        header.definition_entries,
        header.content_entries,
        header.item_entries
    );
    Ok(header)
}
