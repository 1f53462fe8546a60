//! Mutable access to an archive's bytes.
//!
//! An [`Archive`] owns a [`ByteStore`]: either a read-write memory map of a
//! working copy on disk, or a plain `Vec<u8>` for in-memory use. Records are
//! decoded from and encoded to absolute byte offsets. Offsets handed to the
//! write methods are trusted; going out of bounds is a bug in the caller and
//! panics.

use std::fs::{File, OpenOptions};
use std::marker::PhantomData;
use std::path::Path;

use byteorder::ByteOrder;
use memmap2::MmapMut;

use crate::layout::{ensure_len, Record};
use crate::Result;

/// Growable backing storage for an archive.
pub trait ByteStore {
    fn bytes(&self) -> &[u8];
    fn bytes_mut(&mut self) -> &mut [u8];
    /// Grows or shrinks the store. Grown bytes must be written before they
    /// are read.
    fn resize(&mut self, new_len: usize) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
}

impl ByteStore for Vec<u8> {
    fn bytes(&self) -> &[u8] {
        self
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        self
    }

    fn resize(&mut self, new_len: usize) -> Result<()> {
        Vec::resize(self, new_len, 0);
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A file mapped read-write. Empty files are held without a mapping.
pub struct MappedFile {
    file: File,
    map: Option<MmapMut>,
}

impl MappedFile {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let map = Self::map(&file)?;
        Ok(Self { file, map })
    }

    fn map(file: &File) -> Result<Option<MmapMut>> {
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        let map = unsafe { MmapMut::map_mut(file)? };
        Ok(Some(map))
    }
}

impl ByteStore for MappedFile {
    fn bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        match self.map.as_deref_mut() {
            Some(bytes) => bytes,
            None => &mut [],
        }
    }

    fn resize(&mut self, new_len: usize) -> Result<()> {
        if let Some(map) = self.map.take() {
            map.flush()?;
        }
        self.file.set_len(new_len as u64)?;
        self.map = Self::map(&self.file)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if let Some(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }
}

/// How [`Archive::entries`] advances from one record to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sizing {
    /// Each record occupies its own encoded length.
    Fixed,
    /// Each record starts with a little-endian `u32` holding its true size.
    LeadingLength,
}

pub struct Archive<S: ByteStore = MappedFile> {
    store: S,
}

impl Archive<MappedFile> {
    pub fn open_mutable(path: &Path) -> Result<Self> {
        Ok(Self {
            store: MappedFile::open(path)?,
        })
    }
}

impl<S: ByteStore> Archive<S> {
    pub fn from_store(store: S) -> Self {
        Self { store }
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn len(&self) -> usize {
        self.store.bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> &[u8] {
        self.store.bytes()
    }

    pub fn read_header<H: Record>(&self) -> Result<H> {
        H::decode(self.bytes(), 0)
    }

    pub fn read_at<R: Record>(&self, offset: usize) -> Result<R> {
        R::decode(self.bytes(), offset)
    }

    pub fn read_u32_at<B: ByteOrder>(&self, offset: usize) -> Result<u32> {
        ensure_len("u32", self.bytes(), offset, 4)?;
        Ok(B::read_u32(&self.bytes()[offset..offset + 4]))
    }

    /// Lazily decodes `count` records starting at `start`.
    pub fn entries<R: Record>(&self, start: usize, count: usize, sizing: Sizing) -> Entries<'_, R> {
        Entries {
            bytes: self.bytes(),
            offset: start,
            remaining: count,
            sizing,
            _record: PhantomData,
        }
    }

    pub fn write_entry_at<R: Record>(&mut self, offset: usize, record: &R) {
        let len = record.byte_len();
        self.check_range(offset, len);
        record.encode_into(&mut self.store.bytes_mut()[offset..offset + len]);
    }

    pub fn write_bytes_at(&mut self, offset: usize, data: &[u8]) {
        self.check_range(offset, data.len());
        self.store.bytes_mut()[offset..offset + data.len()].copy_from_slice(data);
    }

    pub fn write_u32_at<B: ByteOrder>(&mut self, offset: usize, value: u32) {
        self.check_range(offset, 4);
        B::write_u32(&mut self.store.bytes_mut()[offset..offset + 4], value);
    }

    pub fn resize(&mut self, new_len: usize) -> Result<()> {
        self.store.resize(new_len)
    }

    /// Copies `len` bytes from `src` to `dst`; the ranges may overlap.
    pub fn move_range(&mut self, dst: usize, src: usize, len: usize) {
        self.check_range(src, len);
        self.check_range(dst, len);
        self.store.bytes_mut().copy_within(src..src + len, dst);
    }

    pub fn flush(&mut self) -> Result<()> {
        self.store.flush()
    }

    fn check_range(&self, offset: usize, len: usize) {
        assert!(
            offset
                .checked_add(len)
                .map_or(false, |end| end <= self.len()),
            "archive access out of bounds: {len} bytes at {offset:#x}, archive is {:#x} bytes",
            self.len()
        );
    }
}

/// Sequence of `(offset, record)` pairs produced by [`Archive::entries`].
/// Stops after the first decode error.
pub struct Entries<'a, R> {
    bytes: &'a [u8],
    offset: usize,
    remaining: usize,
    sizing: Sizing,
    _record: PhantomData<R>,
}

impl<'a, R> Entries<'a, R> {
    /// Offset of the next record to be decoded.
    pub fn position(&self) -> usize {
        self.offset
    }
}

impl<'a, R: Record> Iterator for Entries<'a, R> {
    type Item = Result<(usize, R)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let offset = self.offset;
        let record = match R::decode(self.bytes, offset) {
            Ok(record) => record,
            Err(err) => {
                self.remaining = 0;
                return Some(Err(err));
            }
        };

        let step = match self.sizing {
            Sizing::Fixed => record.byte_len(),
            Sizing::LeadingLength => {
                let stored = byteorder::LittleEndian::read_u32(&self.bytes[offset..offset + 4]);
                if stored == 0 {
                    record.byte_len()
                } else {
                    stored as usize
                }
            }
        };
        self.offset = offset + step;

        Some(Ok((offset, record)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::{ChestItemEntry, SkillEntry};
    use byteorder::LittleEndian;
    use std::io::Write;

    fn items_buffer(items: &[(u32, u32)]) -> Vec<u8> {
        items
            .iter()
            .flat_map(|&(item_id, amount)| ChestItemEntry { item_id, amount }.encode())
            .collect()
    }

    #[test]
    fn fixed_entries_are_decoded_in_order() {
        let archive = Archive::from_store(items_buffer(&[(17, 1), (18, 2), (19, 3)]));
        let decoded: Vec<_> = archive
            .entries::<ChestItemEntry>(8, 2, Sizing::Fixed)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, 8);
        assert_eq!(decoded[1].1, ChestItemEntry { item_id: 19, amount: 3 });
    }

    #[test]
    fn leading_length_skips_by_stored_size() {
        let mut bytes = Vec::new();
        for (i, gap) in [(0u32, 100usize), (1, 0)] {
            let skill = SkillEntry {
                next_entry_offset: (SkillEntry::SIZE + gap) as u32,
                entry: i,
                ..SkillEntry::default()
            };
            bytes.extend(skill.encode());
            bytes.extend(std::iter::repeat(0xAA).take(gap));
        }
        let archive = Archive::from_store(bytes);
        let offsets: Vec<usize> = archive
            .entries::<SkillEntry>(0, 2, Sizing::LeadingLength)
            .map(|entry| entry.unwrap().0)
            .collect();
        assert_eq!(offsets, vec![0, SkillEntry::SIZE + 100]);
    }

    #[test]
    fn entries_stop_after_first_error() {
        let archive = Archive::from_store(items_buffer(&[(1, 1)]));
        let mut entries = archive.entries::<ChestItemEntry>(0, 5, Sizing::Fixed);
        assert!(entries.next().unwrap().is_ok());
        assert!(entries.next().unwrap().is_err());
        assert!(entries.next().is_none());
    }

    #[test]
    fn write_only_touches_the_record() {
        let mut archive = Archive::from_store(vec![0xFFu8; 24]);
        archive.write_entry_at(8, &ChestItemEntry { item_id: 5, amount: 6 });
        let bytes = archive.into_store();
        assert_eq!(&bytes[..8], &[0xFF; 8]);
        assert_eq!(LittleEndian::read_u32(&bytes[8..12]), 5);
        assert_eq!(LittleEndian::read_u32(&bytes[12..16]), 6);
        assert_eq!(&bytes[16..], &[0xFF; 8]);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn writing_past_the_end_panics() {
        let mut archive = Archive::from_store(vec![0u8; 4]);
        archive.write_entry_at(0, &ChestItemEntry { item_id: 1, amount: 1 });
    }

    #[test]
    fn resize_and_move_open_a_gap() {
        let mut archive = Archive::from_store(vec![1, 2, 3, 4, 5, 6]);
        archive.resize(8).unwrap();
        archive.move_range(4, 2, 4);
        archive.write_bytes_at(2, &[9, 9]);
        assert_eq!(archive.into_store(), vec![1, 2, 9, 9, 3, 4, 5, 6]);
    }

    #[test]
    fn mapped_file_grows_and_persists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        file.flush().unwrap();

        {
            let mut archive = Archive::open_mutable(file.path()).unwrap();
            assert_eq!(archive.len(), 4);
            archive.resize(12).unwrap();
            archive.write_entry_at(4, &ChestItemEntry { item_id: 7, amount: 8 });
            archive.write_u32_at::<LittleEndian>(0, 0xDEAD_BEEF);
            archive.flush().unwrap();
        }

        let bytes = std::fs::read(file.path()).unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(LittleEndian::read_u32(&bytes[0..4]), 0xDEAD_BEEF);
        assert_eq!(LittleEndian::read_u32(&bytes[4..8]), 7);
        assert_eq!(LittleEndian::read_u32(&bytes[8..12]), 8);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Archive::open_mutable(&dir.path().join("absent.dat")).err().unwrap();
        assert!(matches!(err, crate::VesperiaError::Io(_)));
    }
}
