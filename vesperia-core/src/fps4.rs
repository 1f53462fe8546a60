//! FPS4 container codec.
//!
//! An FPS4 file is a 0x1C byte header followed by a table of fixed-size
//! entries. A content bitmask in the header says which optional fields each
//! entry carries; they always appear in the order of the flag bits. The
//! header does not record its byte order, so it is read in native order
//! first and swapped when the header size is implausible.
//!
//! Parsing produces a [`Manifest`] that describes the container well enough
//! for [`Fps4Builder`] (or the external packer) to rebuild it.

use std::fs;
use std::path::{Component, Path};

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};

use crate::layout::ensure_len;
use crate::{Result, VesperiaError};

pub const FPS4_MAGIC: &[u8; 4] = b"FPS4";
pub const FPS4_HEADER_SIZE: usize = 0x1C;

const HEADER_SIZE_LIMIT: u32 = 0xFFFF;
const SKIPPED_ADDRESS: u32 = 0xFFFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    Little,
    Big,
}

impl Endian {
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    pub fn swapped(self) -> Self {
        match self {
            Endian::Little => Endian::Big,
            Endian::Big => Endian::Little,
        }
    }

    fn read_u16(self, buf: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(buf),
            Endian::Big => BigEndian::read_u16(buf),
        }
    }

    fn read_u32(self, buf: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(buf),
            Endian::Big => BigEndian::read_u32(buf),
        }
    }

    fn write_u16(self, buf: &mut [u8], value: u16) {
        match self {
            Endian::Little => LittleEndian::write_u16(buf, value),
            Endian::Big => BigEndian::write_u16(buf, value),
        }
    }

    fn write_u32(self, buf: &mut [u8], value: u32) {
        match self {
            Endian::Little => LittleEndian::write_u32(buf, value),
            Endian::Big => BigEndian::write_u32(buf, value),
        }
    }
}

/// Which optional fields an entry carries, decoded once from the bitmask.
/// Bits 0x0001 to 0x0100 name the nine fields with a known layout. Bit
/// 0x0200 and up have no known field, so they are ignored on read and never
/// written back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentFlags {
    pub start_pointer: bool,
    pub sector_size: bool,
    pub file_size: bool,
    pub filename: bool,
    pub extension: bool,
    pub file_type: bool,
    pub metadata: bool,
    pub unknown_0x80: bool,
    pub unknown_0x100: bool,
}

impl ContentFlags {
    pub fn from_bitmask(mask: u16) -> Self {
        Self {
            start_pointer: mask & 0x0001 != 0,
            sector_size: mask & 0x0002 != 0,
            file_size: mask & 0x0004 != 0,
            filename: mask & 0x0008 != 0,
            extension: mask & 0x0010 != 0,
            file_type: mask & 0x0020 != 0,
            metadata: mask & 0x0040 != 0,
            unknown_0x80: mask & 0x0080 != 0,
            unknown_0x100: mask & 0x0100 != 0,
        }
    }

    pub fn bitmask(&self) -> u16 {
        let bits = [
            (self.start_pointer, 0x0001),
            (self.sector_size, 0x0002),
            (self.file_size, 0x0004),
            (self.filename, 0x0008),
            (self.extension, 0x0010),
            (self.file_type, 0x0020),
            (self.metadata, 0x0040),
            (self.unknown_0x80, 0x0080),
            (self.unknown_0x100, 0x0100),
        ];
        bits.iter()
            .filter(|(present, _)| *present)
            .fold(0, |mask, (_, bit)| mask | bit)
    }

    /// Bytes taken by one entry carrying exactly these fields.
    pub fn entry_size(&self) -> usize {
        let mut size = 0;
        for (present, width) in [
            (self.start_pointer, 4),
            (self.sector_size, 4),
            (self.file_size, 4),
            (self.filename, 0x20),
            (self.extension, 8),
            (self.file_type, 4),
            (self.metadata, 4),
            (self.unknown_0x80, 4),
            (self.unknown_0x100, 4),
        ] {
            if present {
                size += width;
            }
        }
        size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fps4Header {
    pub file_entries: u32,
    pub header_size: u32,
    pub first_file_start: u32,
    pub entry_size: u16,
    pub content_bitmask: u16,
    pub unknown2: u32,
    pub archive_name_address: u32,
}

impl Fps4Header {
    fn read(buf: &[u8], endian: Endian) -> Self {
        Self {
            file_entries: endian.read_u32(&buf[0x04..]),
            header_size: endian.read_u32(&buf[0x08..]),
            first_file_start: endian.read_u32(&buf[0x0C..]),
            entry_size: endian.read_u16(&buf[0x10..]),
            content_bitmask: endian.read_u16(&buf[0x12..]),
            unknown2: endian.read_u32(&buf[0x14..]),
            archive_name_address: endian.read_u32(&buf[0x18..]),
        }
    }

    fn write(&self, buf: &mut [u8], endian: Endian) {
        buf[..4].copy_from_slice(FPS4_MAGIC);
        endian.write_u32(&mut buf[0x04..], self.file_entries);
        endian.write_u32(&mut buf[0x08..], self.header_size);
        endian.write_u32(&mut buf[0x0C..], self.first_file_start);
        endian.write_u16(&mut buf[0x10..], self.entry_size);
        endian.write_u16(&mut buf[0x12..], self.content_bitmask);
        endian.write_u32(&mut buf[0x14..], self.unknown2);
        endian.write_u32(&mut buf[0x18..], self.archive_name_address);
    }
}

/// One entry of the file table. Absent fields stay `None` and are left out
/// of the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fps4File {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sector_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_0x80: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unknown_0x100: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_on_disk: Option<String>,
}

impl Fps4File {
    /// Dummy entries that hold no data.
    pub fn is_skippable(&self) -> bool {
        self.address == Some(SKIPPED_ADDRESS) || self.unknown_0x80.map_or(false, |flag| flag > 0)
    }

    /// Name used when extracting: filename plus extension, or the index.
    pub fn disk_name(&self) -> String {
        let stem = self
            .filename
            .as_deref()
            .filter(|name| is_plain_name(name))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{:04}", self.index));
        match self.extension.as_deref().filter(|ext| is_plain_name(ext)) {
            Some(ext) => format!("{stem}.{ext}"),
            None => stem,
        }
    }
}

fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && Path::new(name)
            .components()
            .all(|component| matches!(component, Component::Normal(_)))
        && !name.contains(['/', '\\'])
}

/// Everything needed to rebuild a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub endian: Endian,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive_name: Option<String>,
    pub content_bitmask: u16,
    pub unknown2: u32,
    /// Number of low zero bits shared by every file start address.
    pub alignment: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_file_alignment: Option<u32>,
    pub set_sector_size_as_file_size: bool,
    #[serde(default)]
    pub files: Vec<Fps4File>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

fn read_c_string(bytes: &[u8], offset: usize) -> Result<String> {
    ensure_len("FPS4 string", bytes, offset, 1)?;
    let tail = &bytes[offset..];
    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

fn fixed_string(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    if end == 0 {
        return None;
    }
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// Count of trailing one bits, which for an AND of inverted addresses is
/// the number of low zero bits the addresses share.
fn alignment_bits(mask: u64) -> u32 {
    mask.trailing_ones().min(64)
}

struct EntryCursor<'a> {
    bytes: &'a [u8],
    at: usize,
    endian: Endian,
}

impl<'a> EntryCursor<'a> {
    fn take(&mut self, len: usize) -> &'a [u8] {
        let bytes: &'a [u8] = self.bytes;
        let slice = &bytes[self.at..self.at + len];
        self.at += len;
        slice
    }

    fn u32(&mut self) -> u32 {
        let endian = self.endian;
        endian.read_u32(self.take(4))
    }
}

/// A parsed container borrowing the raw bytes.
#[derive(Debug)]
pub struct Fps4Archive<'a> {
    bytes: &'a [u8],
    pub endian: Endian,
    pub header: Fps4Header,
    pub flags: ContentFlags,
    pub archive_name: Option<String>,
    pub files: Vec<Fps4File>,
}

impl<'a> Fps4Archive<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        ensure_len("Fps4Header", bytes, 0, FPS4_HEADER_SIZE)?;
        if &bytes[..4] != FPS4_MAGIC {
            return Err(VesperiaError::MalformedRecord {
                record: "Fps4Header",
                offset: 0,
                reason: "file is not in FPS4 format".to_string(),
            });
        }

        let mut endian = Endian::native();
        let mut header = Fps4Header::read(bytes, endian);
        if header.header_size > HEADER_SIZE_LIMIT {
            endian = endian.swapped();
            header = Fps4Header::read(bytes, endian);
        }

        let flags = ContentFlags::from_bitmask(header.content_bitmask);
        if (header.entry_size as usize) < flags.entry_size() {
            return Err(VesperiaError::MalformedRecord {
                record: "Fps4Header",
                offset: 0x10,
                reason: format!(
                    "entry size {:#x} cannot hold the fields of bitmask {:#x}",
                    header.entry_size, header.content_bitmask
                ),
            });
        }

        let archive_name = if header.archive_name_address != 0 {
            Some(read_c_string(bytes, header.archive_name_address as usize)?)
        } else {
            None
        };

        let mut files = Vec::with_capacity(header.file_entries as usize);
        for index in 0..header.file_entries as usize {
            let offset = header.header_size as usize + index * header.entry_size as usize;
            ensure_len("Fps4Entry", bytes, offset, header.entry_size as usize)?;
            files.push(Self::read_entry(bytes, offset, index, flags, endian)?);
        }

        Ok(Self {
            bytes,
            endian,
            header,
            flags,
            archive_name,
            files,
        })
    }

    fn read_entry(
        bytes: &[u8],
        offset: usize,
        index: usize,
        flags: ContentFlags,
        endian: Endian,
    ) -> Result<Fps4File> {
        let mut cursor = EntryCursor { bytes, at: offset, endian };
        let mut file = Fps4File {
            index,
            ..Fps4File::default()
        };

        if flags.start_pointer {
            file.address = Some(cursor.u32());
        }
        if flags.sector_size {
            file.sector_size = Some(cursor.u32());
        }
        if flags.file_size {
            file.file_size = Some(cursor.u32());
        }
        if flags.filename {
            file.filename = fixed_string(cursor.take(0x20));
        }
        if flags.extension {
            file.extension = fixed_string(cursor.take(8));
        }
        if flags.file_type {
            file.file_type = fixed_string(cursor.take(4));
        }
        if flags.metadata {
            let pointer = cursor.u32();
            if pointer != 0 {
                file.metadata = Some(read_c_string(bytes, pointer as usize)?);
            }
        }
        if flags.unknown_0x80 {
            file.unknown_0x80 = Some(cursor.u32());
        }
        if flags.unknown_0x100 {
            file.unknown_0x100 = Some(cursor.u32());
        }
        Ok(file)
    }

    /// Stored size, else the distance to the next non-skippable entry, else
    /// the distance to the end of the container.
    pub fn estimate_file_size(&self, index: usize) -> Option<usize> {
        let file = self.files.get(index)?;
        if let Some(size) = file.file_size {
            return Some(size as usize);
        }
        let start = file.address? as usize;
        let next = self.files[index + 1..]
            .iter()
            .filter(|other| !other.is_skippable())
            .find_map(|other| other.address);
        let end = next.map_or(self.bytes.len(), |address| address as usize);
        Some(end.saturating_sub(start))
    }

    pub fn file_data(&self, index: usize) -> Result<&'a [u8]> {
        let file = self.files.get(index).ok_or_else(|| VesperiaError::MalformedRecord {
            record: "Fps4Entry",
            offset: 0,
            reason: format!("no entry {index}"),
        })?;
        let start = file.address.ok_or_else(|| VesperiaError::MalformedRecord {
            record: "Fps4Entry",
            offset: index,
            reason: "entry has no start pointer".to_string(),
        })? as usize;
        let size = self.estimate_file_size(index).unwrap_or(0);
        ensure_len("Fps4File", self.bytes, start, size)?;
        let bytes: &'a [u8] = self.bytes;
        Ok(&bytes[start..start + size])
    }

    pub fn manifest(&self) -> Result<Manifest> {
        let mut estimated_alignment = u64::MAX;
        let mut first_file_position: Option<u64> = None;
        let mut files = Vec::new();

        for file in self.files.iter().filter(|file| !file.is_skippable()) {
            let address = file.address.ok_or_else(|| VesperiaError::MalformedRecord {
                record: "Fps4Entry",
                offset: file.index,
                reason: "entry has no start pointer".to_string(),
            })? as u64;
            estimated_alignment &= !address;
            first_file_position = Some(first_file_position.map_or(address, |pos| pos.min(address)));
            files.push(file.clone());
        }

        let alignment = alignment_bits(estimated_alignment);
        let first_file_alignment = first_file_position
            .map(|pos| alignment_bits(!pos))
            .filter(|bits| *bits > alignment);

        Ok(Manifest {
            endian: self.endian,
            archive_name: self.archive_name.clone(),
            content_bitmask: self.header.content_bitmask,
            unknown2: self.header.unknown2,
            alignment,
            first_file_alignment,
            set_sector_size_as_file_size: !files.is_empty()
                && self.flags.file_size
                && self.flags.sector_size,
            files,
        })
    }

    /// Writes every non-skippable file into `dir` and returns the manifest
    /// with `path_on_disk` filled in.
    pub fn extract_to(&self, dir: &Path) -> Result<Manifest> {
        fs::create_dir_all(dir)?;
        let mut manifest = self.manifest()?;
        for file in &mut manifest.files {
            let data = self.file_data(file.index)?;
            let path = dir.join(file.disk_name());
            fs::write(&path, data)?;
            file.path_on_disk = Some(path.to_string_lossy().into_owned());
        }
        log::debug!("extracted {} files into {}", manifest.files.len(), dir.display());
        Ok(manifest)
    }
}

/// A file to place in a rebuilt container.
#[derive(Debug, Clone, Default)]
pub struct BuildFile {
    pub filename: Option<String>,
    pub extension: Option<String>,
    pub file_type: Option<String>,
    pub metadata: Option<String>,
    pub unknown_0x80: Option<u32>,
    pub unknown_0x100: Option<u32>,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct Fps4Builder {
    pub endian: Endian,
    pub flags: ContentFlags,
    pub unknown2: u32,
    pub archive_name: Option<String>,
    pub alignment: u32,
    pub first_file_alignment: Option<u32>,
    pub set_sector_size_as_file_size: bool,
    pub files: Vec<BuildFile>,
}

fn align_up(value: usize, bits: u32) -> usize {
    let unit = 1usize.checked_shl(bits).unwrap_or(1);
    value.div_ceil(unit) * unit
}

fn put_fixed(buf: &mut [u8], text: Option<&str>) {
    if let Some(text) = text {
        let len = text.len().min(buf.len());
        buf[..len].copy_from_slice(&text.as_bytes()[..len]);
    }
}

impl Fps4Builder {
    pub fn new(endian: Endian, content_bitmask: u16) -> Self {
        Self {
            endian,
            flags: ContentFlags::from_bitmask(content_bitmask),
            unknown2: 0,
            archive_name: None,
            alignment: 4,
            first_file_alignment: None,
            set_sector_size_as_file_size: false,
            files: Vec::new(),
        }
    }

    /// Reads each manifest file back from its `path_on_disk`.
    pub fn from_manifest(manifest: &Manifest) -> Result<Self> {
        let mut builder = Self::new(manifest.endian, manifest.content_bitmask);
        builder.unknown2 = manifest.unknown2;
        builder.archive_name = manifest.archive_name.clone();
        builder.alignment = manifest.alignment;
        builder.first_file_alignment = manifest.first_file_alignment;
        builder.set_sector_size_as_file_size = manifest.set_sector_size_as_file_size;

        for file in &manifest.files {
            let path = file.path_on_disk.as_deref().ok_or_else(|| {
                VesperiaError::Config(format!("manifest file {} has no path_on_disk", file.index))
            })?;
            builder.files.push(BuildFile {
                filename: file.filename.clone(),
                extension: file.extension.clone(),
                file_type: file.file_type.clone(),
                metadata: file.metadata.clone(),
                unknown_0x80: file.unknown_0x80,
                unknown_0x100: file.unknown_0x100,
                data: fs::read(path)?,
            });
        }
        Ok(builder)
    }

    pub fn build(&self) -> Vec<u8> {
        let flags = self.flags;
        let entry_size = flags.entry_size();
        let table_end = FPS4_HEADER_SIZE + entry_size * self.files.len();

        // Strings live between the entry table and the first file.
        let mut strings = Vec::new();
        let mut archive_name_address = 0;
        if let Some(name) = &self.archive_name {
            archive_name_address = table_end;
            strings.extend_from_slice(name.as_bytes());
            strings.push(0);
        }
        let mut metadata_addresses = Vec::with_capacity(self.files.len());
        for file in &self.files {
            match (&file.metadata, flags.metadata) {
                (Some(text), true) => {
                    metadata_addresses.push(table_end + strings.len());
                    strings.extend_from_slice(text.as_bytes());
                    strings.push(0);
                }
                _ => metadata_addresses.push(0),
            }
        }

        let first_bits = self.first_file_alignment.unwrap_or(self.alignment);
        let first_file_start = align_up(table_end + strings.len(), first_bits.max(self.alignment));
        let mut addresses = Vec::with_capacity(self.files.len());
        let mut cursor = first_file_start;
        for file in &self.files {
            addresses.push(cursor);
            cursor = align_up(cursor + file.data.len(), self.alignment);
        }
        let total = cursor.max(first_file_start);

        let mut out = vec![0u8; total];
        Fps4Header {
            file_entries: self.files.len() as u32,
            header_size: FPS4_HEADER_SIZE as u32,
            first_file_start: first_file_start as u32,
            entry_size: entry_size as u16,
            content_bitmask: flags.bitmask(),
            unknown2: self.unknown2,
            archive_name_address: archive_name_address as u32,
        }
        .write(&mut out, self.endian);
        out[table_end..table_end + strings.len()].copy_from_slice(&strings);

        for (index, file) in self.files.iter().enumerate() {
            let mut at = FPS4_HEADER_SIZE + index * entry_size;
            let start = addresses[index];
            let padded = align_up(file.data.len(), self.alignment);
            let sector = if self.set_sector_size_as_file_size {
                file.data.len()
            } else {
                padded
            };

            let mut put = |out: &mut [u8], at: &mut usize, value: u32| {
                self.endian.write_u32(&mut out[*at..*at + 4], value);
                *at += 4;
            };
            if flags.start_pointer {
                put(&mut out, &mut at, start as u32);
            }
            if flags.sector_size {
                put(&mut out, &mut at, sector as u32);
            }
            if flags.file_size {
                put(&mut out, &mut at, file.data.len() as u32);
            }
            if flags.filename {
                put_fixed(&mut out[at..at + 0x20], file.filename.as_deref());
                at += 0x20;
            }
            if flags.extension {
                put_fixed(&mut out[at..at + 8], file.extension.as_deref());
                at += 8;
            }
            if flags.file_type {
                put_fixed(&mut out[at..at + 4], file.file_type.as_deref());
                at += 4;
            }
            if flags.metadata {
                put(&mut out, &mut at, metadata_addresses[index] as u32);
            }
            if flags.unknown_0x80 {
                put(&mut out, &mut at, file.unknown_0x80.unwrap_or(0));
            }
            if flags.unknown_0x100 {
                put(&mut out, &mut at, file.unknown_0x100.unwrap_or(0));
            }

            out[start..start + file.data.len()].copy_from_slice(&file.data);
        }
        out
    }
}
