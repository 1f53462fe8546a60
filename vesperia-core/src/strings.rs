//! Reader for the extracted string dictionary (`string_dic`).
//!
//! The code section is a stream of records separated by `0xFFFFFFFF`
//! markers. Records of length 0x64 or 0x48 describe one string; the fields
//! sit at fixed distances from the record's end.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::layout::{ensure_len, Record, TssHeader};
use crate::{Result, VesperiaError};

const MARKER: [u8; 4] = [0xFF; 4];
const STRING_RECORD_LENGTHS: [usize; 2] = [0x64, 0x48];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringEntry {
    pub id_type: u8,
    pub string_id: u32,
    pub pointer_jpn: u32,
    pub pointer_eng: u32,
    pub text: String,
}

fn find_marker(bytes: &[u8], from: usize, end: usize) -> Option<usize> {
    bytes
        .get(from..end)?
        .windows(MARKER.len())
        .position(|window| window == MARKER)
        .map(|found| found + from)
}

fn decode_record(record: &[u8]) -> (u8, u32, u32, u32) {
    let len = record.len();
    let id_type = record[len - 0x32];
    let string_id = if id_type != 0 {
        LittleEndian::read_u32(&record[len - 0x30..])
    } else {
        u32::from(LittleEndian::read_u16(&record[len - 0x30..]))
    };
    let pointer_jpn = LittleEndian::read_u32(&record[len - 0x20..]);
    let pointer_eng = LittleEndian::read_u32(&record[len - 0x10..]);
    (id_type, string_id, pointer_jpn, pointer_eng)
}

/// Reads the NUL-terminated string at `start`. `None` when it is not UTF-8.
fn read_text(bytes: &[u8], start: usize, string_id: u32) -> Result<Option<String>> {
    let tail = bytes.get(start..).unwrap_or_default();
    let end = tail.iter().position(|b| *b == 0).ok_or_else(|| VesperiaError::MalformedRecord {
        record: "StringEntry",
        offset: start,
        reason: format!("string {string_id} has no terminator"),
    })?;
    Ok(std::str::from_utf8(&tail[..end]).ok().map(str::to_string))
}

/// Parses every English string in the dictionary, in code order.
pub fn parse_strings(bytes: &[u8]) -> Result<Vec<StringEntry>> {
    let header: TssHeader = TssHeader::decode(bytes, 0)?;
    let code_start = header.code_start as usize;
    let code_len = header.code_length as usize;
    ensure_len(TssHeader::NAME, bytes, code_start, code_len)?;
    let code_end = code_start + code_len;
    let text_start = header.text_start as usize;

    let mut entries = Vec::new();
    let mut skipped = 0;
    let mut last = code_start;
    while let Some(marker) = find_marker(bytes, last + MARKER.len(), code_end) {
        let record = &bytes[last..marker];
        last = marker;
        if !STRING_RECORD_LENGTHS.contains(&record.len()) {
            continue;
        }

        let (id_type, string_id, pointer_jpn, pointer_eng) = decode_record(record);
        match read_text(bytes, text_start + pointer_eng as usize, string_id)? {
            Some(text) => entries.push(StringEntry { id_type, string_id, pointer_jpn, pointer_eng, text }),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::debug!("Skipped {skipped} strings that are not valid UTF-8");
    }
    log::info!("Read {} strings", entries.len());
    Ok(entries)
}

pub fn read_strings(path: &Path) -> Result<Vec<StringEntry>> {
    parse_strings(&fs::read(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::FixedString;

    fn string_record(len: usize, lead_marker: bool, id_type: u8, string_id: u32, eng: u32) -> Vec<u8> {
        let mut record = vec![0u8; len];
        if lead_marker {
            record[..4].copy_from_slice(&MARKER);
        }
        record[len - 0x32] = id_type;
        if id_type != 0 {
            LittleEndian::write_u32(&mut record[len - 0x30..], string_id);
        } else {
            LittleEndian::write_u16(&mut record[len - 0x30..], string_id as u16);
        }
        LittleEndian::write_u32(&mut record[len - 0x20..], 0x7000 + eng);
        LittleEndian::write_u32(&mut record[len - 0x10..], eng);
        record
    }

    fn dictionary() -> Vec<u8> {
        let mut code = string_record(0x64, false, 1, 50143, 0);
        code.extend(string_record(0x48, true, 0, 321, 6));
        code.extend(string_record(0x48, true, 0, 9, 12));
        // Too short to be a string record.
        code.extend(MARKER);
        code.extend([1, 2, 3, 4]);
        code.extend(MARKER);

        let text = b"Hello\0World\0\xff\xfe\0";
        let header = TssHeader {
            magic_number: FixedString::new("TSS"),
            code_start: TssHeader::SIZE as u32,
            code_length: code.len() as u32,
            text_start: (TssHeader::SIZE + code.len()) as u32,
            text_length: text.len() as u32,
            ..Default::default()
        };

        let mut bytes = header.encode();
        bytes.extend(code);
        bytes.extend(text);
        bytes
    }

    #[test]
    fn string_records_are_read_in_order() {
        let entries = parse_strings(&dictionary()).unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].id_type, 1);
        assert_eq!(entries[0].string_id, 50143);
        assert_eq!(entries[0].pointer_jpn, 0x7000);
        assert_eq!(entries[0].text, "Hello");

        assert_eq!(entries[1].string_id, 321);
        assert_eq!(entries[1].pointer_eng, 6);
        assert_eq!(entries[1].text, "World");
    }

    #[test]
    fn short_id_ignores_the_high_half() {
        let mut record = string_record(0x48, true, 0, 321, 0);
        record[0x48 - 0x2E] = 0xAB;
        assert_eq!(decode_record(&record).1, 321);
    }

    #[test]
    fn truncated_code_section_is_malformed() {
        let mut bytes = dictionary();
        bytes.truncate(TssHeader::SIZE + 0x20);
        assert!(matches!(parse_strings(&bytes), Err(VesperiaError::MalformedRecord { .. })));
    }

    #[test]
    fn unterminated_string_is_malformed() {
        let mut bytes = dictionary();
        bytes.pop();
        assert!(matches!(parse_strings(&bytes), Err(VesperiaError::MalformedRecord { .. })));
    }
}
