//! ZIP record layouts (classic PKZIP, stored entries, no ZIP64)
//!
//! Each record is a plain struct serialized through [`LeWriter`]; every
//! multi-byte field is little-endian.

use chrono::{Datelike, NaiveDateTime, Timelike};

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;

pub const LOCAL_FILE_HEADER_LEN: usize = 30;
pub const CENTRAL_DIRECTORY_HEADER_LEN: usize = 46;
pub const END_OF_CENTRAL_DIRECTORY_LEN: usize = 22;

/// Version 2.0: the minimum for plain stored files
pub const VERSION_NEEDED: u16 = 20;
pub const VERSION_MADE_BY: u16 = 20;
pub const METHOD_STORED: u16 = 0;

/// Append-only little-endian byte buffer
#[derive(Debug, Default)]
pub struct LeWriter {
    buf: Vec<u8>,
}

impl LeWriter {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { buf: Vec::with_capacity(capacity) }
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(value);
        self
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// MS-DOS packed time and date
///
/// Two-second resolution; years before 1980 clamp to 1980.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosDateTime {
    pub time: u16,
    pub date: u16,
}

impl DosDateTime {
    pub fn from_datetime(dt: &NaiveDateTime) -> Self {
        let year = dt.year().clamp(1980, 1980 + 127) as u16;
        let time = ((dt.hour() as u16 & 0x1F) << 11)
            | ((dt.minute() as u16 & 0x3F) << 5)
            | ((dt.second() as u16 / 2) & 0x1F);
        let date = (((year - 1980) & 0x7F) << 9)
            | ((dt.month() as u16 & 0x0F) << 5)
            | (dt.day() as u16 & 0x1F);
        Self { time, date }
    }

    /// Current local time
    pub fn now() -> Self {
        Self::from_datetime(&chrono::Local::now().naive_local())
    }
}

/// Fields shared by the local header and the central directory record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMeta<'a> {
    pub name: &'a [u8],
    pub crc32: u32,
    /// Stored entries: compressed size == uncompressed size
    pub size: u32,
    pub modified: DosDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileHeader<'a> {
    pub meta: EntryMeta<'a>,
}

impl LocalFileHeader<'_> {
    pub fn encoded_len(&self) -> usize {
        LOCAL_FILE_HEADER_LEN + self.meta.name.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let meta = &self.meta;
        let mut w = LeWriter::with_capacity(self.encoded_len());
        w.u32(LOCAL_FILE_HEADER_SIGNATURE)
            .u16(VERSION_NEEDED)
            .u16(0) // flags
            .u16(METHOD_STORED)
            .u16(meta.modified.time)
            .u16(meta.modified.date)
            .u32(meta.crc32)
            .u32(meta.size)
            .u32(meta.size)
            .u16(meta.name.len() as u16)
            .u16(0) // extra field length
            .bytes(meta.name);
        w.into_inner()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryHeader<'a> {
    pub meta: EntryMeta<'a>,
    pub local_header_offset: u32,
}

impl CentralDirectoryHeader<'_> {
    pub fn encoded_len(&self) -> usize {
        CENTRAL_DIRECTORY_HEADER_LEN + self.meta.name.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let meta = &self.meta;
        let mut w = LeWriter::with_capacity(self.encoded_len());
        w.u32(CENTRAL_DIRECTORY_SIGNATURE)
            .u16(VERSION_MADE_BY)
            .u16(VERSION_NEEDED)
            .u16(0) // flags
            .u16(METHOD_STORED)
            .u16(meta.modified.time)
            .u16(meta.modified.date)
            .u32(meta.crc32)
            .u32(meta.size)
            .u32(meta.size)
            .u16(meta.name.len() as u16)
            .u16(0) // extra field length
            .u16(0) // comment length
            .u16(0) // disk number start
            .u16(0) // internal attributes
            .u32(0) // external attributes
            .u32(self.local_header_offset)
            .bytes(meta.name);
        w.into_inner()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
}

impl EndOfCentralDirectory {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut w = LeWriter::with_capacity(END_OF_CENTRAL_DIRECTORY_LEN);
        w.u32(END_OF_CENTRAL_DIRECTORY_SIGNATURE)
            .u16(0) // this disk
            .u16(0) // disk with central directory
            .u16(self.entries)
            .u16(self.entries)
            .u32(self.cd_size)
            .u32(self.cd_offset)
            .u16(0); // comment length
        w.into_inner()
    }
}
