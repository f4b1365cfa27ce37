use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::errors::KcfError;
use crate::hash::Checksum;
use crate::record::truncated;

// Permitted max for head_size, body included
pub(crate) const MAX_HEAD_SIZE: usize = 65535;

/// Flag bits of a record header.
///
/// The wide added-size flag contains the narrow one, so width tests mask
/// with `HAS_ADDED_8` and compare against the pattern; `has_added` alone
/// answers "any payload at all".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordFlags(pub u8);

impl RecordFlags {
    /// Added payload present, 4 byte size field.
    pub const HAS_ADDED_4: u8 = 0b1000_0000;
    /// Added payload present, 8 byte size field. Contains the 4 byte bit.
    pub const HAS_ADDED_8: u8 = 0b1100_0000;
    /// Added payload CRC-32C field present.
    pub const HAS_ADDED_CRC32: u8 = 0b0010_0000;
    /// More payload follows in subsequent data fragment records.
    pub const CONTINUES: u8 = 0b0000_0001;

    pub fn has_added(self) -> bool {
        self.0 & Self::HAS_ADDED_4 != 0
    }

    pub fn has_added_crc32(self) -> bool {
        self.0 & Self::HAS_ADDED_CRC32 != 0
    }

    pub fn continues(self) -> bool {
        self.0 & Self::CONTINUES != 0
    }

    /// Byte width of the added size field: 0, 4 or 8.
    pub fn added_size_width(self) -> usize {
        if self.0 & Self::HAS_ADDED_8 == Self::HAS_ADDED_8 {
            8
        } else if self.0 & Self::HAS_ADDED_8 == Self::HAS_ADDED_4 {
            4
        } else {
            0
        }
    }

    /// Byte width of the added CRC field: 0 or 4.
    pub fn added_crc_width(self) -> usize {
        if self.has_added_crc32() {
            4
        } else {
            0
        }
    }
}

/// One framed unit of the archive.
///
/// The added payload travels after the record on the wire and is never
/// buffered here; the header only carries its declared size and CRC.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Record {
    pub head_crc: u16,
    pub head_type: u8,
    pub head_flags: RecordFlags,
    pub head_size: u16,

    pub added_size: u64,
    pub added_crc32: u32,

    pub body: Vec<u8>,
}

impl Record {
    /// Serialized header bytes, conditional fields chosen by the flags.
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(6 + 12 + self.body.len());
        buf.extend_from_slice(&self.head_crc.to_le_bytes());
        buf.push(self.head_type);
        buf.push(self.head_flags.0);
        buf.extend_from_slice(&self.head_size.to_le_bytes());

        match self.head_flags.added_size_width() {
            4 => buf.extend_from_slice(&(self.added_size as u32).to_le_bytes()),
            8 => buf.extend_from_slice(&self.added_size.to_le_bytes()),
            _ => (),
        }

        if self.head_flags.has_added_crc32() {
            buf.extend_from_slice(&self.added_crc32.to_le_bytes());
        }

        buf.extend_from_slice(&self.body);
        buf
    }

    // CRC-32C of the serialized header minus the head_crc field itself,
    // truncated to the low 16 bits
    fn compute_head_crc(&self) -> u16 {
        let mut crc = Checksum::new();
        crc.update(&self.marshal()[2..]);
        (crc.finalize() & 0xFFFF) as u16
    }

    pub fn validate_crc(&self) -> bool {
        self.compute_head_crc() == self.head_crc
    }

    /// Recomputes `head_size` and `head_crc` after the flags, the body or
    /// the added metadata changed. Must run before the record goes out on
    /// the wire.
    pub fn fix(&mut self) -> Result<(), KcfError> {
        let head =
            6 + self.head_flags.added_size_width() + self.head_flags.added_crc_width();
        let total = head + self.body.len();
        if total > MAX_HEAD_SIZE {
            return Err(KcfError::TooBigRecord);
        }

        self.head_size = total as u16;
        self.head_crc = self.compute_head_crc();
        Ok(())
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<u64, KcfError> {
        let buf = self.marshal();
        w.write_all(&buf)?;
        Ok(buf.len() as u64)
    }

    /// Parses one record off the stream and verifies its header CRC.
    ///
    /// Returns `None` on a clean end of stream, i.e. EOF exactly on a
    /// record boundary. EOF anywhere inside the header is a format error.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Option<Record>, KcfError> {
        let mut header = [0u8; 6];
        let mut got = 0;
        while got < header.len() {
            let n = r.read(&mut header[got..])?;
            if n == 0 {
                if got == 0 {
                    return Ok(None);
                }
                return Err(KcfError::InvalidFormat);
            }
            got += n;
        }

        let head_size = u16::from_le_bytes([header[4], header[5]]) as usize;
        if head_size < 6 {
            return Err(KcfError::InvalidFormat);
        }

        let mut rest = vec![0u8; head_size - 6];
        r.read_exact(&mut rest).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => KcfError::InvalidFormat,
            _ => KcfError::Io(e),
        })?;

        let mut rec = Record {
            head_crc: u16::from_le_bytes([header[0], header[1]]),
            head_type: header[2],
            head_flags: RecordFlags(header[3]),
            head_size: head_size as u16,
            ..Record::default()
        };

        let mut cur: &[u8] = &rest;
        match rec.head_flags.added_size_width() {
            4 => rec.added_size = cur.read_u32::<LittleEndian>().map_err(truncated)? as u64,
            8 => rec.added_size = cur.read_u64::<LittleEndian>().map_err(truncated)?,
            _ => (),
        }
        if rec.head_flags.has_added_crc32() {
            rec.added_crc32 = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        }
        rec.body = cur.to_vec();

        if !rec.validate_crc() {
            return Err(KcfError::CorruptedRecord);
        }
        Ok(Some(rec))
    }
}
