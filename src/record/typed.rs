use byteorder::{LittleEndian, ReadBytesExt};

use crate::errors::KcfError;
use crate::record::truncated;
use crate::record::{Record, ARCHIVE_HEADER, DATA_FRAGMENT, FILE_HEADER};

/// Archive wide metadata, the first record after the marker.
///
/// Only version 1 is ever produced; other versions are read and reported,
/// never rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u16,
}

impl ArchiveHeader {
    pub fn as_record(&self) -> Result<Record, KcfError> {
        let mut rec = Record {
            head_type: ARCHIVE_HEADER,
            body: self.version.to_le_bytes().to_vec(),
            ..Record::default()
        };
        rec.fix()?;
        Ok(rec)
    }

    pub fn from_record(rec: &Record) -> Result<ArchiveHeader, KcfError> {
        if !rec.validate_crc() || rec.head_type != ARCHIVE_HEADER {
            return Err(KcfError::InvalidFormat);
        }

        let mut cur: &[u8] = &rec.body;
        let version = cur.read_u16::<LittleEndian>().map_err(truncated)?;
        Ok(ArchiveHeader { version })
    }
}

/// Flag bits of a file header body. The wide unpacked-size flag contains
/// the narrow one, same pattern as the record level added-size flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileFlags(pub u8);

impl FileFlags {
    pub const HAS_TIMESTAMP: u8 = 0b0000_0001;
    pub const HAS_FILE_CRC32: u8 = 0b0000_0010;
    /// Unpacked size present, 4 byte field.
    pub const HAS_UNPACKED_4: u8 = 0b0000_0100;
    /// Unpacked size present, 8 byte field. Contains the 4 byte bit.
    pub const HAS_UNPACKED_8: u8 = 0b0000_1100;

    pub fn has_timestamp(self) -> bool {
        self.0 & Self::HAS_TIMESTAMP != 0
    }

    pub fn has_file_crc32(self) -> bool {
        self.0 & Self::HAS_FILE_CRC32 != 0
    }

    /// Byte width of the unpacked size field: 0, 4 or 8.
    pub fn unpacked_size_width(self) -> usize {
        if self.0 & Self::HAS_UNPACKED_8 == Self::HAS_UNPACKED_8 {
            8
        } else if self.0 & Self::HAS_UNPACKED_8 == Self::HAS_UNPACKED_4 {
            4
        } else {
            0
        }
    }
}

/// File kind byte. Unknown values are carried through untouched so foreign
/// archives survive a read-repack cycle; only extraction branches on the
/// directory bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileType(pub u8);

impl FileType {
    pub const REGULAR: FileType = FileType(0x46);
    pub const DIRECTORY: FileType = FileType(0x64);

    pub fn is_dir(self) -> bool {
        self == Self::DIRECTORY
    }
}

/// Per file metadata.
///
/// `compression_info`, `time_stamp` and `file_crc32` are carried as
/// stored; this codec neither populates nor interprets them beyond the
/// presence flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub file_flags: FileFlags,
    pub file_type: FileType,
    pub unpacked_size: u64,
    pub file_crc32: u32,
    pub compression_info: u32,
    pub time_stamp: u64,
    pub file_name: String,
}

impl FileHeader {
    pub fn as_record(&self) -> Result<Record, KcfError> {
        if self.file_name.len() > 65535 {
            return Err(KcfError::TooBigFileName);
        }

        let mut body: Vec<u8> = Vec::new();
        body.push(self.file_flags.0);
        body.push(self.file_type.0);

        match self.file_flags.unpacked_size_width() {
            4 => body.extend_from_slice(&(self.unpacked_size as u32).to_le_bytes()),
            8 => body.extend_from_slice(&self.unpacked_size.to_le_bytes()),
            _ => (),
        }

        if self.file_flags.has_file_crc32() {
            body.extend_from_slice(&self.file_crc32.to_le_bytes());
        }

        body.extend_from_slice(&self.compression_info.to_le_bytes());

        if self.file_flags.has_timestamp() {
            body.extend_from_slice(&self.time_stamp.to_le_bytes());
        }

        body.extend_from_slice(&(self.file_name.len() as u16).to_le_bytes());
        body.extend_from_slice(self.file_name.as_bytes());

        let mut rec = Record {
            head_type: FILE_HEADER,
            body,
            ..Record::default()
        };
        rec.fix()?;
        Ok(rec)
    }

    pub fn from_record(rec: &Record) -> Result<FileHeader, KcfError> {
        if !rec.validate_crc() {
            return Err(KcfError::CorruptedRecord);
        }
        if rec.head_type != FILE_HEADER {
            return Err(KcfError::InvalidFormat);
        }

        let mut cur: &[u8] = &rec.body;
        let file_flags = FileFlags(cur.read_u8().map_err(truncated)?);
        let file_type = FileType(cur.read_u8().map_err(truncated)?);

        let mut hdr = FileHeader {
            file_flags,
            file_type,
            unpacked_size: 0,
            file_crc32: 0,
            compression_info: 0,
            time_stamp: 0,
            file_name: String::new(),
        };

        match file_flags.unpacked_size_width() {
            4 => hdr.unpacked_size = cur.read_u32::<LittleEndian>().map_err(truncated)? as u64,
            8 => hdr.unpacked_size = cur.read_u64::<LittleEndian>().map_err(truncated)?,
            _ => (),
        }

        if file_flags.has_file_crc32() {
            hdr.file_crc32 = cur.read_u32::<LittleEndian>().map_err(truncated)?;
        }

        hdr.compression_info = cur.read_u32::<LittleEndian>().map_err(truncated)?;

        if file_flags.has_timestamp() {
            hdr.time_stamp = cur.read_u64::<LittleEndian>().map_err(truncated)?;
        }

        let name_len = cur.read_u16::<LittleEndian>().map_err(truncated)? as usize;
        if cur.len() < name_len {
            return Err(KcfError::InvalidFormat);
        }
        hdr.file_name =
            String::from_utf8(cur[..name_len].to_vec()).map_err(|_| KcfError::InvalidFormat)?;

        Ok(hdr)
    }
}

/// Continuation of a preceding record's payload. The body is empty, the
/// fragment exists only to frame its own added data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataFragment;

impl DataFragment {
    pub fn as_record(&self) -> Result<Record, KcfError> {
        let mut rec = Record {
            head_type: DATA_FRAGMENT,
            ..Record::default()
        };
        rec.fix()?;
        Ok(rec)
    }
}

#[cfg(test)]
mod test_typed_records {
    use super::*;

    #[test]
    fn archive_header_roundtrip() {
        let ahdr = ArchiveHeader { version: 1 };
        let rec = ahdr.as_record().unwrap();

        assert_eq!(rec.head_type, ARCHIVE_HEADER);
        assert_eq!(rec.head_size, 8);
        assert_eq!(ArchiveHeader::from_record(&rec).unwrap(), ahdr);
    }

    #[test]
    fn archive_header_other_versions_accepted() {
        let rec = ArchiveHeader { version: 7 }.as_record().unwrap();
        assert_eq!(ArchiveHeader::from_record(&rec).unwrap().version, 7);
    }

    #[test]
    fn archive_header_wrong_type() {
        let rec = DataFragment.as_record().unwrap();
        assert!(matches!(
            ArchiveHeader::from_record(&rec),
            Err(KcfError::InvalidFormat)
        ));
    }

    #[test]
    fn file_header_roundtrip_all_fields() {
        let hdr = FileHeader {
            file_flags: FileFlags(
                FileFlags::HAS_TIMESTAMP | FileFlags::HAS_FILE_CRC32 | FileFlags::HAS_UNPACKED_8,
            ),
            file_type: FileType::REGULAR,
            unpacked_size: u64::from(u32::MAX) + 42,
            file_crc32: 0xCAFEBABE,
            compression_info: 0x01020304,
            time_stamp: 0x1122334455667788,
            file_name: "dir/some file.bin".to_string(),
        };

        let rec = hdr.as_record().unwrap();
        assert_eq!(FileHeader::from_record(&rec).unwrap(), hdr);
    }

    #[test]
    fn file_header_roundtrip_minimal() {
        let hdr = FileHeader {
            file_flags: FileFlags(0),
            file_type: FileType::DIRECTORY,
            unpacked_size: 0,
            file_crc32: 0,
            compression_info: 0,
            time_stamp: 0,
            file_name: "d".to_string(),
        };

        let rec = hdr.as_record().unwrap();
        // flags, type, compression info, name length, one name byte
        assert_eq!(rec.body.len(), 1 + 1 + 4 + 2 + 1);
        assert_eq!(FileHeader::from_record(&rec).unwrap(), hdr);
    }

    #[test]
    fn file_header_unpacked_4_width() {
        let hdr = FileHeader {
            file_flags: FileFlags(FileFlags::HAS_UNPACKED_4),
            file_type: FileType::REGULAR,
            unpacked_size: 1234,
            file_crc32: 0,
            compression_info: 0,
            time_stamp: 0,
            file_name: "f".to_string(),
        };

        let rec = hdr.as_record().unwrap();
        assert_eq!(rec.body.len(), 1 + 1 + 4 + 4 + 2 + 1);
        assert_eq!(FileHeader::from_record(&rec).unwrap().unpacked_size, 1234);
    }

    #[test]
    fn file_name_length_enforced() {
        let hdr = FileHeader {
            file_flags: FileFlags(0),
            file_type: FileType::REGULAR,
            unpacked_size: 0,
            file_crc32: 0,
            compression_info: 0,
            time_stamp: 0,
            file_name: "x".repeat(65536),
        };
        assert!(matches!(hdr.as_record(), Err(KcfError::TooBigFileName)));

        let hdr = FileHeader {
            file_name: "x".repeat(65535),
            ..hdr
        };
        // The name fits u16 but the whole body overflows head_size
        assert!(matches!(hdr.as_record(), Err(KcfError::TooBigRecord)));
    }

    #[test]
    fn file_header_truncated_body() {
        let hdr = FileHeader {
            file_flags: FileFlags(FileFlags::HAS_TIMESTAMP | FileFlags::HAS_UNPACKED_4),
            file_type: FileType::REGULAR,
            unpacked_size: 9,
            file_crc32: 0,
            compression_info: 0,
            time_stamp: 77,
            file_name: "name".to_string(),
        };
        let mut rec = hdr.as_record().unwrap();

        // Chop the name off the body; the stored length now overruns
        rec.body.truncate(rec.body.len() - 2);
        rec.fix().unwrap();
        assert!(matches!(
            FileHeader::from_record(&rec),
            Err(KcfError::InvalidFormat)
        ));
    }

    #[test]
    fn data_fragment_is_empty() {
        let rec = DataFragment.as_record().unwrap();
        assert_eq!(rec.head_type, DATA_FRAGMENT);
        assert_eq!(rec.head_size, 6);
        assert!(rec.body.is_empty());
    }
}
