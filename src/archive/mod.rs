//! Archive level state machine.
//!
//! Drives the record sequence
//! `marker → archive-header → (file-header → payload [→ fragment payload]*)*`
//! for both directions. Writing on a seekable volume declares payload sizes
//! up front (or patches the header once the payload is known); writing on a
//! streaming volume splits every payload into a chain of CRC-framed data
//! fragment records instead.

mod read;
mod state;
mod write;

pub use write::{LimitedWriter, PackSource};

use std::fs::File;
use std::io::Write;
use std::path::Path;

use log::debug;

use crate::errors::KcfError;
use crate::hash::Checksum;
use crate::record::{ArchiveHeader, FileHeader, Record};
use crate::vol::Volume;

use state::{Mode, PackerPos, Stage, State};

// Payload copy granularity, also the production fragment size
pub(crate) const BUF_SIZE: usize = 4096;

/// One open archive, reading or writing.
///
/// The handle owns the volume for its lifetime; [`Archive::close`]
/// finishes any payload still in flight and hands the volume back. A
/// handle is strictly single threaded, callers wanting parallelism run
/// one handle per volume.
pub struct Archive<V: Volume> {
    vol: V,
    state: State,

    /// Remaining byte budget of the current added payload.
    available: u64,
    /// Payload bytes written since the current record went out.
    written: u64,
    /// Where the current record started, for the header patch.
    rec_offset: u64,
    /// End of the payload, restored after the header patch.
    rec_end_offset: u64,
    /// CRC declared by the current record, checked once `available` drains.
    valid_crc: u32,

    is_seekable: bool,

    crc: Checksum,

    last_record: Record,
    current_file: Option<FileHeader>,
    archive_hdr: Option<ArchiveHeader>,
}

impl Archive<File> {
    /// Creates `path` and opens it as a fresh archive for writing.
    pub fn create_path<P: AsRef<Path>>(path: P) -> Result<Self, KcfError> {
        Ok(Archive::create(File::create(path)?))
    }

    /// Opens an existing archive at `path` for reading.
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, KcfError> {
        Ok(Archive::open(File::open(path)?))
    }
}

impl<V: Volume> Archive<V> {
    /// Opens a write handle over `vol`.
    pub fn create(vol: V) -> Self {
        Self::with_mode(vol, Mode::Writing)
    }

    /// Opens a read handle over `vol`.
    pub fn open(vol: V) -> Self {
        Self::with_mode(vol, Mode::Reading)
    }

    fn with_mode(mut vol: V, mode: Mode) -> Self {
        let is_seekable = vol.tell().is_some();
        Archive {
            vol,
            state: State::new(mode),
            available: 0,
            written: 0,
            rec_offset: 0,
            rec_end_offset: 0,
            valid_crc: 0,
            is_seekable,
            crc: Checksum::new(),
            last_record: Record::default(),
            current_file: None,
            archive_hdr: None,
        }
    }

    pub fn is_seekable(&self) -> bool {
        self.is_seekable
    }

    pub fn is_writable(&self) -> bool {
        self.state.is_writing()
    }

    /// Emits or consumes the marker and the archive header record.
    pub fn init(&mut self) -> Result<(), KcfError> {
        if self.state.packer_pos != PackerPos::ArchiveStart {
            return Err(KcfError::InvalidState);
        }

        if self.state.is_writing() {
            self.write_marker()?;
            let ahdr = ArchiveHeader { version: 1 };
            let rec = ahdr.as_record()?;
            self.write_record(&rec)?;
            self.archive_hdr = Some(ahdr);
        } else {
            self.scan_for_marker()?;
            let rec = self.read_record()?.ok_or(KcfError::InvalidFormat)?;
            let ahdr = ArchiveHeader::from_record(&rec)?;
            debug!("archive header, version {}", ahdr.version);
            self.archive_hdr = Some(ahdr);
        }

        self.state.packer_pos = PackerPos::FileHeader;
        Ok(())
    }

    /// The version record `init` emitted or consumed.
    pub fn archive_header(&self) -> Option<&ArchiveHeader> {
        self.archive_hdr.as_ref()
    }

    /// File header the read cursor is at.
    ///
    /// Reads the next record on first call, then keeps answering the same
    /// header until the payload is consumed. `None` once the archive is
    /// exhausted.
    pub fn current_file(&mut self) -> Result<Option<FileHeader>, KcfError> {
        if !self.state.is_reading() {
            return Err(KcfError::InvalidState);
        }

        match self.state.packer_pos {
            PackerPos::ArchiveStart => Err(KcfError::InvalidState),
            PackerPos::FileHeader => {
                let rec = match self.read_record()? {
                    Some(rec) => rec,
                    None => return Ok(None),
                };

                let hdr = FileHeader::from_record(&rec)?;
                debug!("file header: {} ({} bytes)", hdr.file_name, hdr.unpacked_size);
                self.current_file = Some(hdr.clone());
                self.state.packer_pos = PackerPos::FileData;
                Ok(Some(hdr))
            }
            PackerPos::FileData | PackerPos::FileMetadata => Ok(self.current_file.clone()),
        }
    }

    /// Finishes any in-flight payload and hands the volume back.
    pub fn close(mut self) -> Result<V, KcfError> {
        if self.state.is_writing() {
            if self.state.stage == Stage::AddedData {
                self.finish_added_data()?;
            }
            self.vol.flush()?;
        }
        Ok(self.vol)
    }
}

#[cfg(test)]
mod test_archive_roundtrip {
    use super::*;
    use crate::record::FileType;
    use crate::vol::Streaming;
    use std::io::Cursor;

    fn source(name: &str, data: &[u8]) -> PackSource<Cursor<Vec<u8>>> {
        PackSource {
            name: name.to_string(),
            size: data.len() as u64,
            is_dir: false,
            reader: Some(Cursor::new(data.to_vec())),
        }
    }

    fn dir_source(name: &str) -> PackSource<Cursor<Vec<u8>>> {
        PackSource {
            name: name.to_string(),
            size: 0,
            is_dir: true,
            reader: None,
        }
    }

    fn pack_seekable(files: &[(&str, &[u8])]) -> Vec<u8> {
        let mut kcf = Archive::create(Cursor::new(Vec::new()));
        kcf.init().unwrap();
        for (name, data) in files {
            kcf.pack_file(source(name, data)).unwrap();
        }
        kcf.close().unwrap().into_inner()
    }

    fn pack_streamed(files: &[(&str, &[u8])], chunk: usize) -> Vec<u8> {
        let mut kcf = Archive::create(Streaming(Cursor::new(Vec::new())));
        assert!(!kcf.is_seekable());
        kcf.init().unwrap();
        for (name, data) in files {
            kcf.pack_file_chunked(source(name, data), chunk).unwrap();
        }
        kcf.close().unwrap().into_inner().into_inner()
    }

    fn unpack_all(bytes: Vec<u8>) -> Vec<(String, Vec<u8>)> {
        let mut kcf = Archive::open(Cursor::new(bytes));
        kcf.init().unwrap();
        assert_eq!(kcf.archive_header().unwrap().version, 1);

        let mut out = vec![];
        while let Some(hdr) = kcf.current_file().unwrap() {
            let mut data = vec![];
            kcf.unpack_file(&mut data).unwrap();
            out.push((hdr.file_name, data));
        }
        kcf.close().unwrap();
        out
    }

    #[test]
    fn empty_archive() {
        let bytes = pack_seekable(&[]);
        // Marker plus the 8 byte archive header record
        assert_eq!(bytes.len(), 14);
        assert_eq!(&bytes[..6], &crate::record::MARKER);

        assert!(unpack_all(bytes).is_empty());
    }

    #[test]
    fn empty_file() {
        let bytes = pack_seekable(&[("empty.txt", b"")]);
        let out = unpack_all(bytes);
        assert_eq!(out, vec![("empty.txt".to_string(), vec![])]);
    }

    #[test]
    fn small_file_inline() {
        let bytes = pack_seekable(&[("a.bin", &[0x00, 0x01, 0x02, 0x03])]);
        let out = unpack_all(bytes);
        assert_eq!(out, vec![("a.bin".to_string(), vec![0x00, 0x01, 0x02, 0x03])]);
    }

    #[test]
    fn small_file_fragmented() {
        let bytes = pack_streamed(&[("a.bin", &[0x00, 0x01, 0x02, 0x03])], 2);
        let out = unpack_all(bytes);
        assert_eq!(out, vec![("a.bin".to_string(), vec![0x00, 0x01, 0x02, 0x03])]);
    }

    #[test]
    fn empty_file_fragmented() {
        let bytes = pack_streamed(&[("empty.txt", b"")], 2);
        let out = unpack_all(bytes);
        assert_eq!(out, vec![("empty.txt".to_string(), vec![])]);
    }

    #[test]
    fn fragmented_and_inline_extract_identically() {
        let data: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let files: &[(&str, &[u8])] = &[("blob", &data)];

        // Any chunking must reconstruct the same bytes the inline payload does
        let inline = unpack_all(pack_seekable(files));
        for chunk in [1, 7, 4096, 100_000] {
            let fragged = unpack_all(pack_streamed(files, chunk));
            assert_eq!(fragged, inline);
        }
    }

    #[test]
    fn multiple_files() {
        let files: &[(&str, &[u8])] = &[
            ("one", b"first contents"),
            ("two", b""),
            ("three", b"third"),
        ];

        let out = unpack_all(pack_seekable(files));
        assert_eq!(out.len(), 3);
        for ((name, data), (out_name, out_data)) in files.iter().zip(&out) {
            assert_eq!(name, out_name);
            assert_eq!(*data, &out_data[..]);
        }
    }

    #[test]
    fn directories_roundtrip() {
        let mut kcf = Archive::create(Cursor::new(Vec::new()));
        kcf.init().unwrap();
        kcf.pack_file(dir_source("some/dir")).unwrap();
        kcf.pack_file(source("some/dir/file", b"payload")).unwrap();
        let bytes = kcf.close().unwrap().into_inner();

        let mut kcf = Archive::open(Cursor::new(bytes));
        kcf.init().unwrap();

        let hdr = kcf.current_file().unwrap().unwrap();
        assert_eq!(hdr.file_name, "some/dir");
        assert!(hdr.file_type.is_dir());
        assert_eq!(hdr.file_flags.unpacked_size_width(), 0);
        let mut sink: Vec<u8> = vec![];
        assert_eq!(kcf.unpack_file(&mut sink).unwrap(), 0);

        let hdr = kcf.current_file().unwrap().unwrap();
        assert_eq!(hdr.file_type, FileType::REGULAR);
        let mut data = vec![];
        kcf.unpack_file(&mut data).unwrap();
        assert_eq!(data, b"payload");

        assert!(kcf.current_file().unwrap().is_none());
    }

    #[test]
    fn current_file_is_idempotent_before_unpack() {
        let bytes = pack_seekable(&[("a", b"x")]);
        let mut kcf = Archive::open(Cursor::new(bytes));
        kcf.init().unwrap();

        let first = kcf.current_file().unwrap().unwrap();
        let second = kcf.current_file().unwrap().unwrap();
        assert_eq!(first, second);

        let mut data = vec![];
        kcf.unpack_file(&mut data).unwrap();
        assert_eq!(data, b"x");
    }

    #[test]
    fn payload_bitflip_detected_in_fragment() {
        let mut bytes = pack_streamed(&[("a", b"abcdefgh")], 4);

        // The payload of the last fragment sits at the tail of the stream
        let last = bytes.len() - 1;
        bytes[last] ^= 0x04;

        let mut kcf = Archive::open(Cursor::new(bytes));
        kcf.init().unwrap();
        kcf.current_file().unwrap().unwrap();

        let mut data: Vec<u8> = vec![];
        assert!(matches!(
            kcf.unpack_file(&mut data),
            Err(KcfError::InvalidAddedData)
        ));
    }

    #[test]
    fn init_twice_is_invalid_state() {
        let bytes = pack_seekable(&[]);
        let mut kcf = Archive::open(Cursor::new(bytes));
        kcf.init().unwrap();
        assert!(matches!(kcf.init(), Err(KcfError::InvalidState)));
    }

    #[test]
    fn mode_mismatch_is_invalid_state() {
        let mut kcf = Archive::create(Cursor::new(Vec::new()));
        kcf.init().unwrap();
        assert!(matches!(kcf.current_file(), Err(KcfError::InvalidState)));

        let bytes = pack_seekable(&[]);
        let mut kcf = Archive::open(Cursor::new(bytes));
        kcf.init().unwrap();
        assert!(matches!(
            kcf.pack_file(source("a", b"x")),
            Err(KcfError::InvalidState)
        ));
    }
}
