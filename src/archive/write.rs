use std::cmp;
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use log::debug;

use crate::buf::fill_buf;
use crate::errors::KcfError;
use crate::hash::Checksum;
use crate::record::{self, DataFragment, FileFlags, FileHeader, FileType, RecordFlags};
use crate::vol::Volume;

use super::state::{PackerPos, Stage};
use super::{Archive, BUF_SIZE};

/// Sink wrapper with a remaining byte budget. Writes truncate to the
/// budget; once it is spent further writes fail with
/// [`io::ErrorKind::WriteZero`], which the archive layer reports as
/// [`KcfError::WriteLimited`].
pub struct LimitedWriter<W> {
    inner: W,
    limit: u64,
}

impl<W: Write> LimitedWriter<W> {
    pub fn new(inner: W, limit: u64) -> Self {
        LimitedWriter { inner, limit }
    }

    pub fn remaining(&self) -> u64 {
        self.limit
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.limit == 0 {
            return Err(io::Error::new(
                io::ErrorKind::WriteZero,
                "write has been limited",
            ));
        }

        let want = cmp::min(buf.len() as u64, self.limit) as usize;
        let n = self.inner.write(&buf[..want])?;
        self.limit -= n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// One entry to pack: the metadata up front, the content behind a reader.
/// Directories carry no reader.
pub struct PackSource<R: Read> {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
    pub reader: Option<R>,
}

impl PackSource<File> {
    /// Stats `path` and prepares it for packing under that name, verbatim.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, KcfError> {
        let path = path.as_ref();
        let name = path.to_string_lossy().into_owned();
        let meta = std::fs::metadata(path)?;

        if meta.is_dir() {
            Ok(PackSource {
                name,
                size: 0,
                is_dir: true,
                reader: None,
            })
        } else {
            Ok(PackSource {
                name,
                size: meta.len(),
                is_dir: false,
                reader: Some(File::open(path)?),
            })
        }
    }
}

impl<V: Volume> Archive<V> {
    pub(crate) fn write_marker(&mut self) -> Result<(), KcfError> {
        if !self.state.is_writing() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage == Stage::Idle {
            self.state.stage = Stage::Marker;
        }
        if self.state.stage != Stage::Marker {
            return Err(KcfError::InvalidState);
        }

        self.vol.write_all(&record::MARKER)?;
        self.state.stage = Stage::RecordHeader;
        Ok(())
    }

    /// Writes one record header and arms payload streaming when the record
    /// declares added data. A payload still in flight is finished first.
    ///
    /// A record carrying added-data flags with a size of zero declares a
    /// payload of unknown length: the header is rewritten in place by
    /// [`Archive::finish_added_data`], which needs a seekable volume.
    pub fn write_record(&mut self, rec: &record::Record) -> Result<(), KcfError> {
        if !self.state.is_writing() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage == Stage::AddedData {
            self.finish_added_data()?;
        }
        if self.state.stage != Stage::RecordHeader {
            return Err(KcfError::InvalidState);
        }

        if let Some(pos) = self.vol.tell() {
            self.rec_offset = pos;
        }

        self.state.stage = Stage::RecordBody;
        rec.write_to(&mut self.vol)?;
        self.state.stage = Stage::RecordHeader;

        if rec.head_flags.has_added() {
            self.state.stage = Stage::AddedData;
            self.last_record = rec.clone();
            self.available = 0;
            self.written = 0;
            self.state.reset_added();

            if rec.added_size > 0 {
                self.state.added_size_known = true;
                self.available = rec.added_size;
            }
            if rec.head_flags.has_added_crc32() {
                self.state.has_added_crc = true;
                self.crc.reset();
                // A declared size plus the CRC flag means the CRC in the
                // record is authoritative, nothing to patch later
                self.state.added_crc_known = self.state.added_size_known;
            }
        }
        Ok(())
    }

    /// Streams payload bytes behind the last record written. With a
    /// declared size the write is budget limited; otherwise bytes flow
    /// straight through and the header is patched on finish.
    pub fn write_added_data(&mut self, buf: &[u8]) -> Result<usize, KcfError> {
        if !self.state.is_writing() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage != Stage::AddedData {
            return Err(KcfError::InvalidState);
        }

        let n = if self.state.added_size_known {
            let mut lw = LimitedWriter::new(&mut self.vol, self.available);
            match lw.write(buf) {
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WriteZero => {
                    return Err(KcfError::WriteLimited)
                }
                Err(e) => return Err(e.into()),
            }
        } else {
            self.vol.write(buf)?
        };

        if self.state.added_size_known {
            self.available -= n as u64;
        }
        self.written += n as u64;
        if self.state.has_added_crc {
            self.crc.update(&buf[..n]);
        }
        Ok(n)
    }

    /// Ends the current payload.
    ///
    /// When size and CRC were declared up front there is nothing left to
    /// do. Otherwise the record header is rewritten in place with the
    /// observed size and the running CRC, then the volume is repositioned
    /// to the end of the payload.
    pub fn finish_added_data(&mut self) -> Result<(), KcfError> {
        if !self.state.is_writing() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage != Stage::AddedData {
            return Err(KcfError::InvalidState);
        }

        if self.state.added_size_known && (!self.state.has_added_crc || self.state.added_crc_known)
        {
            self.state.stage = Stage::RecordHeader;
            self.state.reset_added();
            return Ok(());
        }

        // Deferred metadata: only reachable on a seekable volume
        self.rec_end_offset = self.vol.tell().ok_or(KcfError::InvalidState)?;

        if self.last_record.head_flags.added_size_width() == 4 && self.written > u64::from(u32::MAX)
        {
            return Err(KcfError::TooBigRecord);
        }
        self.last_record.added_size = self.written;
        if self.state.has_added_crc {
            self.last_record.added_crc32 = self.crc.finalize();
        }
        self.last_record.fix()?;

        self.vol.seek_to(self.rec_offset)?;
        self.last_record.write_to(&mut self.vol)?;
        self.vol.seek_to(self.rec_end_offset)?;

        self.state.stage = Stage::RecordHeader;
        self.state.reset_added();
        Ok(())
    }

    /// Packs one file or directory as a raw, uncompressed entry.
    pub fn pack_file<R: Read>(&mut self, src: PackSource<R>) -> Result<(), KcfError> {
        self.pack_file_chunked(src, BUF_SIZE)
    }

    pub(crate) fn pack_file_chunked<R: Read>(
        &mut self,
        mut src: PackSource<R>,
        fragment_size: usize,
    ) -> Result<(), KcfError> {
        if !self.state.is_writing() {
            return Err(KcfError::InvalidState);
        }
        if self.state.packer_pos != PackerPos::FileHeader {
            return Err(KcfError::InvalidState);
        }

        let mut hdr = FileHeader {
            file_flags: FileFlags(FileFlags::HAS_TIMESTAMP),
            file_type: if src.is_dir {
                FileType::DIRECTORY
            } else {
                FileType::REGULAR
            },
            unpacked_size: 0,
            file_crc32: 0,
            compression_info: 0,
            time_stamp: 0,
            file_name: src.name,
        };
        if !src.is_dir {
            hdr.file_flags.0 |= FileFlags::HAS_UNPACKED_4;
            if src.size > i32::MAX as u64 {
                hdr.file_flags.0 |= FileFlags::HAS_UNPACKED_8;
            }
            hdr.unpacked_size = src.size;
        }

        debug!("packing {} ({} bytes)", hdr.file_name, src.size);

        let mut rec = hdr.as_record()?;
        self.current_file = Some(hdr);

        if src.is_dir {
            self.write_record(&rec)?;
            self.state.packer_pos = PackerPos::FileHeader;
            return Ok(());
        }

        let mut reader = src.reader.take().ok_or(KcfError::InvalidState)?;

        rec.head_flags.0 |= RecordFlags::HAS_ADDED_4;
        if src.size > i32::MAX as u64 {
            rec.head_flags.0 |= RecordFlags::HAS_ADDED_8;
        }
        rec.added_size = src.size;

        if self.is_seekable {
            rec.fix()?;
            self.write_record(&rec)?;

            let mut buf = [0u8; BUF_SIZE];
            loop {
                let n = reader.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                self.write_added_data(&buf[..n])?;
            }
            self.finish_added_data()?;
        } else {
            // No seeking back: promise the payload in fragments instead
            rec.head_flags.0 &= !RecordFlags::HAS_ADDED_8;
            rec.head_flags.0 |= RecordFlags::CONTINUES;
            rec.added_size = 0;
            rec.fix()?;
            self.write_record(&rec)?;

            self.write_fragments(&mut reader, fragment_size)?;
        }

        self.state.packer_pos = PackerPos::FileHeader;
        Ok(())
    }

    /// Emits the payload as a chain of data fragment records, each framed
    /// with its own size and CRC-32C. One chunk of read-ahead lets the
    /// last fragment drop the continuation bit.
    fn write_fragments<R: Read>(
        &mut self,
        reader: &mut R,
        fragment_size: usize,
    ) -> Result<(), KcfError> {
        let mut cur = vec![0u8; fragment_size];
        let mut next = vec![0u8; fragment_size];

        let (mut eof, mut cur_len) = fill_buf(reader, &mut cur)?;

        loop {
            let next_len = if eof {
                0
            } else {
                let (hit_eof, n) = fill_buf(reader, &mut next)?;
                eof = hit_eof;
                n
            };
            let last = next_len == 0;

            let mut frag = DataFragment.as_record()?;
            if cur_len > 0 {
                frag.head_flags.0 |= RecordFlags::HAS_ADDED_4 | RecordFlags::HAS_ADDED_CRC32;
                frag.added_size = cur_len as u64;

                let mut crc = Checksum::new();
                crc.update(&cur[..cur_len]);
                frag.added_crc32 = crc.finalize();
            }
            if !last {
                frag.head_flags.0 |= RecordFlags::CONTINUES;
            }
            frag.fix()?;

            debug!("fragment, {} bytes, continues: {}", cur_len, !last);
            self.write_record(&frag)?;
            if cur_len > 0 {
                self.write_added_data(&cur[..cur_len])?;
                self.finish_added_data()?;
            }

            if last {
                break;
            }
            std::mem::swap(&mut cur, &mut next);
            cur_len = next_len;
        }
        Ok(())
    }
}
