use std::io::{self, Read, Write};

use log::debug;

use crate::errors::KcfError;
use crate::record::{self, Record};
use crate::vol::Volume;

use super::state::{PackerPos, Stage};
use super::{Archive, BUF_SIZE};

impl<V: Volume> Archive<V> {
    /// Byte-wise scan for the marker, tolerating leading garbage. Keeps a
    /// six byte sliding window; EOF before a match is a format error.
    pub(crate) fn scan_for_marker(&mut self) -> Result<(), KcfError> {
        if !self.state.is_reading() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage == Stage::Idle {
            self.state.stage = Stage::Marker;
        }
        if self.state.stage != Stage::Marker {
            return Err(KcfError::InvalidState);
        }

        let mut window = [0u8; 6];
        let mut byte = [0u8; 1];
        loop {
            if let Err(e) = self.vol.read_exact(&mut byte) {
                return match e.kind() {
                    io::ErrorKind::UnexpectedEof => Err(KcfError::InvalidFormat),
                    _ => Err(e.into()),
                };
            }

            window.rotate_left(1);
            window[5] = byte[0];
            if window == record::MARKER {
                break;
            }
        }

        debug!("marker found");
        self.state.stage = Stage::RecordHeader;
        Ok(())
    }

    /// Reads the next record header and arms payload streaming when the
    /// record declares added data. `None` on a clean end of stream.
    pub(crate) fn read_record(&mut self) -> Result<Option<Record>, KcfError> {
        if !self.state.is_reading() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage != Stage::RecordHeader {
            return Err(KcfError::InvalidState);
        }

        self.state.stage = Stage::RecordBody;
        let rec = match Record::read_from(&mut self.vol)? {
            Some(rec) => rec,
            None => {
                self.state.stage = Stage::RecordHeader;
                return Ok(None);
            }
        };
        self.state.stage = Stage::RecordHeader;

        debug!(
            "record {:#04x} flags {:#010b} size {} added {}",
            rec.head_type, rec.head_flags.0, rec.head_size, rec.added_size
        );

        if rec.head_flags.has_added() && rec.added_size > 0 {
            self.available = rec.added_size;
            self.state.added_size_known = true;
            if rec.head_flags.has_added_crc32() {
                self.valid_crc = rec.added_crc32;
                self.crc.reset();
                self.state.has_added_crc = true;
            }
            self.state.stage = Stage::AddedData;
        } else {
            self.available = 0;
        }

        self.last_record = rec.clone();
        Ok(Some(rec))
    }

    /// Length-limited read of the current payload.
    ///
    /// Feeds the running CRC when one was declared and verifies it the
    /// moment the byte budget drains; a mismatch is
    /// [`KcfError::InvalidAddedData`].
    pub fn read_added_data(&mut self, buf: &mut [u8]) -> Result<usize, KcfError> {
        if !self.state.is_reading() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage != Stage::AddedData {
            return Err(KcfError::InvalidState);
        }
        if self.available == 0 || buf.is_empty() {
            return Ok(0);
        }

        let n = (&mut self.vol).take(self.available).read(buf)?;
        if n == 0 {
            // Volume ran dry with payload budget remaining
            return Err(KcfError::InvalidFormat);
        }
        self.available -= n as u64;

        if self.state.has_added_crc {
            self.crc.update(&buf[..n]);
            if self.available == 0 && self.crc.finalize() != self.valid_crc {
                return Err(KcfError::InvalidAddedData);
            }
        }

        if self.available == 0 {
            self.state.stage = Stage::RecordHeader;
            self.state.reset_added();
        }
        Ok(n)
    }

    /// Consumes the rest of the current payload without validating it.
    pub fn skip_added_data(&mut self) -> Result<(), KcfError> {
        if !self.state.is_reading() {
            return Err(KcfError::InvalidState);
        }
        if self.state.stage != Stage::AddedData {
            return Err(KcfError::InvalidState);
        }

        let n = io::copy(&mut (&mut self.vol).take(self.available), &mut io::sink())?;
        if n < self.available {
            return Err(KcfError::InvalidFormat);
        }

        self.available = 0;
        self.state.stage = Stage::RecordHeader;
        self.state.reset_added();
        Ok(())
    }

    /// Reads and discards the next record together with its payload,
    /// without validating the payload CRC. Returns whether a record was
    /// there at all.
    pub fn skip_record(&mut self) -> Result<bool, KcfError> {
        if self.read_record()?.is_none() {
            return Ok(false);
        }
        if self.state.stage == Stage::AddedData {
            self.skip_added_data()?;
        }
        Ok(true)
    }

    /// Streams the current file's payload into `sink`, transparently
    /// rejoining fragment chains. Leaves the handle at the next file
    /// header.
    pub fn unpack_file<W: Write>(&mut self, sink: &mut W) -> Result<u64, KcfError> {
        if !self.state.is_reading() {
            return Err(KcfError::InvalidState);
        }

        if self.state.packer_pos == PackerPos::FileHeader && self.current_file()?.is_none() {
            return Err(KcfError::InvalidFormat);
        }
        if self.state.packer_pos != PackerPos::FileData {
            return Err(KcfError::InvalidState);
        }

        let mut buf = [0u8; BUF_SIZE];
        let mut total: u64 = 0;

        loop {
            while self.available > 0 {
                let n = self.read_added_data(&mut buf)?;
                sink.write_all(&buf[..n])?;
                total += n as u64;
            }

            // An exhausted payload either chains into a data fragment or
            // ends the file
            if self.last_record.head_flags.continues() {
                let rec = self.read_record()?.ok_or(KcfError::InvalidFormat)?;
                if rec.head_type != record::DATA_FRAGMENT {
                    return Err(KcfError::InvalidFormat);
                }
                continue;
            }
            break;
        }

        self.state.packer_pos = PackerPos::FileHeader;
        Ok(total)
    }
}
