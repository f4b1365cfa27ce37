//! Stream access for an archive handle.
//!
//! A volume is always byte-sequential; what separates the two write
//! strategies is whether an absolute position query succeeds. `File` and
//! `Cursor` volumes can seek, a [`Streaming`] volume never admits to it
//! and forces the fragmented write path.

use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};

pub trait Volume: Read + Write {
    /// Absolute stream position, or `None` when the volume cannot seek.
    fn tell(&mut self) -> Option<u64>;

    /// Repositions the volume. Fails on a non-seekable volume.
    fn seek_to(&mut self, pos: u64) -> io::Result<()>;
}

impl Volume for File {
    fn tell(&mut self) -> Option<u64> {
        self.stream_position().ok()
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.seek(SeekFrom::Start(pos)).map(|_| ())
    }
}

impl Volume for Cursor<Vec<u8>> {
    fn tell(&mut self) -> Option<u64> {
        Some(self.position())
    }

    fn seek_to(&mut self, pos: u64) -> io::Result<()> {
        self.set_position(pos);
        Ok(())
    }
}

/// Hides the seekability of whatever it wraps.
pub struct Streaming<T>(pub T);

impl<T> Streaming<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T: Read> Read for Streaming<T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<T: Write> Write for Streaming<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl<T: Read + Write> Volume for Streaming<T> {
    fn tell(&mut self) -> Option<u64> {
        None
    }

    fn seek_to(&mut self, _pos: u64) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "seek on a streaming volume",
        ))
    }
}
