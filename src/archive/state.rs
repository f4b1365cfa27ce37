//! Parser state of an archive handle, kept as independent axes: the
//! transfer direction, the framing position within a record, the semantic
//! position within the archive, and the per-payload bookkeeping flags.

/// Transfer direction, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Reading,
    Writing,
}

/// Framing position within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// Before anything went over the wire.
    Idle,
    /// The marker is due next.
    Marker,
    /// At a record boundary, a header is due next.
    RecordHeader,
    /// A record header or body is on the wire right now.
    RecordBody,
    /// Between a record and the end of its added payload.
    AddedData,
}

/// Semantic position within the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PackerPos {
    ArchiveStart,
    FileHeader,
    FileData,
    // TODO: produce this once metadata records exist; current_file already
    // accepts it
    #[allow(dead_code)]
    FileMetadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct State {
    pub mode: Mode,
    pub stage: Stage,
    pub packer_pos: PackerPos,

    /// The running payload CRC is live for the current record.
    pub has_added_crc: bool,
    /// The payload length was declared up front in the record header.
    pub added_size_known: bool,
    /// The payload CRC was declared up front in the record header.
    pub added_crc_known: bool,
}

impl State {
    pub fn new(mode: Mode) -> State {
        State {
            mode,
            stage: Stage::Idle,
            packer_pos: PackerPos::ArchiveStart,
            has_added_crc: false,
            added_size_known: false,
            added_crc_known: false,
        }
    }

    pub fn is_reading(&self) -> bool {
        self.mode == Mode::Reading
    }

    pub fn is_writing(&self) -> bool {
        self.mode == Mode::Writing
    }

    /// Clears the per-payload flags once a record's added data is done.
    pub fn reset_added(&mut self) {
        self.has_added_crc = false;
        self.added_size_known = false;
        self.added_crc_known = false;
    }
}
