use thiserror::Error;

#[derive(Error, Debug)]
pub enum KcfError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid archive format")]
    InvalidFormat,
    #[error("record header checksum mismatch")]
    CorruptedRecord,
    #[error("added data checksum mismatch")]
    InvalidAddedData,
    #[error("too big file name, more than 65535 bytes")]
    TooBigFileName,
    #[error("too big record data")]
    TooBigRecord,
    #[error("operation not permitted in this archive state")]
    InvalidState,
    #[error("write has been limited")]
    WriteLimited,
}
