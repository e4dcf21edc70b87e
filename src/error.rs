use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong between raw input bytes and finished
/// artifacts. Only [`Error::UnmappedAddress`] and index errors carry the
/// exact location; the malformed variants carry a human-readable description
/// of the structural problem instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("metadata version {0} is outside the supported range 16..=31")]
    UnsupportedVersion(u32),

    #[error("could not disambiguate metadata version {0}: no candidate layout fits the table sizes")]
    AmbiguousVersion(u32),

    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),

    #[error("unrecognized executable magic {0:#010x}")]
    UnsupportedBinaryFormat(u32),

    #[error("malformed binary: {0}")]
    MalformedBinary(String),

    #[error("virtual address {0:#x} is outside every mapped segment")]
    UnmappedAddress(u64),

    #[error("could not locate CodeRegistration/MetadataRegistration")]
    RegistrationNotFound,

    #[error("{table} index {index} is out of range (table has {len} entries)")]
    CorruptIndex {
        table: &'static str,
        index: i64,
        len: usize,
    },

    #[error("unexpected end of data at offset {0:#x}")]
    UnexpectedEof(usize),

    #[error("missing NUL terminator for string at offset {0:#x}")]
    MalformedString(usize),
}
