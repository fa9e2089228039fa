use thiserror::Error;

/// Errors raised while parsing a binary UPK package.
///
/// Any of these makes the file unusable as a symbol source; the caller
/// reports it and moves on to the next file.
#[derive(Debug, Error)]
pub enum PackageFormatError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bad package magic: 0x{magic:08X}")]
    BadMagic { magic: u32 },

    #[error("unsupported package version: {version}/{licensee}")]
    UnsupportedVersion { version: u16, licensee: u16 },

    #[error("unexpected EOF while reading {what} at 0x{offset:X}")]
    UnexpectedEof { what: &'static str, offset: usize },

    #[error("{table} table out of range: offset=0x{offset:X}, count={count}, file_len=0x{len:X}")]
    TableOutOfRange {
        table: &'static str,
        offset: u32,
        count: u32,
        len: usize,
    },

    #[error("malformed string at 0x{offset:X}: {reason}")]
    BadString { offset: usize, reason: &'static str },

    #[error("name index out of range: {index} (name_count={count})")]
    NameIndexOutOfRange { index: u32, count: u32 },
}

/// Errors raised by the hex codec when text cannot be decoded back to bytes.
#[derive(Debug, Error)]
pub enum HexFormatError {
    #[error("invalid hex byte token: {token:?}")]
    BadToken { token: String },

    #[error("expected {expected} hex byte tokens, got {got}")]
    BadLength { expected: usize, got: usize },
}

/// Errors raised while tokenizing one code line of a mod script.
///
/// The document parser downgrades the offending line to a plain hex leaf and
/// records the error as a diagnostic; it never aborts the whole parse.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("string literal not terminated before end of line")]
    TruncatedString,

    #[error("truncated operand for opcode 0x{opcode:02X}: {needed} more byte tokens needed")]
    TruncatedOperand { opcode: u8, needed: usize },

    #[error("unknown opcode 0x{opcode:02X}")]
    UnknownOpcode { opcode: u8 },

    #[error("stray token: {token:?}")]
    StrayToken { token: String },
}

/// Batch-mode misuse on the document.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("document is already in batch mode")]
    AlreadyBatched,

    #[error("document is not in batch mode")]
    NotBatched,
}

/// Errors raised while applying an offset-tracked patch batch.
///
/// A patch error aborts the remaining patches of the current batch. Patches
/// already written stay in the buffer; the document is re-derived and left in
/// a consistent state, so the caller should re-extract before retrying.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch text mismatch at corrected offset {offset}: expected {expected:?}, found {found:?}")]
    OffsetMismatch {
        offset: usize,
        expected: String,
        found: String,
    },

    #[error("patch at corrected offset {offset} overlaps the previous patch ending at {previous}")]
    OutOfOrder { offset: usize, previous: usize },

    #[error("document has no GUID attribute line")]
    MissingIdentifier,

    #[error(transparent)]
    Document(#[from] DocumentError),
}
