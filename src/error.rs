use std::path::PathBuf;

/// Failures with a meaning of their own. Plain IO and codec errors travel as
/// [`std::io::Error`] inside the surrounding [`anyhow::Error`] context chain.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("boundary not found before byte {limit}")]
    BoundaryNotFound { limit: u64 },

    #[error("archive ends inside the key: expected {expected} bytes, found {found}")]
    TruncatedKey { expected: usize, found: usize },

    #[error("no files to archive")]
    NoInputs,

    #[error("input path must be relative and stay below the base directory: {}", path.display())]
    InvalidInput { path: PathBuf },

    #[error("unsupported file type: {}", path.display())]
    UnsupportedFileType { path: PathBuf },

    #[error("unsupported entry type {kind:#04x} in archive: {}", path.display())]
    UnsupportedEntry { path: PathBuf, kind: u8 },

    #[error("entry path escapes the extraction directory: {}", path.display())]
    UnsafePath { path: PathBuf },

    #[error("extraction directory is not a directory: {}", path.display())]
    NotADirectory { path: PathBuf },
}
