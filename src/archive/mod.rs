//! Self-extracting archive format, building and extraction.
//!
//! ## Layout
//!
//! An archive is an executable followed by its payload:
//!
//! ```text
//! stub | boundary (64 bytes) | key (16 bytes) | gzip(tar)
//! ```
//!
//! 1. The stub is the tool's own executable image
//! 2. The boundary is the SHA-512 digest of `"boundary"`, computed at run time
//! 3. The key is random per build and identifies the archive
//! 4. The payload is a compressed tar stream of files, directories and symlinks
//!
//! ## Architecture
//!
//! - [`layout`]: Format constants and the [`Key`] type
//! - [`image`]: Splits the running executable into stub, key and payload
//! - [`codec`]: Entry writer and reader over tar + gzip
//! - [`builder`]: Writes a new archive from a set of input paths
//! - [`extractor`]: Prepares, reuses or cleans an extraction directory and unpacks into it

pub mod builder;
pub mod codec;
pub mod extractor;
pub mod image;
pub mod layout;
mod path;

pub use builder::{BuildReport, build};
pub use codec::{EntryKind, EntryReader, EntryWriter};
pub use extractor::{DirState, ExtractReport, ExtractionDir};
pub use image::SelfImage;
pub use layout::{
    BOUNDARY_LEN, KEY_FILE_NAME, KEY_LEN, Key, MAX_BOUNDARY_OFFSET, boundary,
};
