//! # selfextract
//!
//! Build and run self-extracting executable archives.
//!
//! One binary plays two roles. Run as is, it is a tool that packages files
//! into a new executable. That executable is the tool itself with a compressed
//! payload appended; when run, it unpacks the payload to a directory, launches
//! the startup program found there, and exits with its exit code.
//!
//! ## Features
//!
//! - Role detection by inspecting the executable's own bytes
//! - gzip-compressed tar payload of files, directories and symlinks
//! - Reuse of a persistent extraction directory that already holds the same archive
//! - Signal handling with a configurable grace period before exiting
//!
//! ## Example
//!
//! ```no_run
//! use std::path::{Path, PathBuf};
//! use selfextract::{ExtractionDir, LocalFileReader, SelfImage};
//!
//! fn main() -> anyhow::Result<()> {
//!     let exe = std::env::current_exe()?;
//!     match SelfImage::identify(LocalFileReader::new(&exe)?)? {
//!         SelfImage::Builder { stub } => {
//!             selfextract::build(&stub, Path::new("app.run"), &[PathBuf::from("app")], Path::new("."))?;
//!         }
//!         SelfImage::Extractor { key, payload, .. } => {
//!             let dir = ExtractionDir::prepare(None, key)?;
//!             dir.extract(payload)?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod logging;

pub use archive::{ExtractionDir, Key, SelfImage, build};
pub use cli::Cli;
pub use config::Config;
pub use error::Error;
pub use io::{LocalFileReader, PayloadReader, ReadAt};
