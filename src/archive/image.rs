//! Self-image inspection.
//!
//! The running executable reads its own file to decide which role it plays:
//!
//! 1. Read at most `limit + KEY_LEN` bytes from the start of the image
//! 2. Search the first `limit` bytes for the boundary marker
//! 3. No boundary and the whole image fitted: plain tool, builder mode
//! 4. Boundary found: split into stub, key and a lazily read payload
//!
//! Detection only needs a [`ReadAt`] source, so it works the same on the real
//! executable and on synthetic buffers.

use std::time::Instant;

use anyhow::{Context, Result};
use log::debug;

use super::layout::{BOUNDARY_LEN, KEY_LEN, Key, MAX_BOUNDARY_OFFSET, boundary};
use crate::error::Error;
use crate::io::{PayloadReader, ReadAt};

/// What the image turned out to be.
pub enum SelfImage<R: ReadAt> {
    /// No archive attached; `stub` is the whole image.
    Builder { stub: Vec<u8> },
    /// A built archive with its identity key and the compressed payload.
    Extractor {
        stub: Vec<u8>,
        key: Key,
        payload: PayloadReader<R>,
    },
}

impl<R: ReadAt> SelfImage<R> {
    /// Inspect `reader` using the default search limit.
    pub fn identify(reader: R) -> Result<Self> {
        Self::identify_within(reader, MAX_BOUNDARY_OFFSET)
    }

    /// Inspect `reader`, looking for the boundary in the first `limit` bytes only.
    ///
    /// # Errors
    ///
    /// Fails when the image cannot be read, when it is longer than `limit`
    /// but carries no boundary inside it, or when it ends before the key.
    pub fn identify_within(reader: R, limit: u64) -> Result<Self> {
        let size = reader.size();
        let window = size.min(limit.saturating_add(KEY_LEN as u64));

        let started = Instant::now();
        let mut buf = vec![0u8; usize::try_from(window).context("image window too large")?];
        let n = reader
            .read_full_at(0, &mut buf)
            .context("reading itself")?;
        buf.truncate(n);
        debug!("read itself in {:?}", started.elapsed());

        let search_end = buf.len().min(usize::try_from(limit).unwrap_or(usize::MAX));
        let started = Instant::now();
        let found = find_boundary(&buf[..search_end]);
        debug!("boundary search completed in {:?}", started.elapsed());

        let Some(offset) = found else {
            if size > limit {
                return Err(Error::BoundaryNotFound { limit }.into());
            }
            debug!("no boundary");
            return Ok(SelfImage::Builder { stub: buf });
        };
        debug!("boundary found at {offset}");

        let key_start = offset + BOUNDARY_LEN;
        let payload_start = key_start + KEY_LEN;
        let key_bytes = buf
            .get(key_start..payload_start)
            .ok_or(Error::TruncatedKey {
                expected: KEY_LEN,
                found: buf.len() - key_start,
            })?;
        let key = Key::from_bytes(key_bytes.try_into()?);
        debug!("key: {key}");

        let payload = PayloadReader::new(reader, payload_start as u64);
        debug!(
            "payload: {} bytes at offset {}",
            payload.len(),
            payload.start()
        );

        buf.truncate(offset);
        Ok(SelfImage::Extractor {
            stub: buf,
            key,
            payload,
        })
    }

    /// The executable prefix, shared by both roles.
    pub fn stub(&self) -> &[u8] {
        match self {
            SelfImage::Builder { stub } | SelfImage::Extractor { stub, .. } => stub,
        }
    }

    pub fn is_builder(&self) -> bool {
        matches!(self, SelfImage::Builder { .. })
    }
}

/// Offset of the first boundary occurrence in `haystack`.
fn find_boundary(haystack: &[u8]) -> Option<usize> {
    let needle = boundary();
    haystack
        .windows(BOUNDARY_LEN)
        .position(|window| window == needle)
}
