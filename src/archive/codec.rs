//! Payload container: a tar stream inside a gzip stream.
//!
//! The writer side favours speed over ratio. Archives are built once and run
//! many times, and build latency matters more than payload size here.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tar::{EntryType, Header};

/// Serializes entries into a compressed container.
pub struct EntryWriter<W: Write> {
    builder: tar::Builder<GzEncoder<W>>,
}

impl<W: Write> EntryWriter<W> {
    pub fn new(sink: W) -> Self {
        let mut builder = tar::Builder::new(GzEncoder::new(sink, Compression::fast()));
        builder.follow_symlinks(false);
        Self { builder }
    }

    pub fn append_dir(&mut self, path: &Path, mode: u32, mtime: u64) -> io::Result<()> {
        let mut header = new_header(EntryType::Directory, mode, mtime);
        self.builder.append_data(&mut header, path, io::empty())
    }

    pub fn append_symlink(
        &mut self,
        path: &Path,
        mode: u32,
        mtime: u64,
        target: &Path,
    ) -> io::Result<()> {
        let mut header = new_header(EntryType::Symlink, mode, mtime);
        self.builder.append_link(&mut header, path, target)
    }

    /// Append a regular file. Exactly `size` bytes are taken from `content`.
    pub fn append_file<R: Read>(
        &mut self,
        path: &Path,
        mode: u32,
        mtime: u64,
        size: u64,
        content: R,
    ) -> io::Result<()> {
        let mut header = new_header(EntryType::Regular, mode, mtime);
        header.set_size(size);
        self.builder
            .append_data(&mut header, path, content.take(size))
    }

    /// Write the container trailer, flush the compressor and hand back the sink.
    pub fn finish(self) -> io::Result<W> {
        self.builder.into_inner()?.finish()
    }
}

fn new_header(kind: EntryType, mode: u32, mtime: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_mtime(mtime);
    header.set_size(0);
    header
}

/// What an entry materializes as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink(PathBuf),
    /// Any other container entry type, by its raw type byte.
    Unsupported(u8),
}

/// Reads entries back out of a compressed container.
pub struct EntryReader<R: Read> {
    archive: tar::Archive<GzDecoder<R>>,
}

impl<R: Read> EntryReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            archive: tar::Archive::new(GzDecoder::new(source)),
        }
    }

    /// Lazily iterate over the entries. Only usable once per reader.
    pub fn entries(&mut self) -> io::Result<Entries<'_, R>> {
        Ok(Entries {
            inner: self.archive.entries()?,
        })
    }
}

pub struct Entries<'a, R: 'a + Read> {
    inner: tar::Entries<'a, GzDecoder<R>>,
}

impl<'a, R: 'a + Read> Iterator for Entries<'a, R> {
    type Item = io::Result<Entry<'a, R>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|entry| entry.and_then(Entry::new))
    }
}

/// One container entry. File entries are read through [`Read`].
pub struct Entry<'a, R: 'a + Read> {
    inner: tar::Entry<'a, GzDecoder<R>>,
    path: PathBuf,
    mode: u32,
    kind: EntryKind,
}

impl<'a, R: 'a + Read> Entry<'a, R> {
    fn new(inner: tar::Entry<'a, GzDecoder<R>>) -> io::Result<Self> {
        let path = inner.path()?.into_owned();
        let header = inner.header();
        let mode = header.mode()?;
        let entry_type = header.entry_type();

        let kind = if entry_type.is_file() {
            EntryKind::File
        } else if entry_type.is_dir() {
            EntryKind::Directory
        } else if entry_type.is_symlink() {
            let target = inner.link_name()?.ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("symlink without target: {}", path.display()),
                )
            })?;
            EntryKind::Symlink(target.into_owned())
        } else {
            EntryKind::Unsupported(entry_type.as_byte())
        };

        Ok(Self {
            inner,
            path,
            mode,
            kind,
        })
    }

    /// Relative path as recorded in the container.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Declared content length; zero for anything but files.
    pub fn size(&self) -> u64 {
        self.inner.size()
    }

    pub fn kind(&self) -> &EntryKind {
        &self.kind
    }
}

impl<'a, R: 'a + Read> Read for Entry<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_come_back_in_order_with_metadata() {
        let mut writer = EntryWriter::new(Vec::new());
        writer.append_dir(Path::new("sub"), 0o700, 0).unwrap();
        writer
            .append_file(Path::new("sub/b"), 0o640, 0, 5, &b"hello"[..])
            .unwrap();
        writer
            .append_symlink(Path::new("link"), 0o777, 0, Path::new("sub/b"))
            .unwrap();
        let data = writer.finish().unwrap();

        let mut reader = EntryReader::new(&data[..]);
        let mut seen = Vec::new();
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            seen.push((
                entry.path().to_path_buf(),
                entry.mode(),
                entry.kind().clone(),
                content,
            ));
        }

        assert_eq!(
            seen,
            vec![
                (PathBuf::from("sub"), 0o700, EntryKind::Directory, vec![]),
                (PathBuf::from("sub/b"), 0o640, EntryKind::File, b"hello".to_vec()),
                (
                    PathBuf::from("link"),
                    0o777,
                    EntryKind::Symlink(PathBuf::from("sub/b")),
                    vec![]
                ),
            ]
        );
    }

    #[test]
    fn file_content_is_cut_to_declared_size() {
        let mut writer = EntryWriter::new(Vec::new());
        writer
            .append_file(Path::new("a"), 0o644, 0, 2, &b"hi there"[..])
            .unwrap();
        let data = writer.finish().unwrap();

        let mut reader = EntryReader::new(&data[..]);
        let mut entry = reader.entries().unwrap().next().unwrap().unwrap();
        assert_eq!(entry.size(), 2);
        let mut content = String::new();
        entry.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hi");
    }

    #[test]
    fn corrupted_stream_is_an_error() {
        let garbage = vec![0x42u8; 1024];
        let mut reader = EntryReader::new(&garbage[..]);
        let failed = match reader.entries() {
            Err(_) => true,
            Ok(mut entries) => matches!(entries.next(), Some(Err(_))),
        };
        assert!(failed);
    }
}
