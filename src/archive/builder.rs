use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use log::debug;
use walkdir::WalkDir;

use super::codec::EntryWriter;
use super::layout::{Key, boundary};
use super::path::clean_relative;
use crate::error::Error;

/// Outcome of a successful build.
#[derive(Debug)]
pub struct BuildReport {
    pub output: PathBuf,
    pub key: Key,
    pub entries: usize,
}

/// Write a new self-extracting archive to `output`.
///
/// The file gets `stub`, the boundary, a freshly generated key, and then the
/// compressed container holding every entry below each of `inputs`. Inputs
/// are resolved against `base_dir` and recorded relative to it.
///
/// # Errors
///
/// Any failure aborts the build and leaves `output` incomplete.
pub fn build(stub: &[u8], output: &Path, inputs: &[PathBuf], base_dir: &Path) -> Result<BuildReport> {
    if inputs.is_empty() {
        return Err(Error::NoInputs.into());
    }

    let file = File::create(output)
        .with_context(|| format!("opening output file {}", output.display()))?;
    let mut out = BufWriter::new(file);

    out.write_all(stub).context("writing stub to output file")?;
    out.write_all(&boundary())
        .context("writing boundary to output file")?;
    let key = Key::generate()?;
    out.write_all(key.as_bytes())
        .context("writing key to output file")?;

    let mut writer = EntryWriter::new(out);
    let mut entries = 0;
    for input in inputs {
        entries += archive_input(&mut writer, base_dir, input)?;
    }

    let out = writer.finish().context("closing archive")?;
    let file = out
        .into_inner()
        .map_err(|e| e.into_error())
        .context("flushing output file")?;
    file.set_permissions(fs::Permissions::from_mode(0o755))
        .context("making output file executable")?;

    Ok(BuildReport {
        output: output.to_path_buf(),
        key,
        entries,
    })
}

/// Walk one input and append everything under it. Returns the entry count.
fn archive_input<W: Write>(
    writer: &mut EntryWriter<W>,
    base_dir: &Path,
    input: &Path,
) -> Result<usize> {
    let relative = clean_relative(input).ok_or_else(|| Error::InvalidInput {
        path: input.to_path_buf(),
    })?;
    let root = if relative.as_os_str().is_empty() {
        base_dir.to_path_buf()
    } else {
        base_dir.join(&relative)
    };

    let mut count = 0;
    for entry in WalkDir::new(&root)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("opening input file {}", input.display()))?;
        let path = entry
            .path()
            .strip_prefix(base_dir)
            .with_context(|| format!("relativizing {}", entry.path().display()))?;
        if path.as_os_str().is_empty() {
            continue;
        }
        debug!("archiving {}", path.display());

        let metadata = entry
            .metadata()
            .with_context(|| format!("getting info about file {}", path.display()))?;
        let mode = metadata.permissions().mode() & 0o7777;
        let mtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs());

        let file_type = entry.file_type();
        if file_type.is_dir() {
            writer
                .append_dir(path, mode, mtime)
                .with_context(|| format!("writing directory {} to archive", path.display()))?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())
                .with_context(|| format!("getting target of symlink {}", path.display()))?;
            writer
                .append_symlink(path, mode, mtime, &target)
                .with_context(|| format!("writing symlink {} to archive", path.display()))?;
        } else if file_type.is_file() {
            let content = File::open(entry.path())
                .with_context(|| format!("opening file {}", path.display()))?;
            writer
                .append_file(path, mode, mtime, metadata.len(), content)
                .with_context(|| format!("writing file {} to archive", path.display()))?;
        } else {
            return Err(Error::UnsupportedFileType {
                path: path.to_path_buf(),
            }
            .into());
        }
        count += 1;
    }

    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::os::unix::fs::symlink;

    use super::*;
    use crate::archive::codec::{EntryKind, EntryReader};
    use crate::archive::image::SelfImage;
    use crate::io::LocalFileReader;

    fn sample_tree(root: &Path) {
        fs::create_dir_all(root.join("data/sub")).unwrap();
        fs::write(root.join("data/a"), b"hi").unwrap();
        fs::set_permissions(root.join("data/a"), fs::Permissions::from_mode(0o644)).unwrap();
        fs::write(root.join("data/sub/b"), b"bee").unwrap();
        fs::set_permissions(root.join("data/sub/b"), fs::Permissions::from_mode(0o600)).unwrap();
        symlink("sub/b", root.join("data/link")).unwrap();
    }

    fn read_entries(archive: &Path) -> (Vec<u8>, Key, Vec<(PathBuf, u32, EntryKind, Vec<u8>)>) {
        let reader = LocalFileReader::new(archive).unwrap();
        let SelfImage::Extractor { stub, key, payload } = SelfImage::identify(reader).unwrap()
        else {
            panic!("built archive should be detected as extractor");
        };

        let mut reader = EntryReader::new(payload);
        let mut entries = Vec::new();
        for entry in reader.entries().unwrap() {
            let mut entry = entry.unwrap();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            entries.push((
                entry.path().to_path_buf(),
                entry.mode(),
                entry.kind().clone(),
                content,
            ));
        }
        (stub, key, entries)
    }

    #[test]
    fn builds_executable_archive() {
        let temp = tempfile::tempdir().unwrap();
        sample_tree(temp.path());
        let output = temp.path().join("out.bin");

        let report = build(b"STUB", &output, &[PathBuf::from("data")], temp.path()).unwrap();
        assert_eq!(report.entries, 5);
        assert_eq!(report.output, output);

        let mode = fs::metadata(&output).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        let (stub, key, entries) = read_entries(&output);
        assert_eq!(stub, b"STUB");
        assert_eq!(key, report.key);

        let summary: Vec<_> = entries
            .iter()
            .map(|(path, _, kind, content)| (path.to_str().unwrap(), kind.clone(), content.as_slice()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("data", EntryKind::Directory, &b""[..]),
                ("data/a", EntryKind::File, &b"hi"[..]),
                ("data/link", EntryKind::Symlink(PathBuf::from("sub/b")), &b""[..]),
                ("data/sub", EntryKind::Directory, &b""[..]),
                ("data/sub/b", EntryKind::File, &b"bee"[..]),
            ]
        );
        assert_eq!(entries[1].1, 0o644);
        assert_eq!(entries[4].1, 0o600);
    }

    #[test]
    fn dot_input_archives_base_contents_without_root() {
        let temp = tempfile::tempdir().unwrap();
        let base = temp.path().join("base");
        fs::create_dir(&base).unwrap();
        fs::write(base.join("only"), b"x").unwrap();
        let output = temp.path().join("out.bin");

        let report = build(b"", &output, &[PathBuf::from(".")], &base).unwrap();
        assert_eq!(report.entries, 1);

        let (_, _, entries) = read_entries(&output);
        assert_eq!(entries[0].0, PathBuf::from("only"));
    }

    #[test]
    fn each_build_gets_a_new_key() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("f"), b"x").unwrap();
        let inputs = [PathBuf::from("f")];

        let first = build(b"", &temp.path().join("one"), &inputs, temp.path()).unwrap();
        let second = build(b"", &temp.path().join("two"), &inputs, temp.path()).unwrap();
        assert_ne!(first.key, second.key);
    }

    #[test]
    fn requires_inputs() {
        let temp = tempfile::tempdir().unwrap();
        let err = build(b"", &temp.path().join("out"), &[], temp.path()).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::NoInputs)));
    }

    #[test]
    fn rejects_inputs_outside_base() {
        let temp = tempfile::tempdir().unwrap();
        let err = build(
            b"",
            &temp.path().join("out"),
            &[PathBuf::from("../elsewhere")],
            temp.path(),
        )
        .unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::InvalidInput { .. })));
    }

    #[test]
    fn missing_input_is_fatal() {
        let temp = tempfile::tempdir().unwrap();
        let result = build(
            b"",
            &temp.path().join("out"),
            &[PathBuf::from("missing")],
            temp.path(),
        );
        assert!(result.is_err());
    }

    #[test]
    fn sockets_are_unsupported() {
        let temp = tempfile::tempdir().unwrap();
        let _listener = std::os::unix::net::UnixListener::bind(temp.path().join("sock")).unwrap();

        let err = build(
            b"",
            &temp.path().join("out"),
            &[PathBuf::from("sock")],
            temp.path(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnsupportedFileType { .. })
        ));
    }
}
