use std::path::{Component, Path, PathBuf};

/// Lexically clean a relative path.
///
/// `.` components are dropped. Returns `None` when the path is absolute or
/// climbs with `..`, since it could then land outside its base directory.
/// An empty result means the path names the base directory itself.
pub fn clean_relative(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => out.push(part),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}
