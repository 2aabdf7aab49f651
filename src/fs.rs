//! Local filesystem access through ambient `cap-std` directories.

use std::io;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

/// Splits `path` into the directory to open and the entry inside it.
fn split(path: &Utf8Path) -> io::Result<(&Utf8Path, &Utf8Path)> {
    let file_name = path.file_name().ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("path has no file name: {path}"),
        )
    })?;
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    Ok((parent, Utf8Path::new(file_name)))
}

/// Opens `path` as a capability directory.
pub(crate) fn open_dir(path: &Utf8Path) -> io::Result<Dir> {
    Dir::open_ambient_dir(path, ambient_authority())
}

/// Opens `path`, creating it and its parents first when missing.
pub(crate) fn create_dir_all(path: &Utf8Path) -> io::Result<Dir> {
    Dir::create_ambient_dir_all(path, ambient_authority())?;
    open_dir(path)
}

/// Reads a UTF-8 file. A missing file or parent reports
/// [`io::ErrorKind::NotFound`].
pub(crate) fn read_to_string(path: &Utf8Path) -> io::Result<String> {
    let (parent, file_name) = split(path)?;
    open_dir(parent)?.read_to_string(file_name)
}
