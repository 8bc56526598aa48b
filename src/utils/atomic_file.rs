//! Write-once file creation
//!
//! Content is written to a temporary file in the destination directory and
//! then linked into place without replacing an existing file. Readers never
//! see a partially written file, and when two writers race the first one wins.

use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Whether a write-once attempt created the file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    AlreadyExists,
}

/// Create `destination` with `contents` unless it already exists.
///
/// Blocking; call from `spawn_blocking` in async code.
pub fn write_once(destination: &Path, contents: &[u8]) -> io::Result<WriteOutcome> {
    let directory = destination
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(directory)?;

    let mut temp = NamedTempFile::new_in(directory)?;
    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    match temp.persist_noclobber(destination) {
        Ok(_) => Ok(WriteOutcome::Created),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(WriteOutcome::AlreadyExists),
        Err(e) => Err(e.error),
    }
}
