//! Filesystem helpers for producing output documents.
//!
//! Every write goes through the same sequence:
//! - write to a temp file in the destination directory (avoids cross-device renames)
//! - flush + `sync_all`
//! - rename into place, replacing any existing file
//!
//! A failure at any point removes the temp file and leaves the destination untouched, so a
//! caller never observes a half-written document.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

#[derive(Debug)]
pub enum AtomicWriteError<E> {
    Io(io::Error),
    Writer(E),
}

impl<E> From<io::Error> for AtomicWriteError<E> {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl<E: std::fmt::Display> std::fmt::Display for AtomicWriteError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AtomicWriteError::Io(err) => write!(f, "io error: {err}"),
            AtomicWriteError::Writer(err) => write!(f, "write error: {err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for AtomicWriteError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AtomicWriteError::Io(err) => Some(err),
            AtomicWriteError::Writer(err) => Some(err),
        }
    }
}

impl AtomicWriteError<io::Error> {
    /// Collapse the two io-typed variants into a single [`io::Error`].
    pub fn into_io(self) -> io::Error {
        match self {
            AtomicWriteError::Io(err) | AtomicWriteError::Writer(err) => err,
        }
    }
}

/// The directory a destination file lives in.
///
/// `Path::parent` returns `Some("")` for bare relative file names like `out.xlsx`; that maps
/// to the current directory.
pub fn parent_dir_or_dot(path: &Path) -> &Path {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Atomically write `dest` using `write_fn` to fill a temp file.
///
/// Parent directories are created when missing. If `write_fn` returns an error, the
/// destination file is left untouched.
pub fn atomic_write<T, E>(
    dest: impl AsRef<Path>,
    write_fn: impl FnOnce(&mut File) -> Result<T, E>,
) -> Result<T, AtomicWriteError<E>> {
    let dest = dest.as_ref();
    let dir = parent_dir_or_dot(dest);
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    let out = write_fn(tmp.as_file_mut()).map_err(AtomicWriteError::Writer)?;

    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;

    // Dropping the `TempPath` on an error below removes the temp file.
    let tmp_path = tmp.into_temp_path();
    fs::rename(&tmp_path, dest)?;
    // The file now lives at `dest`; there is nothing left to clean up.
    let _ = tmp_path.keep();

    if let Err(err) = sync_parent_dir(dest) {
        log::debug!("could not sync directory of {}: {err}", dest.display());
    }

    Ok(out)
}

/// Copy the raw bytes of `src` to `dest` atomically.
///
/// Unlike [`std::fs::copy`], a failure part-way through never leaves a truncated `dest`
/// behind. Returns the number of bytes copied.
pub fn atomic_copy(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> io::Result<u64> {
    let src = src.as_ref();
    let dest = dest.as_ref();
    let mut input = File::open(src)?;
    let copied = atomic_write(dest, |file| io::copy(&mut input, file))
        .map_err(AtomicWriteError::into_io)?;
    log::debug!(
        "copied {copied} bytes from {} to {}",
        src.display(),
        dest.display()
    );
    Ok(copied)
}

fn sync_parent_dir(path: &Path) -> io::Result<()> {
    // Opening a directory as a file works on most Unix platforms; elsewhere this is
    // best-effort and callers ignore the error.
    File::open(parent_dir_or_dot(path))?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files_in(dir: &Path) -> Vec<std::path::PathBuf> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .expect("read_dir")
            .map(|e| e.expect("dir entry").path())
            .filter(|p| p.is_file())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn atomic_write_creates_missing_parent_directories() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let dest = tmp.path().join("nested/out/report.xlsx");

        atomic_write(&dest, |file| file.write_all(b"payload")).expect("atomic write");
        assert_eq!(fs::read(&dest).expect("read dest"), b"payload");
    }

    #[test]
    fn atomic_write_does_not_clobber_existing_file_on_writer_error() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let dest = tmp.path().join("existing.xlsx");
        fs::write(&dest, b"sentinel").expect("write sentinel");

        let err = atomic_write(&dest, |file| {
            file.write_all(b"partial").expect("write temp");
            Err::<(), _>(io::Error::new(io::ErrorKind::Other, "simulated failure"))
        })
        .expect_err("writer error should propagate");
        assert!(matches!(err, AtomicWriteError::Writer(_)));

        assert_eq!(fs::read(&dest).expect("read dest"), b"sentinel");
        assert_eq!(files_in(tmp.path()), vec![dest], "temp file should be removed");
    }

    #[test]
    fn atomic_copy_replaces_destination_with_source_bytes() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let src = tmp.path().join("template.xlsx");
        let dest = tmp.path().join("copy.xlsx");
        fs::write(&src, b"template-bytes").expect("write src");
        fs::write(&dest, b"stale").expect("write stale dest");

        let copied = atomic_copy(&src, &dest).expect("copy");
        assert_eq!(copied, 14);
        assert_eq!(fs::read(&dest).expect("read dest"), b"template-bytes");
    }

    #[test]
    fn atomic_copy_of_missing_source_creates_nothing() {
        let tmp = tempfile::tempdir().expect("temp dir");
        let dest = tmp.path().join("copy.xlsx");

        let err = atomic_copy(tmp.path().join("missing.xlsx"), &dest).expect_err("missing src");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(!dest.exists());
        assert!(files_in(tmp.path()).is_empty());
    }

    #[test]
    fn parent_of_bare_file_name_is_current_dir() {
        assert_eq!(parent_dir_or_dot(Path::new("out.xlsx")), Path::new("."));
        assert_eq!(
            parent_dir_or_dot(Path::new("exports/out.xlsx")),
            Path::new("exports")
        );
    }
}
