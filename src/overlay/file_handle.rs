use crate::error::FsError;
use crate::overlay::convert::{io_error_to_fs, metadata_to_stat};
use crate::overlay::tombstone::Tombstone;
use crate::overlay::types::{DirEntry, FileStat, OpenMode};
use std::fs::{self, File, ReadDir};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// An open backing file.
#[derive(Debug)]
pub(crate) struct OpenFile {
    pub file: File,
    pub path: PathBuf,
}

impl OpenFile {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, FsError> {
        let file = mode.options().open(path).map_err(|e| {
            tracing::debug!("Open {} ({}) failed: {}", path.display(), mode, e);
            io_error_to_fs(&e)
        })?;
        Ok(OpenFile {
            file,
            path: path.to_path_buf(),
        })
    }

    pub fn stat(&self) -> Result<FileStat, FsError> {
        let meta = self.file.metadata().map_err(|e| {
            tracing::error!("fstat of {} failed: {}", self.path.display(), e);
            FsError::MediaError
        })?;
        Ok(metadata_to_stat(&meta))
    }

    /// Read up to `len` bytes, optionally seeking to `pos` first. Stops early
    /// only at end of file.
    pub fn read(&mut self, len: usize, pos: Option<u64>) -> Result<Vec<u8>, FsError> {
        if let Some(pos) = pos {
            self.set_pos(pos)?;
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        // `len` comes from the caller; size the buffer by what is left instead
        let remaining = match (self.file.metadata(), self.file.stream_position()) {
            (Ok(meta), Ok(current)) => meta.len().saturating_sub(current),
            _ => 0,
        };
        let mut buf = Vec::with_capacity(remaining.min(len as u64) as usize);
        (&mut self.file)
            .take(len as u64)
            .read_to_end(&mut buf)
            .map_err(|e| {
                tracing::error!("Read of {} bytes from {} failed: {}", len, self.path.display(), e);
                match io_error_to_fs(&e) {
                    FsError::AccessDenied => FsError::AccessDenied,
                    _ => FsError::MediaError,
                }
            })?;
        Ok(buf)
    }

    pub fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        self.file.write_all(data).map_err(|e| {
            tracing::error!("Write to {} failed: {}", self.path.display(), e);
            match io_error_to_fs(&e) {
                err @ (FsError::AccessDenied | FsError::StorageFull | FsError::FileTooLarge) => err,
                _ => FsError::MediaError,
            }
        })?;
        Ok(data.len())
    }

    pub fn set_pos(&mut self, pos: u64) -> Result<(), FsError> {
        match self.file.seek(SeekFrom::Start(pos)) {
            Ok(new_pos) if new_pos == pos => Ok(()),
            Ok(new_pos) => {
                tracing::error!("Seek {} to {} landed at {}", self.path.display(), pos, new_pos);
                Err(FsError::MediaError)
            }
            Err(e) => {
                tracing::error!("Seek {} to {} failed: {}", self.path.display(), pos, e);
                Err(FsError::MediaError)
            }
        }
    }

    pub fn pos(&mut self) -> Result<u64, FsError> {
        self.file.stream_position().map_err(|e| {
            tracing::error!("Failed to get position of {}: {}", self.path.display(), e);
            FsError::MediaError
        })
    }

    /// `true` when the position is at the end. The position is left unchanged.
    pub fn is_eof(&mut self) -> Result<bool, FsError> {
        let current = self.pos()?;
        let end = self.file.metadata().map(|m| m.len()).map_err(|e| {
            tracing::error!("Failed to get size of {}: {}", self.path.display(), e);
            FsError::MediaError
        })?;
        Ok(current >= end)
    }

    /// Cut the file at the current position.
    pub fn truncate(&mut self) -> Result<(), FsError> {
        let current = self.pos()?;
        self.file.set_len(current).map_err(|e| {
            tracing::error!("Truncate of {} at {} failed: {}", self.path.display(), current, e);
            FsError::MediaError
        })
    }

    pub fn flush(&mut self) -> Result<(), FsError> {
        self.file.sync_all().map_err(|e| {
            tracing::error!("fsync of {} failed: {}", self.path.display(), e);
            match e.raw_os_error() {
                Some(libc::EBADF) => FsError::InvalidHandle,
                _ => FsError::MediaError,
            }
        })
    }
}

/// An open backing directory stream.
#[derive(Debug)]
pub(crate) struct DirStream {
    pub path: PathBuf,
    entries: ReadDir,
    /// Hide tombstone markers (case-insensitive) from this stream.
    skip_tombstones: bool,
}

impl DirStream {
    pub fn open(path: &Path, skip_tombstones: bool) -> Result<Self, FsError> {
        let meta = fs::metadata(path).map_err(|e| io_error_to_fs(&e))?;
        if !meta.is_dir() {
            return Err(FsError::NotADirectory);
        }
        let entries = fs::read_dir(path).map_err(|e| {
            tracing::debug!("Failed to open dir {}: {}", path.display(), e);
            match io_error_to_fs(&e) {
                err @ (FsError::NotFound
                | FsError::PermissionDenied
                | FsError::NotADirectory
                | FsError::NoHandleSlot) => err,
                _ => FsError::MediaError,
            }
        })?;
        Ok(DirStream {
            path: path.to_path_buf(),
            entries,
            skip_tombstones,
        })
    }

    /// Next entry, or `None` at end of directory.
    pub fn next_entry(&mut self) -> Result<Option<DirEntry>, FsError> {
        loop {
            let entry = match self.entries.next() {
                None => return Ok(None),
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    tracing::error!("Failed to read dir {}: {}", self.path.display(), e);
                    return Err(FsError::MediaError);
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if self.skip_tombstones && Tombstone::is_marker_ignore_case(&name) {
                tracing::trace!("Skipping tombstone {} in {}", name, self.path.display());
                continue;
            }

            let meta = fs::metadata(entry.path()).map_err(|e| {
                tracing::error!(
                    "Failed to stat {} while reading {}: {}",
                    name,
                    self.path.display(),
                    e
                );
                FsError::MediaError
            })?;
            return Ok(Some(DirEntry {
                name,
                stat: metadata_to_stat(&meta),
            }));
        }
    }

    pub fn rewind(&mut self) -> Result<(), FsError> {
        self.entries = fs::read_dir(&self.path).map_err(|e| {
            tracing::error!("Failed to rewind dir {}: {}", self.path.display(), e);
            FsError::MediaError
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_write_and_positions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut f = OpenFile::open(&path, OpenMode::WriteUpdate).unwrap();
        assert_eq!(f.write(b"hello world").unwrap(), 11);
        assert!(f.is_eof().unwrap());

        assert_eq!(f.read(5, Some(0)).unwrap(), b"hello");
        assert_eq!(f.pos().unwrap(), 5);
        assert!(!f.is_eof().unwrap());
        assert_eq!(f.pos().unwrap(), 5, "is_eof must not move the position");

        assert_eq!(f.read(100, None).unwrap(), b" world");
        assert!(f.is_eof().unwrap());
        assert!(f.read(4, None).unwrap().is_empty());
    }

    #[test]
    fn test_truncate_at_current_position() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.txt");
        fs::write(&path, b"0123456789").unwrap();

        let mut f = OpenFile::open(&path, OpenMode::ReadUpdate).unwrap();
        f.set_pos(4).unwrap();
        f.truncate().unwrap();
        assert_eq!(f.stat().unwrap().size, 4);
    }

    #[test]
    fn test_open_missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = OpenFile::open(&dir.path().join("nope"), OpenMode::Read).unwrap_err();
        assert_eq!(err, FsError::NotFound);
    }

    #[test]
    fn test_dir_stream_skips_tombstones_when_asked() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::write(dir.path().join(".deleted_b.txt"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let collect = |skip: bool| {
            let mut stream = DirStream::open(dir.path(), skip).unwrap();
            let mut names = Vec::new();
            while let Some(e) = stream.next_entry().unwrap() {
                names.push(e.name);
            }
            names.sort();
            names
        };

        assert_eq!(collect(true), vec!["a.txt", "sub"]);
        assert_eq!(collect(false), vec![".deleted_b.txt", "a.txt", "sub"]);
    }

    #[test]
    fn test_dir_stream_rewind() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("only"), b"").unwrap();

        let mut stream = DirStream::open(dir.path(), true).unwrap();
        assert!(stream.next_entry().unwrap().is_some());
        assert!(stream.next_entry().unwrap().is_none());
        stream.rewind().unwrap();
        assert_eq!(stream.next_entry().unwrap().unwrap().name, "only");
    }

    #[test]
    fn test_dir_stream_on_file_is_not_a_directory() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"").unwrap();
        assert_eq!(DirStream::open(&file, true).unwrap_err(), FsError::NotADirectory);
    }
}
