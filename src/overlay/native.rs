//! The native filesystem collaborator: whatever sits below every layer.

use crate::error::FsError;
use crate::overlay::convert::{io_error_to_fs, metadata_to_stat};
use crate::overlay::file_handle::{DirStream, OpenFile};
use crate::overlay::handle_table::{HandleTable, DEFAULT_MAX_HANDLES};
use crate::overlay::path_resolver::WorkingDirs;
use crate::overlay::types::{ClientId, FsReply, FsRequest, Handle};
use std::fs;
use std::path::{Path, PathBuf};

/// Callback form of a native completion.
pub type NativeCompletion = Box<dyn FnOnce(Result<FsReply, FsError>) + Send>;

/// The real filesystem, reached when no layer produces a final result.
///
/// Receives requests exactly as the caller issued them; it never sees layer
/// sentinels.
pub trait NativeFs: Send + Sync {
    /// Blocking form.
    fn execute(&self, client: ClientId, request: &FsRequest) -> Result<FsReply, FsError>;

    /// Callback form. The default runs the blocking form and completes inline.
    fn execute_with(&self, client: ClientId, request: &FsRequest, done: NativeCompletion) {
        done(self.execute(client, request))
    }
}

/// A native filesystem backed by a directory on the host.
///
/// Virtual absolute paths map below `root`; relative paths resolve against
/// the client's working directory as set through `ChangeDir`.
pub struct HostFs {
    root: PathBuf,
    working_dirs: WorkingDirs,
    files: HandleTable<OpenFile>,
    dirs: HandleTable<DirStream>,
}

impl HostFs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_max_handles(root, DEFAULT_MAX_HANDLES)
    }

    pub fn with_max_handles(root: impl Into<PathBuf>, max_handles: usize) -> Self {
        HostFs {
            root: root.into(),
            working_dirs: WorkingDirs::new(),
            files: HandleTable::new(max_handles),
            dirs: HandleTable::new(max_handles),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, client: ClientId, path: &str) -> PathBuf {
        let full = self.working_dirs.full_path(client, path);
        self.root.join(full.trim_start_matches('/'))
    }

    fn file_op<T>(
        &self,
        handle: Handle,
        op: impl FnOnce(&mut OpenFile) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        let entry = self.files.get(handle).ok_or(FsError::InvalidHandle)?;
        let mut file = entry.lock();
        op(&mut *file)
    }

    fn dir_op<T>(
        &self,
        handle: Handle,
        op: impl FnOnce(&mut DirStream) -> Result<T, FsError>,
    ) -> Result<T, FsError> {
        let entry = self.dirs.get(handle).ok_or(FsError::InvalidHandle)?;
        let mut dir = entry.lock();
        op(&mut *dir)
    }
}

impl NativeFs for HostFs {
    fn execute(&self, client: ClientId, request: &FsRequest) -> Result<FsReply, FsError> {
        tracing::trace!("[native] {} for client {:08X}", request.name(), client);
        match request {
            FsRequest::OpenDir { path } => {
                let stream = DirStream::open(&self.host_path(client, path), false)?;
                Ok(FsReply::Handle(self.dirs.insert(stream)?))
            }
            FsRequest::ReadDir { handle } => {
                Ok(FsReply::Entry(self.dir_op(*handle, |d| d.next_entry())?))
            }
            FsRequest::RewindDir { handle } => {
                self.dir_op(*handle, |d| d.rewind())?;
                Ok(FsReply::Done)
            }
            FsRequest::CloseDir { handle } => {
                self.dirs.remove(*handle)?;
                Ok(FsReply::Done)
            }
            FsRequest::MakeDir { path } => {
                fs::create_dir(self.host_path(client, path)).map_err(|e| io_error_to_fs(&e))?;
                Ok(FsReply::Done)
            }
            FsRequest::OpenFile { path, mode } => {
                let file = OpenFile::open(&self.host_path(client, path), *mode)?;
                Ok(FsReply::Handle(self.files.insert(file)?))
            }
            FsRequest::CloseFile { handle } => {
                self.files.remove(*handle)?;
                Ok(FsReply::Done)
            }
            FsRequest::GetStat { path } => {
                let meta =
                    fs::metadata(self.host_path(client, path)).map_err(|e| io_error_to_fs(&e))?;
                Ok(FsReply::Stat(metadata_to_stat(&meta)))
            }
            FsRequest::GetStatFile { handle } => {
                Ok(FsReply::Stat(self.file_op(*handle, |f| f.stat())?))
            }
            FsRequest::ReadFile { handle, len, pos } => Ok(FsReply::Data(
                self.file_op(*handle, |f| f.read(*len, *pos))?,
            )),
            FsRequest::WriteFile { handle, data } => {
                Ok(FsReply::Written(self.file_op(*handle, |f| f.write(data))?))
            }
            FsRequest::SetPosFile { handle, pos } => {
                self.file_op(*handle, |f| f.set_pos(*pos))?;
                Ok(FsReply::Done)
            }
            FsRequest::GetPosFile { handle } => {
                Ok(FsReply::Position(self.file_op(*handle, |f| f.pos())?))
            }
            FsRequest::IsEof { handle } => Ok(FsReply::Eof(self.file_op(*handle, |f| f.is_eof())?)),
            FsRequest::TruncateFile { handle } => {
                self.file_op(*handle, |f| f.truncate())?;
                Ok(FsReply::Done)
            }
            FsRequest::FlushFile { handle } => {
                self.file_op(*handle, |f| f.flush())?;
                Ok(FsReply::Done)
            }
            FsRequest::Remove { path } => {
                let target = self.host_path(client, path);
                let result = if target.is_dir() {
                    fs::remove_dir(&target)
                } else {
                    fs::remove_file(&target)
                };
                result.map_err(|e| io_error_to_fs(&e))?;
                Ok(FsReply::Done)
            }
            FsRequest::Rename { from, to } => {
                fs::rename(self.host_path(client, from), self.host_path(client, to))
                    .map_err(|e| io_error_to_fs(&e))?;
                Ok(FsReply::Done)
            }
            FsRequest::ChangeDir { path } => {
                self.working_dirs.set(client, path);
                Ok(FsReply::Done)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::types::OpenMode;
    use tempfile::tempdir;

    #[test]
    fn test_host_fs_open_read_close() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("vol/content")).unwrap();
        fs::write(root.path().join("vol/content/a.txt"), b"native").unwrap();

        let host = HostFs::new(root.path());
        let h = host
            .execute(
                1,
                &FsRequest::OpenFile {
                    path: "/vol/content/a.txt".to_string(),
                    mode: OpenMode::Read,
                },
            )
            .unwrap()
            .into_handle()
            .unwrap();
        let data = host
            .execute(1, &FsRequest::ReadFile { handle: h, len: 64, pos: None })
            .unwrap()
            .into_data()
            .unwrap();
        assert_eq!(data, b"native");

        assert!(host.execute(1, &FsRequest::CloseFile { handle: h }).is_ok());
        assert_eq!(
            host.execute(1, &FsRequest::CloseFile { handle: h }).unwrap_err(),
            FsError::InvalidHandle
        );
    }

    #[test]
    fn test_host_fs_change_dir_resolves_relative_paths() {
        let root = tempdir().unwrap();
        fs::create_dir_all(root.path().join("data")).unwrap();
        fs::write(root.path().join("data/f"), b"x").unwrap();

        let host = HostFs::new(root.path());
        host.execute(4, &FsRequest::ChangeDir { path: "/data".to_string() })
            .unwrap();
        let stat = host
            .execute(4, &FsRequest::GetStat { path: "f".to_string() })
            .unwrap()
            .into_stat()
            .unwrap();
        assert_eq!(stat.size, 1);
    }

    #[test]
    fn test_host_fs_unknown_handle_is_invalid() {
        let host = HostFs::new("/");
        let err = host
            .execute(
                1,
                &FsRequest::ReadDir {
                    handle: Handle::from_raw(77),
                },
            )
            .unwrap_err();
        assert_eq!(err, FsError::InvalidHandle);
    }

    #[test]
    fn test_execute_with_completes_once() {
        let root = tempdir().unwrap();
        let host = HostFs::new(root.path());
        let (tx, rx) = std::sync::mpsc::channel();
        host.execute_with(
            1,
            &FsRequest::GetStat { path: "/".to_string() },
            Box::new(move |res| {
                tx.send(res.is_ok()).unwrap();
            }),
        );
        assert!(rx.recv().unwrap());
    }
}
