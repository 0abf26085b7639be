//! Typed entry points, one per filesystem primitive.

use super::Session;
use crate::error::FsError;
use crate::overlay::{ClientId, DirEntry, FileStat, FsRequest, Handle, OpenMode};

type FsResult<T> = Result<T, FsError>;

impl Session {
    pub fn open_dir(&self, client: ClientId, path: &str) -> FsResult<Handle> {
        self.call(
            client,
            FsRequest::OpenDir {
                path: path.to_string(),
            },
        )?
        .into_handle()
    }

    /// Next entry, `None` at end of directory.
    pub fn read_dir(&self, client: ClientId, handle: Handle) -> FsResult<Option<DirEntry>> {
        self.call(client, FsRequest::ReadDir { handle })?.into_entry()
    }

    pub fn rewind_dir(&self, client: ClientId, handle: Handle) -> FsResult<()> {
        self.call(client, FsRequest::RewindDir { handle })?.into_done()
    }

    pub fn close_dir(&self, client: ClientId, handle: Handle) -> FsResult<()> {
        self.call(client, FsRequest::CloseDir { handle })?.into_done()
    }

    /// Open, drain and close a directory.
    pub fn list_dir(&self, client: ClientId, path: &str) -> FsResult<Vec<DirEntry>> {
        let handle = self.open_dir(client, path)?;
        let mut entries = Vec::new();
        let drained = loop {
            match self.read_dir(client, handle) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        let closed = self.close_dir(client, handle);
        drained?;
        closed?;
        Ok(entries)
    }

    pub fn make_dir(&self, client: ClientId, path: &str) -> FsResult<()> {
        self.call(
            client,
            FsRequest::MakeDir {
                path: path.to_string(),
            },
        )?
        .into_done()
    }

    pub fn open_file(&self, client: ClientId, path: &str, mode: OpenMode) -> FsResult<Handle> {
        self.call(
            client,
            FsRequest::OpenFile {
                path: path.to_string(),
                mode,
            },
        )?
        .into_handle()
    }

    pub fn close_file(&self, client: ClientId, handle: Handle) -> FsResult<()> {
        self.call(client, FsRequest::CloseFile { handle })?.into_done()
    }

    pub fn stat(&self, client: ClientId, path: &str) -> FsResult<FileStat> {
        self.call(
            client,
            FsRequest::GetStat {
                path: path.to_string(),
            },
        )?
        .into_stat()
    }

    pub fn stat_file(&self, client: ClientId, handle: Handle) -> FsResult<FileStat> {
        self.call(client, FsRequest::GetStatFile { handle })?.into_stat()
    }

    pub fn read_file(
        &self,
        client: ClientId,
        handle: Handle,
        len: usize,
        pos: Option<u64>,
    ) -> FsResult<Vec<u8>> {
        self.call(client, FsRequest::ReadFile { handle, len, pos })?.into_data()
    }

    pub fn write_file(&self, client: ClientId, handle: Handle, data: &[u8]) -> FsResult<usize> {
        self.call(
            client,
            FsRequest::WriteFile {
                handle,
                data: data.to_vec(),
            },
        )?
        .into_written()
    }

    pub fn set_pos(&self, client: ClientId, handle: Handle, pos: u64) -> FsResult<()> {
        self.call(client, FsRequest::SetPosFile { handle, pos })?.into_done()
    }

    pub fn get_pos(&self, client: ClientId, handle: Handle) -> FsResult<u64> {
        self.call(client, FsRequest::GetPosFile { handle })?.into_position()
    }

    pub fn is_eof(&self, client: ClientId, handle: Handle) -> FsResult<bool> {
        self.call(client, FsRequest::IsEof { handle })?.into_eof()
    }

    pub fn truncate(&self, client: ClientId, handle: Handle) -> FsResult<()> {
        self.call(client, FsRequest::TruncateFile { handle })?.into_done()
    }

    pub fn flush(&self, client: ClientId, handle: Handle) -> FsResult<()> {
        self.call(client, FsRequest::FlushFile { handle })?.into_done()
    }

    pub fn remove(&self, client: ClientId, path: &str) -> FsResult<()> {
        self.call(
            client,
            FsRequest::Remove {
                path: path.to_string(),
            },
        )?
        .into_done()
    }

    pub fn rename(&self, client: ClientId, from: &str, to: &str) -> FsResult<()> {
        self.call(
            client,
            FsRequest::Rename {
                from: from.to_string(),
                to: to.to_string(),
            },
        )?
        .into_done()
    }

    pub fn change_dir(&self, client: ClientId, path: &str) -> FsResult<()> {
        self.call(
            client,
            FsRequest::ChangeDir {
                path: path.to_string(),
            },
        )?
        .into_done()
    }
}
