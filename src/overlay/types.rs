use crate::error::FsError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Caller identity token. Working directories are tracked per client.
pub type ClientId = u32;

/// Stable identifier of a registered layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}", self.0)
    }
}

/// Opaque open-file or open-directory handle.
///
/// Packs the issuing table's tag (32 bits), the slot generation (16 bits) and
/// the slot index (16 bits). Zero is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle(u64);

impl Handle {
    pub(crate) fn from_parts(tag: u32, generation: u16, index: u16) -> Self {
        Handle(((tag as u64) << 32) | ((generation as u64) << 16) | index as u64)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        Handle(raw)
    }

    pub(crate) fn tag(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub(crate) fn generation(self) -> u16 {
        (self.0 >> 16) as u16
    }

    pub(crate) fn index(self) -> u16 {
        self.0 as u16
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016X}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileStat {
    pub size: u64,
    pub is_dir: bool,
    /// Permission bits of the backing file.
    pub mode: u32,
    /// Seconds since the Unix epoch.
    pub modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub stat: FileStat,
}

/// File open modes accepted by `OpenFile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `r` / `rb`
    Read,
    /// `r+`
    ReadUpdate,
    /// `w` / `wb`
    Write,
    /// `w+`
    WriteUpdate,
    /// `a`
    Append,
    /// `a+`
    AppendUpdate,
}

impl OpenMode {
    /// Whether this mode needs a writable layer.
    pub fn requires_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }

    pub fn options(self) -> std::fs::OpenOptions {
        let mut opts = std::fs::OpenOptions::new();
        match self {
            OpenMode::Read => opts.read(true),
            OpenMode::ReadUpdate => opts.read(true).write(true),
            OpenMode::Write => opts.write(true).create(true).truncate(true),
            OpenMode::WriteUpdate => opts.read(true).write(true).create(true).truncate(true),
            OpenMode::Append => opts.append(true).create(true),
            OpenMode::AppendUpdate => opts.read(true).append(true).create(true),
        };
        opts
    }
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpenMode::Read => "r",
            OpenMode::ReadUpdate => "r+",
            OpenMode::Write => "w",
            OpenMode::WriteUpdate => "w+",
            OpenMode::Append => "a",
            OpenMode::AppendUpdate => "a+",
        };
        write!(f, "{}", s)
    }
}

impl std::str::FromStr for OpenMode {
    type Err = FsError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "r" | "rb" => Ok(OpenMode::Read),
            "r+" => Ok(OpenMode::ReadUpdate),
            "w" | "wb" => Ok(OpenMode::Write),
            "w+" => Ok(OpenMode::WriteUpdate),
            "a" => Ok(OpenMode::Append),
            "a+" => Ok(OpenMode::AppendUpdate),
            _ => {
                tracing::warn!("Unsupported open mode {:?}", s);
                Err(FsError::AccessDenied)
            }
        }
    }
}

/// A single filesystem primitive, as received from an intercepted caller.
#[derive(Debug, Clone, PartialEq)]
pub enum FsRequest {
    OpenDir { path: String },
    ReadDir { handle: Handle },
    RewindDir { handle: Handle },
    CloseDir { handle: Handle },
    MakeDir { path: String },
    OpenFile { path: String, mode: OpenMode },
    CloseFile { handle: Handle },
    GetStat { path: String },
    GetStatFile { handle: Handle },
    ReadFile { handle: Handle, len: usize, pos: Option<u64> },
    WriteFile { handle: Handle, data: Vec<u8> },
    SetPosFile { handle: Handle, pos: u64 },
    GetPosFile { handle: Handle },
    IsEof { handle: Handle },
    TruncateFile { handle: Handle },
    FlushFile { handle: Handle },
    Remove { path: String },
    Rename { from: String, to: String },
    ChangeDir { path: String },
}

impl FsRequest {
    pub fn name(&self) -> &'static str {
        match self {
            FsRequest::OpenDir { .. } => "OpenDir",
            FsRequest::ReadDir { .. } => "ReadDir",
            FsRequest::RewindDir { .. } => "RewindDir",
            FsRequest::CloseDir { .. } => "CloseDir",
            FsRequest::MakeDir { .. } => "MakeDir",
            FsRequest::OpenFile { .. } => "OpenFile",
            FsRequest::CloseFile { .. } => "CloseFile",
            FsRequest::GetStat { .. } => "GetStat",
            FsRequest::GetStatFile { .. } => "GetStatFile",
            FsRequest::ReadFile { .. } => "ReadFile",
            FsRequest::WriteFile { .. } => "WriteFile",
            FsRequest::SetPosFile { .. } => "SetPosFile",
            FsRequest::GetPosFile { .. } => "GetPosFile",
            FsRequest::IsEof { .. } => "IsEof",
            FsRequest::TruncateFile { .. } => "TruncateFile",
            FsRequest::FlushFile { .. } => "FlushFile",
            FsRequest::Remove { .. } => "Remove",
            FsRequest::Rename { .. } => "Rename",
            FsRequest::ChangeDir { .. } => "ChangeDir",
        }
    }

    /// Rewrite every path argument with `f`. Handle-only requests are untouched.
    pub(crate) fn map_paths(&self, f: impl Fn(&str) -> String) -> FsRequest {
        match self {
            FsRequest::OpenDir { path } => FsRequest::OpenDir { path: f(path) },
            FsRequest::MakeDir { path } => FsRequest::MakeDir { path: f(path) },
            FsRequest::OpenFile { path, mode } => FsRequest::OpenFile {
                path: f(path),
                mode: *mode,
            },
            FsRequest::GetStat { path } => FsRequest::GetStat { path: f(path) },
            FsRequest::Remove { path } => FsRequest::Remove { path: f(path) },
            FsRequest::Rename { from, to } => FsRequest::Rename {
                from: f(from),
                to: f(to),
            },
            FsRequest::ChangeDir { path } => FsRequest::ChangeDir { path: f(path) },
            other => other.clone(),
        }
    }
}

/// Successful result of an `FsRequest`.
#[derive(Debug, Clone, PartialEq)]
pub enum FsReply {
    Done,
    Handle(Handle),
    /// `None` is the end-of-directory outcome.
    Entry(Option<DirEntry>),
    Stat(FileStat),
    Data(Vec<u8>),
    Written(usize),
    Position(u64),
    /// `true` is the end-of-file outcome.
    Eof(bool),
}

fn mismatch(expected: &str, got: &FsReply) -> FsError {
    FsError::Fatal(format!("expected {} reply, got {:?}", expected, got))
}

impl FsReply {
    pub fn into_done(self) -> Result<(), FsError> {
        match self {
            FsReply::Done => Ok(()),
            other => Err(mismatch("Done", &other)),
        }
    }

    pub fn into_handle(self) -> Result<Handle, FsError> {
        match self {
            FsReply::Handle(h) => Ok(h),
            other => Err(mismatch("Handle", &other)),
        }
    }

    pub fn into_entry(self) -> Result<Option<DirEntry>, FsError> {
        match self {
            FsReply::Entry(e) => Ok(e),
            other => Err(mismatch("Entry", &other)),
        }
    }

    pub fn into_stat(self) -> Result<FileStat, FsError> {
        match self {
            FsReply::Stat(s) => Ok(s),
            other => Err(mismatch("Stat", &other)),
        }
    }

    pub fn into_data(self) -> Result<Vec<u8>, FsError> {
        match self {
            FsReply::Data(d) => Ok(d),
            other => Err(mismatch("Data", &other)),
        }
    }

    pub fn into_written(self) -> Result<usize, FsError> {
        match self {
            FsReply::Written(n) => Ok(n),
            other => Err(mismatch("Written", &other)),
        }
    }

    pub fn into_position(self) -> Result<u64, FsError> {
        match self {
            FsReply::Position(p) => Ok(p),
            other => Err(mismatch("Position", &other)),
        }
    }

    pub fn into_eof(self) -> Result<bool, FsError> {
        match self {
            FsReply::Eof(eof) => Ok(eof),
            other => Err(mismatch("Eof", &other)),
        }
    }
}
