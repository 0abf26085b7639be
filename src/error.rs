use crate::overlay::types::LayerId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RedirectError>;

#[derive(Error, Debug)]
pub enum RedirectError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(std::io::Error),

    #[error("Layer not found: {0}")]
    LayerNotFound(LayerId),

    #[error("Invalid layer: {0}")]
    InvalidLayer(String),

    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Session error: {0}")]
    Session(String),

    #[error("JSON error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for RedirectError {
    fn from(err: serde_json::Error) -> Self {
        RedirectError::Json(err.to_string())
    }
}

impl From<std::io::Error> for RedirectError {
    fn from(err: std::io::Error) -> Self {
        RedirectError::Io(err)
    }
}

/// Outcome kinds reported to filesystem callers.
///
/// End-of-file and end-of-directory are not errors; they are carried by the
/// reply values (`Eof(true)`, `Entry(None)`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FsError {
    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("not a file")]
    NotAFile,

    #[error("not a directory")]
    NotADirectory,

    #[error("permission denied")]
    PermissionDenied,

    #[error("access denied")]
    AccessDenied,

    #[error("storage full")]
    StorageFull,

    #[error("file too large")]
    FileTooLarge,

    #[error("invalid handle")]
    InvalidHandle,

    #[error("invalid argument")]
    InvalidArgument,

    #[error("media error")]
    MediaError,

    #[error("no free handle slot")]
    NoHandleSlot,

    #[error("cancelled")]
    Cancelled,

    #[error("fatal: {0}")]
    Fatal(String),
}

impl FsError {
    /// Whether a layer with `fallback_on_error` may pass this failure on to
    /// the next lower layer.
    pub fn is_fallback_eligible(&self) -> bool {
        !matches!(self, FsError::Cancelled | FsError::Fatal(_))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FsError::Fatal(_))
    }
}
