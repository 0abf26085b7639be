//! The layer capability interface.
//!
//! Every operation defaults to `ForceParentLayer`, so a layer only overrides
//! what it actually handles and everything else transparently falls through
//! to the next lower layer.

use crate::error::FsError;
use crate::overlay::dispatch::ParentLayers;
use crate::overlay::types::{DirEntry, FileStat, Handle, OpenMode};
use serde::{Deserialize, Serialize};

/// Dispatch-internal outcome of a layer operation. Never leaves the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayerError {
    /// This layer has no opinion; try the next one.
    ForceParentLayer,
    /// A real failure. `no_fallback` makes it final even on a layer that
    /// normally falls back on error.
    Failed { error: FsError, no_fallback: bool },
}

impl LayerError {
    pub fn final_error(error: FsError) -> Self {
        LayerError::Failed {
            error,
            no_fallback: true,
        }
    }
}

impl From<FsError> for LayerError {
    fn from(error: FsError) -> Self {
        // Fatal errors are never softened by fallback
        let no_fallback = error.is_fatal();
        LayerError::Failed { error, no_fallback }
    }
}

pub type LayerResult<T> = std::result::Result<T, LayerError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LayerMode {
    /// Paths under the prefix are served only from the replacement root.
    #[default]
    Replace,
    /// Directory listings merge the replacement root with lower layers.
    #[serde(alias = "mergewithparent")]
    Merge,
}

impl LayerMode {
    pub fn default_fallback_on_error(self) -> bool {
        matches!(self, LayerMode::Merge)
    }
}

impl std::fmt::Display for LayerMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayerMode::Replace => write!(f, "replace"),
            LayerMode::Merge => write!(f, "merge"),
        }
    }
}

impl std::str::FromStr for LayerMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "replace" => Ok(LayerMode::Replace),
            "merge" | "mergewithparent" => Ok(LayerMode::Merge),
            _ => Err(format!(
                "Invalid layer mode '{}'. Must be one of: replace, merge",
                s
            )),
        }
    }
}

/// Everything needed to build a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerSpec {
    pub name: String,
    pub prefix: String,
    pub replacement: String,
    pub mode: LayerMode,
    pub writable: bool,
    pub fallback_on_error: bool,
    pub ignore: Vec<String>,
    pub max_handles: usize,
}

impl LayerSpec {
    /// A spec with the defaults for `mode`: read-only, fallback only when merging.
    pub fn new(name: &str, prefix: &str, replacement: &str, mode: LayerMode) -> Self {
        LayerSpec {
            name: name.to_string(),
            prefix: prefix.to_string(),
            replacement: replacement.to_string(),
            mode,
            writable: false,
            fallback_on_error: mode.default_fallback_on_error(),
            ignore: Vec::new(),
            max_handles: crate::overlay::handle_table::DEFAULT_MAX_HANDLES,
        }
    }

    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn fallback_on_error(mut self, fallback: bool) -> Self {
        self.fallback_on_error = fallback;
        self
    }

    pub fn ignore(mut self, patterns: Vec<String>) -> Self {
        self.ignore = patterns;
        self
    }

    pub fn max_handles(mut self, max: usize) -> Self {
        self.max_handles = max;
        self
    }
}

/// A unit of redirection policy.
///
/// Directory operations receive the layers below this one, so a layer can
/// consult "its parent" without knowing what that is.
#[allow(unused_variables)]
pub trait FilesystemLayer: Send + Sync {
    fn name(&self) -> &str;

    /// Whether failures of this layer may continue to lower layers.
    fn fallback_on_error(&self) -> bool;

    /// Backing directory for a virtual path, if this layer claims it.
    fn backing_path(&self, path: &str) -> Option<String> {
        None
    }

    fn open_dir(&self, parent: &ParentLayers<'_>, path: &str) -> LayerResult<Handle> {
        Err(LayerError::ForceParentLayer)
    }

    fn read_dir(&self, parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<Option<DirEntry>> {
        Err(LayerError::ForceParentLayer)
    }

    fn rewind_dir(&self, parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn close_dir(&self, parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn make_dir(&self, path: &str) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> LayerResult<Handle> {
        Err(LayerError::ForceParentLayer)
    }

    fn close_file(&self, handle: Handle) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn get_stat(&self, path: &str) -> LayerResult<FileStat> {
        Err(LayerError::ForceParentLayer)
    }

    fn get_stat_file(&self, handle: Handle) -> LayerResult<FileStat> {
        Err(LayerError::ForceParentLayer)
    }

    fn read_file(&self, handle: Handle, len: usize, pos: Option<u64>) -> LayerResult<Vec<u8>> {
        Err(LayerError::ForceParentLayer)
    }

    fn write_file(&self, handle: Handle, data: &[u8]) -> LayerResult<usize> {
        Err(LayerError::ForceParentLayer)
    }

    fn set_pos_file(&self, handle: Handle, pos: u64) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn get_pos_file(&self, handle: Handle) -> LayerResult<u64> {
        Err(LayerError::ForceParentLayer)
    }

    fn is_eof(&self, handle: Handle) -> LayerResult<bool> {
        Err(LayerError::ForceParentLayer)
    }

    fn truncate_file(&self, handle: Handle) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn flush_file(&self, handle: Handle) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn remove(&self, path: &str) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    fn rename(&self, from: &str, to: &str) -> LayerResult<()> {
        Err(LayerError::ForceParentLayer)
    }

    /// Release every handle this layer still owns. Called when the layer is
    /// removed from its stack.
    fn close_all(&self, parent: &ParentLayers<'_>) {}
}
