mod convert;
mod file_handle;
pub mod dispatch;
pub mod handle_table;
pub mod layer;
pub mod merge;
pub mod native;
pub mod path_resolver;
pub mod redirect;
pub mod stack;
pub mod tombstone;
pub mod types;

pub use dispatch::{dispatch, ParentLayers};
pub use handle_table::{HandleTable, DEFAULT_MAX_HANDLES};
pub use layer::{FilesystemLayer, LayerError, LayerMode, LayerResult, LayerSpec};
pub use merge::MergeLayer;
pub use native::{HostFs, NativeCompletion, NativeFs};
pub use path_resolver::{normalize_separators, PathResolver, WorkingDirs};
pub use redirect::RedirectLayer;
pub use stack::{Layer, LayerInfo, LayerStack, SYSTEM_CLIENT};
pub use tombstone::{Tombstone, TOMBSTONE_PREFIX};
pub use types::{
    ClientId, DirEntry, FileStat, FsReply, FsRequest, Handle, LayerId, OpenMode,
};
