pub mod config;
pub mod error;
pub mod overlay;
pub mod session;

pub use config::get_config_path;
pub use config::load_config;
pub use config::load_config_from;
pub use config::save_config;
pub use config::Config;
pub use config::LayerConfig;

pub use error::{FsError, RedirectError, Result};

pub use overlay::{
    FilesystemLayer, FsReply, FsRequest, Handle, HostFs, LayerId, LayerMode, LayerSpec, NativeFs,
    OpenMode,
};

pub use session::{AsyncCompletion, CompletionRecord, Preset, Session, SessionOptions};
