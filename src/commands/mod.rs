pub mod config;
pub mod fs;
pub mod hide;
pub mod layers;

pub use config::handle_config_command;
pub use fs::{cat_file, list_dir, stat_path};
pub use hide::hide_path;
pub use layers::list_layers;
