pub mod paths;
pub mod persistence;
pub mod schema;

pub use paths::*;
pub use persistence::*;
pub use schema::*;

fn default_workers() -> usize {
    crate::session::types::DEFAULT_WORKERS
}

fn default_queue_capacity() -> usize {
    crate::session::types::DEFAULT_QUEUE_CAPACITY
}

fn default_max_open_handles() -> usize {
    crate::overlay::DEFAULT_MAX_HANDLES
}

fn default_native_root() -> String {
    "/".to_string()
}
