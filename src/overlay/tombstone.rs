//! Tombstone markers for layered directories.
//!
//! A tombstone hides a lower-layer entry without deleting it: an empty file
//! named `.deleted_foo` in a layer's backing directory marks `foo` as gone
//! for every listing and lookup that goes through that layer.

use std::fs::File;
use std::path::Path;

/// The prefix used for tombstone marker files.
pub const TOMBSTONE_PREFIX: &str = ".deleted_";

pub struct Tombstone;

impl Tombstone {
    /// Create a tombstone for `name` inside `parent_dir`.
    pub fn create(parent_dir: &Path, name: &str) -> std::io::Result<()> {
        File::create(parent_dir.join(Self::marker_name(name)))?;
        Ok(())
    }

    /// For `foo`, returns `.deleted_foo`.
    pub fn marker_name(name: &str) -> String {
        format!("{}{}", TOMBSTONE_PREFIX, name)
    }

    /// Exact-case marker test, used when merging listings.
    pub fn is_marker(name: &str) -> bool {
        name.starts_with(TOMBSTONE_PREFIX)
    }

    /// Case-insensitive marker test, used when filtering single-layer listings
    /// and when checking lookups.
    pub fn is_marker_ignore_case(name: &str) -> bool {
        name.get(..TOMBSTONE_PREFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(TOMBSTONE_PREFIX))
    }

    /// Whether the backing file at `path` counts as deleted: either its own
    /// name is a marker, or a sibling marker for it exists.
    pub fn is_deleted(path: &Path) -> bool {
        let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };

        if Self::is_marker_ignore_case(&name) {
            tracing::trace!("{} is itself a tombstone", path.display());
            return true;
        }

        let marker = path.with_file_name(Self::marker_name(&name));
        if marker.exists() {
            tracing::trace!(
                "{} hidden by tombstone {}",
                path.display(),
                marker.display()
            );
            return true;
        }
        false
    }
}
