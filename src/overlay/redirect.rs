use crate::error::{FsError, RedirectError, Result};
use crate::overlay::convert::{io_error_to_fs, metadata_to_stat};
use crate::overlay::dispatch::ParentLayers;
use crate::overlay::file_handle::{DirStream, OpenFile};
use crate::overlay::handle_table::HandleTable;
use crate::overlay::layer::{FilesystemLayer, LayerError, LayerMode, LayerResult, LayerSpec};
use crate::overlay::merge::MergeState;
use crate::overlay::path_resolver::PathResolver;
use crate::overlay::tombstone::Tombstone;
use crate::overlay::types::{DirEntry, FileStat, Handle, OpenMode};
use std::fs;
use std::path::Path;

/// An open directory owned by a layer.
#[derive(Debug)]
pub(crate) struct OpenDir {
    pub stream: DirStream,
    /// Present only for directories opened by a merging layer.
    pub merge: Option<MergeState>,
}

/// Serves every path under its prefix from the replacement root.
pub struct RedirectLayer {
    name: String,
    resolver: PathResolver,
    writable: bool,
    fallback_on_error: bool,
    /// Layers that fall back also honour tombstones on lookups, so a lower
    /// layer cannot resurrect a hidden file.
    check_if_deleted: bool,
    /// Hide tombstone markers from this layer's own listings.
    skip_tombstones: bool,
    pub(crate) files: HandleTable<OpenFile>,
    pub(crate) dirs: HandleTable<OpenDir>,
}

impl RedirectLayer {
    pub fn new(spec: &LayerSpec) -> Result<Self> {
        if spec.name.trim().is_empty() {
            return Err(RedirectError::InvalidLayer(
                "layer name must not be empty".to_string(),
            ));
        }
        if spec.prefix.trim().is_empty() || spec.replacement.trim().is_empty() {
            return Err(RedirectError::InvalidLayer(format!(
                "layer '{}' needs both a prefix and a replacement",
                spec.name
            )));
        }

        Ok(RedirectLayer {
            name: spec.name.clone(),
            resolver: PathResolver::new(&spec.prefix, &spec.replacement, spec.ignore.clone())?,
            writable: spec.writable,
            fallback_on_error: spec.fallback_on_error,
            check_if_deleted: spec.fallback_on_error,
            skip_tombstones: spec.mode == LayerMode::Replace,
            files: HandleTable::new(spec.max_handles),
            dirs: HandleTable::new(spec.max_handles),
        })
    }

    fn redirect(&self, path: &str) -> LayerResult<String> {
        self.resolver.resolve(path).ok_or(LayerError::ForceParentLayer)
    }

    fn check_deleted(&self, path: &str, redirected: &str) -> LayerResult<()> {
        if self.check_if_deleted && Tombstone::is_deleted(Path::new(redirected)) {
            tracing::debug!("[{}] {} is marked as deleted", self.name, path);
            return Err(LayerError::final_error(FsError::NotFound));
        }
        Ok(())
    }

    fn require_writable(&self, what: &str, denied: FsError) -> LayerResult<()> {
        if !self.writable {
            tracing::debug!("[{}] Tried to {} but layer is not writable", self.name, what);
            return Err(denied.into());
        }
        Ok(())
    }

    fn with_file<T>(
        &self,
        handle: Handle,
        op: impl FnOnce(&mut OpenFile) -> std::result::Result<T, FsError>,
    ) -> LayerResult<T> {
        let entry = self.files.get(handle).ok_or(LayerError::ForceParentLayer)?;
        let mut file = entry.lock();
        Ok(op(&mut *file)?)
    }

    /// Open the backing directory for `path` and register it.
    pub(crate) fn open_backing_dir(&self, path: &str) -> LayerResult<Handle> {
        let redirected = self.redirect(path)?;
        tracing::trace!("[{}] OpenDir {} ({})", self.name, path, redirected);
        let stream = DirStream::open(Path::new(&redirected), self.skip_tombstones)?;
        Ok(self.dirs.insert(OpenDir {
            stream,
            merge: None,
        })?)
    }
}

impl FilesystemLayer for RedirectLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn fallback_on_error(&self) -> bool {
        self.fallback_on_error
    }

    fn backing_path(&self, path: &str) -> Option<String> {
        self.resolver.resolve(path)
    }

    fn open_dir(&self, _parent: &ParentLayers<'_>, path: &str) -> LayerResult<Handle> {
        self.open_backing_dir(path)
    }

    fn read_dir(&self, _parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<Option<DirEntry>> {
        let entry = self.dirs.get(handle).ok_or(LayerError::ForceParentLayer)?;
        let mut dir = entry.lock();
        Ok(dir.stream.next_entry()?)
    }

    fn rewind_dir(&self, _parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<()> {
        let entry = self.dirs.get(handle).ok_or(LayerError::ForceParentLayer)?;
        let mut dir = entry.lock();
        Ok(dir.stream.rewind()?)
    }

    fn close_dir(&self, _parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<()> {
        if !self.dirs.is_valid(handle) {
            return Err(LayerError::ForceParentLayer);
        }
        tracing::trace!("[{}] CloseDir {}", self.name, handle);
        self.dirs.remove(handle)?;
        Ok(())
    }

    fn make_dir(&self, path: &str) -> LayerResult<()> {
        let redirected = self.redirect(path)?;
        self.require_writable("create a directory", FsError::PermissionDenied)?;
        tracing::trace!("[{}] MakeDir {} ({})", self.name, path, redirected);
        fs::create_dir(&redirected).map_err(|e| {
            tracing::debug!("[{}] mkdir {} failed: {}", self.name, redirected, e);
            io_error_to_fs(&e)
        })?;
        Ok(())
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> LayerResult<Handle> {
        let redirected = self.redirect(path)?;
        self.check_deleted(path, &redirected)?;

        if mode.requires_write() && !self.writable {
            tracing::warn!("[{}] Open mode {} is not allowed for {}", self.name, mode, path);
            return Err(FsError::AccessDenied.into());
        }

        tracing::trace!("[{}] Open {} (as {}) mode {}", self.name, path, redirected, mode);
        let file = OpenFile::open(Path::new(&redirected), mode)?;
        let handle = self.files.insert(file)?;
        tracing::trace!("[{}] Opened {} as {}", self.name, redirected, handle);
        Ok(handle)
    }

    fn close_file(&self, handle: Handle) -> LayerResult<()> {
        if !self.files.is_valid(handle) {
            return Err(LayerError::ForceParentLayer);
        }
        tracing::trace!("[{}] Close {}", self.name, handle);
        self.files.remove(handle)?;
        Ok(())
    }

    fn get_stat(&self, path: &str) -> LayerResult<FileStat> {
        let redirected = self.redirect(path)?;
        self.check_deleted(path, &redirected)?;
        match fs::metadata(&redirected) {
            Ok(meta) => Ok(metadata_to_stat(&meta)),
            Err(e) => {
                tracing::trace!("[{}] Path {} ({}) not found: {}", self.name, path, redirected, e);
                Err(FsError::NotFound.into())
            }
        }
    }

    fn get_stat_file(&self, handle: Handle) -> LayerResult<FileStat> {
        self.with_file(handle, |f| f.stat())
    }

    fn read_file(&self, handle: Handle, len: usize, pos: Option<u64>) -> LayerResult<Vec<u8>> {
        self.with_file(handle, |f| f.read(len, pos))
    }

    fn write_file(&self, handle: Handle, data: &[u8]) -> LayerResult<usize> {
        if !self.files.is_valid(handle) {
            return Err(LayerError::ForceParentLayer);
        }
        self.require_writable("write", FsError::AccessDenied)?;
        self.with_file(handle, |f| f.write(data))
    }

    fn set_pos_file(&self, handle: Handle, pos: u64) -> LayerResult<()> {
        self.with_file(handle, |f| f.set_pos(pos))
    }

    fn get_pos_file(&self, handle: Handle) -> LayerResult<u64> {
        self.with_file(handle, |f| f.pos())
    }

    fn is_eof(&self, handle: Handle) -> LayerResult<bool> {
        self.with_file(handle, |f| f.is_eof())
    }

    fn truncate_file(&self, handle: Handle) -> LayerResult<()> {
        if !self.files.is_valid(handle) {
            return Err(LayerError::ForceParentLayer);
        }
        self.require_writable("truncate", FsError::AccessDenied)?;
        self.with_file(handle, |f| f.truncate())
    }

    fn flush_file(&self, handle: Handle) -> LayerResult<()> {
        if !self.files.is_valid(handle) {
            return Err(LayerError::ForceParentLayer);
        }
        self.require_writable("flush", FsError::AccessDenied)?;
        self.with_file(handle, |f| f.flush())
    }

    fn remove(&self, path: &str) -> LayerResult<()> {
        let redirected = self.redirect(path)?;
        self.require_writable("remove", FsError::PermissionDenied)?;
        tracing::trace!("[{}] Remove {} ({})", self.name, path, redirected);
        let result = if Path::new(&redirected).is_dir() {
            fs::remove_dir(&redirected)
        } else {
            fs::remove_file(&redirected)
        };
        result.map_err(|e| {
            tracing::debug!("[{}] Remove {} failed: {}", self.name, redirected, e);
            io_error_to_fs(&e)
        })?;
        Ok(())
    }

    fn rename(&self, from: &str, to: &str) -> LayerResult<()> {
        // Both ends must live in this layer
        if !self.resolver.applies(from) || !self.resolver.applies(to) {
            return Err(LayerError::ForceParentLayer);
        }
        self.require_writable("rename", FsError::PermissionDenied)?;
        let from_redirected = self.redirect(from)?;
        let to_redirected = self.redirect(to)?;
        tracing::trace!(
            "[{}] Rename {} ({}) -> {} ({})",
            self.name,
            from,
            from_redirected,
            to,
            to_redirected
        );
        fs::rename(&from_redirected, &to_redirected).map_err(|e| {
            tracing::debug!("[{}] Rename failed: {}", self.name, e);
            io_error_to_fs(&e)
        })?;
        Ok(())
    }

    fn close_all(&self, _parent: &ParentLayers<'_>) {
        let files = self.files.drain();
        let dirs = self.dirs.drain();
        if !files.is_empty() || !dirs.is_empty() {
            tracing::debug!(
                "[{}] Released {} open files and {} open dirs",
                self.name,
                files.len(),
                dirs.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::native::HostFs;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _native_root: TempDir,
        backing: TempDir,
        native: HostFs,
    }

    impl Fixture {
        fn new() -> Self {
            let native_root = tempdir().unwrap();
            let backing = tempdir().unwrap();
            fs::write(backing.path().join("a.bin"), b"modded").unwrap();
            let native = HostFs::new(native_root.path());
            Fixture {
                _native_root: native_root,
                backing,
                native,
            }
        }

        fn layer(&self, writable: bool, fallback: bool) -> RedirectLayer {
            let spec = LayerSpec::new(
                "content",
                "/vol/content",
                self.backing.path().to_str().unwrap(),
                LayerMode::Replace,
            )
            .writable(writable)
            .fallback_on_error(fallback);
            RedirectLayer::new(&spec).unwrap()
        }

        fn parent(&self) -> ParentLayers<'_> {
            ParentLayers::new(&[], &self.native, 1)
        }
    }

    #[test]
    fn test_paths_outside_prefix_defer() {
        let fx = Fixture::new();
        let layer = fx.layer(false, false);
        assert_eq!(
            layer.get_stat("/vol/save/x").unwrap_err(),
            LayerError::ForceParentLayer
        );
        assert_eq!(
            layer.open_dir(&fx.parent(), "/other").unwrap_err(),
            LayerError::ForceParentLayer
        );
    }

    #[test]
    fn test_open_read_close() {
        let fx = Fixture::new();
        let layer = fx.layer(false, false);
        let h = layer.open_file("/vol/content/a.bin", OpenMode::Read).unwrap();
        assert_eq!(layer.read_file(h, 64, None).unwrap(), b"modded");
        assert!(layer.is_eof(h).unwrap());
        layer.close_file(h).unwrap();
        assert_eq!(layer.close_file(h).unwrap_err(), LayerError::ForceParentLayer);
    }

    #[test]
    fn test_read_only_layer_rejects_writes() {
        let fx = Fixture::new();
        let layer = fx.layer(false, false);
        assert_eq!(
            layer.open_file("/vol/content/a.bin", OpenMode::Write),
            Err(FsError::AccessDenied.into())
        );
        assert_eq!(
            layer.make_dir("/vol/content/new"),
            Err(FsError::PermissionDenied.into())
        );
        assert_eq!(
            layer.remove("/vol/content/a.bin"),
            Err(FsError::PermissionDenied.into())
        );

        let h = layer.open_file("/vol/content/a.bin", OpenMode::Read).unwrap();
        assert_eq!(layer.write_file(h, b"x"), Err(FsError::AccessDenied.into()));
        assert_eq!(layer.truncate_file(h), Err(FsError::AccessDenied.into()));
    }

    #[test]
    fn test_writable_layer_creates_and_renames() {
        let fx = Fixture::new();
        let layer = fx.layer(true, false);
        layer.make_dir("/vol/content/dir").unwrap();
        assert!(fx.backing.path().join("dir").is_dir());

        let h = layer.open_file("/vol/content/dir/new.txt", OpenMode::Write).unwrap();
        assert_eq!(layer.write_file(h, b"hello").unwrap(), 5);
        layer.flush_file(h).unwrap();
        layer.close_file(h).unwrap();

        layer
            .rename("/vol/content/dir/new.txt", "/vol/content/renamed.txt")
            .unwrap();
        assert_eq!(
            fs::read(fx.backing.path().join("renamed.txt")).unwrap(),
            b"hello"
        );
        assert_eq!(
            layer.rename("/vol/content/renamed.txt", "/elsewhere/x"),
            Err(LayerError::ForceParentLayer)
        );
    }

    #[test]
    fn test_missing_file_maps_to_not_found() {
        let fx = Fixture::new();
        let layer = fx.layer(false, false);
        assert_eq!(
            layer.get_stat("/vol/content/missing"),
            Err(FsError::NotFound.into())
        );
        assert_eq!(
            layer.open_file("/vol/content/missing", OpenMode::Read),
            Err(FsError::NotFound.into())
        );
    }

    #[test]
    fn test_tombstone_hides_file_on_fallback_layer() {
        let fx = Fixture::new();
        Tombstone::create(fx.backing.path(), "a.bin").unwrap();

        let layer = fx.layer(false, true);
        assert_eq!(
            layer.get_stat("/vol/content/a.bin"),
            Err(LayerError::final_error(FsError::NotFound))
        );

        let strict = fx.layer(false, false);
        assert!(strict.get_stat("/vol/content/a.bin").is_ok());
    }

    #[test]
    fn test_replace_listing_skips_tombstones() {
        let fx = Fixture::new();
        Tombstone::create(fx.backing.path(), "gone.bin").unwrap();
        let layer = fx.layer(false, false);
        let parent = fx.parent();

        let h = layer.open_dir(&parent, "/vol/content").unwrap();
        let mut names = Vec::new();
        while let Some(e) = layer.read_dir(&parent, h).unwrap() {
            names.push(e.name);
        }
        assert_eq!(names, vec!["a.bin".to_string()]);
        layer.close_dir(&parent, h).unwrap();
    }

    #[test]
    fn test_close_all_invalidates_handles() {
        let fx = Fixture::new();
        let layer = fx.layer(false, false);
        let parent = fx.parent();
        let f = layer.open_file("/vol/content/a.bin", OpenMode::Read).unwrap();
        let d = layer.open_dir(&parent, "/vol/content").unwrap();

        layer.close_all(&parent);
        assert_eq!(layer.close_file(f), Err(LayerError::ForceParentLayer));
        assert_eq!(layer.close_dir(&parent, d), Err(LayerError::ForceParentLayer));
    }

    #[test]
    fn test_empty_prefix_is_rejected() {
        let spec = LayerSpec::new("x", "", "/sd", LayerMode::Replace);
        assert!(RedirectLayer::new(&spec).is_err());
    }
}
