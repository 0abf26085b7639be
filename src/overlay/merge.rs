//! Directory merging for layers in `Merge` mode.
//!
//! A merged listing first returns the layer's own entries, then the entries
//! of whatever lies below it (the next layers, then native), skipping names
//! already returned and names hidden by a tombstone.
//!
//! Per open directory the reader moves `ReadingOverlay -> ReadingParent ->
//! Exhausted`. Tombstone markers seen in the overlay are remembered but never
//! returned.

use crate::error::Result;
use crate::overlay::dispatch::ParentLayers;
use crate::overlay::layer::{FilesystemLayer, LayerError, LayerMode, LayerResult, LayerSpec};
use crate::overlay::redirect::RedirectLayer;
use crate::overlay::tombstone::Tombstone;
use crate::overlay::types::{DirEntry, FileStat, Handle, OpenMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    ReadingOverlay,
    ReadingParent,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub entry: DirEntry,
    pub tombstoned: bool,
}

#[derive(Debug)]
pub(crate) struct MergeState {
    pub phase: MergePhase,
    pub pending: Vec<PendingEntry>,
    /// Directory handle opened below this layer, if the parent had one.
    pub parent: Option<Handle>,
}

impl MergeState {
    pub fn new(parent: Option<Handle>) -> Self {
        MergeState {
            phase: MergePhase::ReadingOverlay,
            pending: Vec::new(),
            parent,
        }
    }

    /// Remember an overlay entry. Returns whether it is a tombstone.
    pub fn record(&mut self, entry: &DirEntry) -> bool {
        let tombstoned = Tombstone::is_marker(&entry.name);
        self.pending.push(PendingEntry {
            entry: entry.clone(),
            tombstoned,
        });
        tombstoned
    }

    /// Whether a parent entry named `name` is already represented by the
    /// overlay or hidden by one of its tombstones.
    pub fn suppresses(&self, name: &str) -> bool {
        let marker = Tombstone::marker_name(name);
        self.pending.iter().any(|p| {
            p.entry.name == marker || (p.entry.name == name && !p.tombstoned)
        })
    }

    pub fn reset(&mut self) {
        self.pending.clear();
        self.phase = MergePhase::ReadingOverlay;
    }
}

/// A redirecting layer whose directory listings include its parent's.
pub struct MergeLayer {
    inner: RedirectLayer,
}

impl MergeLayer {
    pub fn new(spec: &LayerSpec) -> Result<Self> {
        let mut spec = spec.clone();
        spec.mode = LayerMode::Merge;
        Ok(MergeLayer {
            inner: RedirectLayer::new(&spec)?,
        })
    }

    fn close_parent(&self, parent: &ParentLayers<'_>, handle: Handle) {
        if let Err(e) = parent.close_dir(handle) {
            tracing::warn!(
                "[{}] Failed to close parent dir handle {}: {}",
                self.inner.name(),
                handle,
                e
            );
        }
    }
}

impl FilesystemLayer for MergeLayer {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fallback_on_error(&self) -> bool {
        self.inner.fallback_on_error()
    }

    fn backing_path(&self, path: &str) -> Option<String> {
        self.inner.backing_path(path)
    }

    fn open_dir(&self, parent: &ParentLayers<'_>, path: &str) -> LayerResult<Handle> {
        let handle = self.inner.open_backing_dir(path)?;

        // Best effort: a missing parent directory just means nothing to merge
        let parent_handle = match parent.open_dir(path) {
            Ok(h) => Some(h),
            Err(e) => {
                tracing::debug!(
                    "[{}] No parent directory for {}: {}",
                    self.inner.name(),
                    path,
                    e
                );
                None
            }
        };

        let entry = match self.inner.dirs.lookup(handle) {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(ph) = parent_handle {
                    self.close_parent(parent, ph);
                }
                return Err(e.into());
            }
        };
        entry.lock().merge = Some(MergeState::new(parent_handle));
        Ok(handle)
    }

    fn read_dir(&self, parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<Option<DirEntry>> {
        let entry = self.inner.dirs.get(handle).ok_or(LayerError::ForceParentLayer)?;
        let mut guard = entry.lock();
        let dir = &mut *guard;

        let Some(state) = dir.merge.as_mut() else {
            return Ok(dir.stream.next_entry()?);
        };

        loop {
            match state.phase {
                MergePhase::ReadingOverlay => match dir.stream.next_entry()? {
                    Some(e) => {
                        if state.record(&e) {
                            tracing::trace!("[{}] Hiding tombstone {}", self.inner.name(), e.name);
                            continue;
                        }
                        return Ok(Some(e));
                    }
                    None => state.phase = MergePhase::ReadingParent,
                },
                MergePhase::ReadingParent => {
                    let Some(parent_handle) = state.parent else {
                        state.phase = MergePhase::Exhausted;
                        continue;
                    };
                    match parent.read_dir(parent_handle) {
                        Ok(Some(e)) => {
                            if state.suppresses(&e.name) {
                                tracing::trace!(
                                    "[{}] Skipping parent entry {}",
                                    self.inner.name(),
                                    e.name
                                );
                                continue;
                            }
                            return Ok(Some(e));
                        }
                        Ok(None) => state.phase = MergePhase::Exhausted,
                        Err(e) => {
                            tracing::error!(
                                "[{}] Reading parent dir {} failed unexpectedly: {}",
                                self.inner.name(),
                                parent_handle,
                                e
                            );
                            state.phase = MergePhase::Exhausted;
                        }
                    }
                }
                MergePhase::Exhausted => return Ok(None),
            }
        }
    }

    fn rewind_dir(&self, parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<()> {
        let entry = self.inner.dirs.get(handle).ok_or(LayerError::ForceParentLayer)?;
        let mut guard = entry.lock();
        let dir = &mut *guard;
        dir.stream.rewind()?;

        if let Some(state) = dir.merge.as_mut() {
            state.reset();
            if let Some(parent_handle) = state.parent {
                if let Err(e) = parent.rewind_dir(parent_handle) {
                    tracing::warn!(
                        "[{}] Failed to rewind parent dir {}: {}",
                        self.inner.name(),
                        parent_handle,
                        e
                    );
                }
            }
        }
        Ok(())
    }

    fn close_dir(&self, parent: &ParentLayers<'_>, handle: Handle) -> LayerResult<()> {
        if !self.inner.dirs.is_valid(handle) {
            return Err(LayerError::ForceParentLayer);
        }
        let entry = self.inner.dirs.remove(handle)?;
        let parent_handle = entry.lock().merge.as_ref().and_then(|m| m.parent);
        if let Some(ph) = parent_handle {
            self.close_parent(parent, ph);
        }
        Ok(())
    }

    fn make_dir(&self, path: &str) -> LayerResult<()> {
        self.inner.make_dir(path)
    }

    fn open_file(&self, path: &str, mode: OpenMode) -> LayerResult<Handle> {
        self.inner.open_file(path, mode)
    }

    fn close_file(&self, handle: Handle) -> LayerResult<()> {
        self.inner.close_file(handle)
    }

    fn get_stat(&self, path: &str) -> LayerResult<FileStat> {
        self.inner.get_stat(path)
    }

    fn get_stat_file(&self, handle: Handle) -> LayerResult<FileStat> {
        self.inner.get_stat_file(handle)
    }

    fn read_file(&self, handle: Handle, len: usize, pos: Option<u64>) -> LayerResult<Vec<u8>> {
        self.inner.read_file(handle, len, pos)
    }

    fn write_file(&self, handle: Handle, data: &[u8]) -> LayerResult<usize> {
        self.inner.write_file(handle, data)
    }

    fn set_pos_file(&self, handle: Handle, pos: u64) -> LayerResult<()> {
        self.inner.set_pos_file(handle, pos)
    }

    fn get_pos_file(&self, handle: Handle) -> LayerResult<u64> {
        self.inner.get_pos_file(handle)
    }

    fn is_eof(&self, handle: Handle) -> LayerResult<bool> {
        self.inner.is_eof(handle)
    }

    fn truncate_file(&self, handle: Handle) -> LayerResult<()> {
        self.inner.truncate_file(handle)
    }

    fn flush_file(&self, handle: Handle) -> LayerResult<()> {
        self.inner.flush_file(handle)
    }

    fn remove(&self, path: &str) -> LayerResult<()> {
        self.inner.remove(path)
    }

    fn rename(&self, from: &str, to: &str) -> LayerResult<()> {
        self.inner.rename(from, to)
    }

    fn close_all(&self, parent: &ParentLayers<'_>) {
        for (_, entry) in self.inner.dirs.drain() {
            let parent_handle = entry.lock().merge.as_ref().and_then(|m| m.parent);
            if let Some(ph) = parent_handle {
                self.close_parent(parent, ph);
            }
        }
        self.inner.files.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> DirEntry {
        DirEntry {
            name: name.to_string(),
            stat: FileStat::default(),
        }
    }

    #[test]
    fn test_record_flags_tombstones() {
        let mut state = MergeState::new(None);
        assert!(!state.record(&entry("a.txt")));
        assert!(state.record(&entry(".deleted_b.txt")));
        assert_eq!(state.pending.len(), 2);
    }

    #[test]
    fn test_suppresses_duplicates_and_tombstoned_names() {
        let mut state = MergeState::new(None);
        state.record(&entry("bar"));
        state.record(&entry(".deleted_foo"));

        assert!(state.suppresses("bar"), "overlay copy wins");
        assert!(state.suppresses("foo"), "tombstone hides parent entry");
        assert!(!state.suppresses("baz"));
        assert!(
            !state.suppresses("deleted_foo"),
            "only the exact marker name counts"
        );
    }

    #[test]
    fn test_parent_tombstone_named_entry_is_not_hidden_by_itself() {
        let mut state = MergeState::new(None);
        state.record(&entry(".deleted_x"));
        // A parent entry literally named ".deleted_x" matches only the
        // tombstoned overlay record, which does not count as a duplicate.
        assert!(!state.suppresses(".deleted_x"));
    }

    #[test]
    fn test_reset_clears_pending() {
        let mut state = MergeState::new(Some(Handle::from_raw(5)));
        state.record(&entry("a"));
        state.phase = MergePhase::Exhausted;
        state.reset();
        assert!(state.pending.is_empty());
        assert_eq!(state.phase, MergePhase::ReadingOverlay);
        assert_eq!(state.parent, Some(Handle::from_raw(5)), "parent survives rewind");
    }
}
