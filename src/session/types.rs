use crate::error::FsError;
use crate::overlay::{ClientId, FsReply, LayerMode, LayerSpec};
use tokio::sync::mpsc::UnboundedSender;

/// Version reported by `Session::version`.
pub const API_VERSION: u32 = 1;

pub const DEFAULT_WORKERS: usize = 3;
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Result of an asynchronous request, as posted to a completion queue.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub tag: u64,
    pub client: ClientId,
    pub result: Result<FsReply, FsError>,
}

pub type CompletionCallback = Box<dyn FnOnce(Result<FsReply, FsError>) + Send>;

/// How an asynchronous request reports back. Exactly one of the two must be set.
#[derive(Default)]
pub struct AsyncCompletion {
    pub callback: Option<CompletionCallback>,
    pub queue: Option<(UnboundedSender<CompletionRecord>, u64)>,
}

impl AsyncCompletion {
    pub fn callback(f: impl FnOnce(Result<FsReply, FsError>) + Send + 'static) -> Self {
        AsyncCompletion {
            callback: Some(Box::new(f)),
            queue: None,
        }
    }

    pub fn queue(tx: UnboundedSender<CompletionRecord>, tag: u64) -> Self {
        AsyncCompletion {
            callback: None,
            queue: Some((tx, tag)),
        }
    }
}

impl std::fmt::Debug for AsyncCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncCompletion")
            .field("callback", &self.callback.is_some())
            .field("queue", &self.queue.as_ref().map(|(_, tag)| *tag))
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// The platform's standard mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    ContentReplace,
    ContentMerge,
    SaveReplace,
    /// Per-user save area, keyed by the user's persistent id.
    SaveReplaceForUser(u32),
}

impl Preset {
    pub fn prefix(&self) -> String {
        match self {
            Preset::ContentReplace | Preset::ContentMerge => "/vol/content".to_string(),
            Preset::SaveReplace => "/vol/save".to_string(),
            Preset::SaveReplaceForUser(id) => format!("/vol/save/{:08X}", 0x8000_0000 | id),
        }
    }

    pub fn mode(&self) -> LayerMode {
        match self {
            Preset::ContentMerge => LayerMode::Merge,
            _ => LayerMode::Replace,
        }
    }

    pub fn writable(&self) -> bool {
        matches!(self, Preset::SaveReplace | Preset::SaveReplaceForUser(_))
    }

    pub fn spec(&self, name: &str, replacement: &str) -> LayerSpec {
        LayerSpec::new(name, &self.prefix(), replacement, self.mode()).writable(self.writable())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Preset::ContentReplace, "/vol/content", LayerMode::Replace, false, false)]
    #[case(Preset::ContentMerge, "/vol/content", LayerMode::Merge, false, true)]
    #[case(Preset::SaveReplace, "/vol/save", LayerMode::Replace, true, false)]
    #[case(Preset::SaveReplaceForUser(1), "/vol/save/80000001", LayerMode::Replace, true, false)]
    fn test_preset_specs(
        #[case] preset: Preset,
        #[case] prefix: &str,
        #[case] mode: LayerMode,
        #[case] writable: bool,
        #[case] fallback: bool,
    ) {
        let spec = preset.spec("p", "/sd/mod");
        assert_eq!(spec.prefix, prefix);
        assert_eq!(spec.mode, mode);
        assert_eq!(spec.writable, writable);
        assert_eq!(spec.fallback_on_error, fallback);
    }

    #[test]
    fn test_user_save_prefix_is_hex_padded() {
        assert_eq!(Preset::SaveReplaceForUser(0xAB).prefix(), "/vol/save/800000AB");
    }
}
