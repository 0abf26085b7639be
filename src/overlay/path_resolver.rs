use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{RedirectError, Result};
use crate::overlay::types::ClientId;

/// Replace backslashes with `/` and collapse runs of `/` into one.
pub fn normalize_separators(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    for c in path.chars() {
        let c = if c == '\\' { '/' } else { c };
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Case-insensitive (ASCII) prefix test. Returns the remainder after the prefix.
fn strip_prefix_ignore_case<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let head = path.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        path.get(prefix.len()..)
    } else {
        None
    }
}

/// Decides whether a layer claims a path and where it redirects to.
///
/// Paths given to `resolve` are already absolute (see `WorkingDirs::full_path`).
#[derive(Debug)]
pub struct PathResolver {
    prefix: String,
    replacement: String,
    /// Glob patterns, matched against the remainder below `prefix`, that the
    /// layer leaves to lower layers
    ignore_patterns: Vec<glob::Pattern>,
}

impl PathResolver {
    pub fn new(prefix: &str, replacement: &str, ignore_patterns: Vec<String>) -> Result<Self> {
        let compiled_patterns = ignore_patterns
            .into_iter()
            .map(|p| {
                glob::Pattern::new(&p).map_err(|e| {
                    RedirectError::Config(format!("Invalid ignore glob pattern '{}': {}", p, e))
                })
            })
            .collect::<Result<Vec<glob::Pattern>>>()?;

        Ok(PathResolver {
            prefix: prefix.replace('\\', "/"),
            replacement: replacement.replace('\\', "/"),
            ignore_patterns: compiled_patterns,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Whether this layer claims `path`.
    pub fn applies(&self, path: &str) -> bool {
        match strip_prefix_ignore_case(path, &self.prefix) {
            Some(rest) => !self.is_ignored(rest),
            None => false,
        }
    }

    /// Redirected path for `path`, or `None` when the layer does not apply.
    pub fn resolve(&self, path: &str) -> Option<String> {
        let rest = strip_prefix_ignore_case(path, &self.prefix)?;
        if self.is_ignored(rest) {
            tracing::trace!("{} matches an ignore pattern", path);
            return None;
        }
        let redirected = normalize_separators(&format!("{}{}", self.replacement, rest));
        tracing::trace!("Redirect {} -> {}", path, redirected);
        Some(redirected)
    }

    fn is_ignored(&self, rest: &str) -> bool {
        if self.ignore_patterns.is_empty() {
            return false;
        }
        let rest = normalize_separators(rest);
        let relative = rest.trim_start_matches('/');
        self.ignore_patterns.iter().any(|p| p.matches(relative))
    }
}

/// Per-client current working directories for one session.
#[derive(Debug, Default)]
pub struct WorkingDirs {
    dirs: Mutex<HashMap<ClientId, String>>,
}

impl WorkingDirs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absolute form of `path` for `client`.
    ///
    /// Paths beginning with `/` or `\` are taken as-is; anything else is
    /// appended to the client's working directory, which defaults to `/`.
    pub fn full_path(&self, client: ClientId, path: &str) -> String {
        if path.starts_with('/') || path.starts_with('\\') {
            return normalize_separators(path);
        }

        let cwd = self.dirs.lock().get(&client).cloned();
        let cwd = cwd.unwrap_or_else(|| {
            tracing::warn!("No working directory for client {:08X}, using /", client);
            "/".to_string()
        });
        normalize_separators(&format!("{}{}", cwd, path))
    }

    /// Record `path` (resolved against the current directory) as the
    /// client's working directory. Always stored with a trailing `/`.
    pub fn set(&self, client: ClientId, path: &str) {
        let mut full = self.full_path(client, path);
        if !full.ends_with('/') {
            full.push('/');
        }
        tracing::debug!("Working directory of client {:08X} is now {}", client, full);
        self.dirs.lock().insert(client, full);
    }

    pub fn get(&self, client: ClientId) -> Option<String> {
        self.dirs.lock().get(&client).cloned()
    }

    pub fn clear(&self) {
        self.dirs.lock().clear();
    }
}
