use parking_lot::{Mutex, MutexGuard};
use redirectfs::overlay::DirEntry;
use redirectfs::{HostFs, Session, SessionOptions};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

/// Get the path to the redirectfs binary for testing.
#[allow(dead_code)]
pub fn get_redirectfs_path() -> PathBuf {
    assert_cmd::cargo::cargo_bin!("redirectfs").to_path_buf()
}

/// Serializes tests that touch process-wide environment variables.
static ENV_LOCK: Mutex<()> = parking_lot::const_mutex(());

/// Points `REDIRECTFS_CONFIG_DIR` at a fresh temp dir for the guard's lifetime.
pub struct TestConfigContext {
    pub temp_dir: TempDir,
    pub config_dir: PathBuf,
    _env: MutexGuard<'static, ()>,
}

impl Default for TestConfigContext {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl TestConfigContext {
    pub fn new() -> Self {
        let guard = ENV_LOCK.lock();
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let config_dir = temp_dir.path().join("config");

        env::set_var(
            "REDIRECTFS_CONFIG_DIR",
            config_dir.to_string_lossy().to_string(),
        );

        Self {
            temp_dir,
            config_dir,
            _env: guard,
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}

impl Drop for TestConfigContext {
    fn drop(&mut self) {
        env::remove_var("REDIRECTFS_CONFIG_DIR");
    }
}

/// A native root (`<tmp>/native`, standing in for `/`) and a mod directory
/// (`<tmp>/sd/mod`) to redirect into.
#[allow(dead_code)]
pub struct Workspace {
    pub temp_dir: TempDir,
    pub native_root: PathBuf,
    pub mod_dir: PathBuf,
}

impl Default for Workspace {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl Workspace {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let native_root = temp_dir.path().join("native");
        let mod_dir = temp_dir.path().join("sd").join("mod");
        fs::create_dir_all(native_root.join("vol/content")).expect("Failed to create native dir");
        fs::create_dir_all(native_root.join("vol/save")).expect("Failed to create native dir");
        fs::create_dir_all(&mod_dir).expect("Failed to create mod dir");
        Self {
            temp_dir,
            native_root,
            mod_dir,
        }
    }

    /// A second backing directory next to the mod dir.
    pub fn extra_dir(&self, name: &str) -> PathBuf {
        let dir = self.temp_dir.path().join(name);
        fs::create_dir_all(&dir).expect("Failed to create extra dir");
        dir
    }

    /// Write `contents` at the virtual path `virtual_path` of the native fs.
    pub fn write_native(&self, virtual_path: &str, contents: &[u8]) {
        write_file(
            &self.native_root.join(virtual_path.trim_start_matches('/')),
            contents,
        );
    }

    pub fn write_mod(&self, relative: &str, contents: &[u8]) {
        write_file(&self.mod_dir.join(relative), contents);
    }

    pub fn mod_str(&self) -> &str {
        self.mod_dir.to_str().expect("temp path is UTF-8")
    }

    pub fn native(&self) -> Arc<HostFs> {
        Arc::new(HostFs::new(&self.native_root))
    }

    pub fn session(&self) -> Session {
        Session::new(self.native(), SessionOptions::default()).expect("Failed to start session")
    }
}

#[allow(dead_code)]
pub fn write_file(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, contents).expect("Failed to write file");
}

/// Sorted entry names.
#[allow(dead_code)]
pub fn names(entries: &[DirEntry]) -> Vec<String> {
    let mut names: Vec<String> = entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    names
}

/// Read a whole file through the session.
#[allow(dead_code)]
pub fn read_all(session: &Session, client: u32, path: &str) -> Result<Vec<u8>, redirectfs::FsError> {
    let handle = session.open_file(client, path, redirectfs::OpenMode::Read)?;
    let mut out = Vec::new();
    loop {
        let chunk = session.read_file(client, handle, 4096, None)?;
        if chunk.is_empty() {
            break;
        }
        out.extend_from_slice(&chunk);
    }
    session.close_file(client, handle)?;
    Ok(out)
}
