//! Common test helpers.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A temp directory populated from a fixture description.
///
/// Fixtures use the `//- /relative/path` convention: each marker starts a
/// new file, and everything up to the next marker is its content.
pub struct TestWorkspace {
    /// Temp dir backing the workspace.
    pub root: TempDir,
    canonical_root: PathBuf,
}

impl TestWorkspace {
    /// Writes a fixture into a fresh temp directory.
    pub fn new(fixture: &str) -> Self {
        let root = TempDir::new().expect("failed to create temp dir");
        for (path, content) in parse_fixture(fixture) {
            let abs = root.path().join(path);
            std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
            std::fs::write(&abs, content).unwrap();
        }
        let canonical_root = root.path().canonicalize().expect("canonicalize temp dir");
        Self {
            root,
            canonical_root,
        }
    }

    /// Copies an on-disk fixture project into a fresh temp directory.
    pub fn from_fixture_dir(name: &str) -> Self {
        let source = fixture_path(name);
        let root = TempDir::new().expect("failed to create temp dir");
        copy_dir(&source, root.path());
        let canonical_root = root.path().canonicalize().expect("canonicalize temp dir");
        Self {
            root,
            canonical_root,
        }
    }

    /// Canonicalized workspace root.
    pub fn root(&self) -> &Path {
        &self.canonical_root
    }

    /// Absolute path for a workspace-relative path.
    pub fn apath(&self, relative: &str) -> PathBuf {
        self.canonical_root.join(relative)
    }

    /// Reads a workspace file.
    pub fn read(&self, relative: &str) -> String {
        std::fs::read_to_string(self.apath(relative)).unwrap()
    }
}

/// Splits a `//- /path` fixture into (relative path, content) pairs.
pub fn parse_fixture(input: &str) -> Vec<(PathBuf, String)> {
    let mut files = Vec::new();
    let mut current_path: Option<PathBuf> = None;
    let mut current_content = String::new();

    for line in input.lines() {
        if let Some(path) = line.strip_prefix("//- ") {
            if let Some(previous) = current_path.take() {
                files.push((previous, std::mem::take(&mut current_content)));
            }
            current_path = Some(PathBuf::from(path.trim().trim_start_matches('/')));
        } else if current_path.is_some() {
            current_content.push_str(line);
            current_content.push('\n');
        }
    }
    if let Some(path) = current_path {
        files.push((path, current_content));
    }
    files
}

/// Path of a shipped fixture project.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn copy_dir(from: &Path, to: &Path) {
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            std::fs::create_dir_all(&target).unwrap();
            copy_dir(&entry.path(), &target);
        } else {
            std::fs::copy(entry.path(), &target).unwrap();
        }
    }
}

/// Whether an executable is installed; used to skip live-server tests.
pub fn server_available(command: &str) -> bool {
    which::which(command).is_ok()
}

/// Builds an isolated cache/config environment for one test and returns
/// the guard directory. Callers pass the paths to spawned binaries or
/// set them on the environment while holding a serial lock.
pub struct IsolatedEnv {
    /// Cache directory (endpoint file, logs, hover snapshot).
    pub cache: TempDir,
    /// Config file path (may not exist).
    pub config: PathBuf,
}

impl IsolatedEnv {
    /// Creates an isolated environment with an empty config.
    pub fn new() -> Self {
        let cache = TempDir::new().unwrap();
        let config = cache.path().join("config.toml");
        Self { cache, config }
    }

    /// Environment variables to launch leta binaries with.
    pub fn vars(&self) -> Vec<(&'static str, String)> {
        vec![
            (
                "LETA_CACHE_DIR",
                self.cache.path().to_string_lossy().into_owned(),
            ),
            ("LETA_CONFIG", self.config.to_string_lossy().into_owned()),
        ]
    }
}

impl Default for IsolatedEnv {
    fn default() -> Self {
        Self::new()
    }
}
