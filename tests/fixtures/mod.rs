#![allow(dead_code)]

use std::path::{Path, PathBuf};

use git2::Repository;
use tempfile::TempDir;

use trove::{Config, RecordDraft, RecordKind, Store, StoreOptions, SyncConfig, SyncMode, Tag};

pub fn init_bare_remote(path: &Path) -> Result<(), String> {
    Repository::init_bare(path)
        .map_err(|err| format!("git init --bare failed for {path:?}: {err}"))?;
    Ok(())
}

pub fn add_origin_remote(repo_dir: &Path, remote_dir: &Path) -> Result<(), String> {
    let repo = Repository::init(repo_dir)
        .map_err(|err| format!("git init failed for {repo_dir:?}: {err}"))?;
    let remote = remote_dir
        .to_str()
        .ok_or_else(|| format!("remote dir path is not utf8: {remote_dir:?}"))?;
    repo.remote("origin", remote)
        .map_err(|err| format!("git remote add origin failed: {err}"))?;
    Ok(())
}

/// Batch-mode config: sync happens only on explicit flush, so tests
/// control exactly when histories exchange.
pub fn batch_config() -> Config {
    Config {
        sync: SyncConfig {
            mode: SyncMode::Batch,
            debounce_ms: 0,
            backoff_base_ms: 1,
            backoff_max_ms: 10,
            max_retries: 5,
        },
        ..Config::default()
    }
}

/// A temp dir holding a bare remote plus any number of instance repos.
pub struct Rig {
    temp: TempDir,
    pub remote: PathBuf,
}

impl Rig {
    pub fn new() -> Self {
        let temp = TempDir::new().expect("tempdir");
        let remote = temp.path().join("remote.git");
        init_bare_remote(&remote).expect("init bare remote");
        Self { temp, remote }
    }

    /// Open an instance wired to the shared remote, batch mode.
    pub fn instance(&self, name: &str) -> Store {
        let dir = self.temp.path().join(name);
        std::fs::create_dir_all(&dir).expect("instance dir");
        add_origin_remote(&dir, &self.remote).expect("wire origin");
        Store::open(StoreOptions::new(&dir).config(batch_config())).expect("open store")
    }

    /// Open a local-only instance (no remote configured).
    pub fn local_only(&self, name: &str) -> Store {
        let dir = self.temp.path().join(name);
        std::fs::create_dir_all(&dir).expect("instance dir");
        Store::open(StoreOptions::new(&dir).config(batch_config())).expect("open store")
    }
}

pub fn kind(s: &str) -> RecordKind {
    RecordKind::parse(s).expect("valid kind")
}

pub fn tag(s: &str) -> Tag {
    Tag::parse(s).expect("valid tag")
}

pub fn note(content: serde_json::Value, tags: &[&str]) -> RecordDraft {
    RecordDraft::new(kind("note"), content).with_tags(tags.iter().map(|t| tag(t)))
}
