use crate::error::{ReemError, Result};
use crate::tree::{ContentTree, NodeDescriptor};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const CACHE_DIR_NAME: &str = ".reem-cache";
const SNAPSHOT_FILE_NAME: &str = "tree.json";

/// Holds exactly one tree generation. Every store replaces the previous snapshot
/// with a private copy, so callers can never reach the cached tree mutably.
#[derive(Debug, Clone, Default)]
pub struct TreeCache {
    tree: Option<Arc<ContentTree>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, tree: &ContentTree) -> Arc<ContentTree> {
        let snapshot = Arc::new(tree.clone());
        self.tree = Some(Arc::clone(&snapshot));
        snapshot
    }

    pub fn get(&self) -> Option<Arc<ContentTree>> {
        self.tree.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_none()
    }

    pub fn clear(&mut self) {
        self.tree = None;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DiffPlan {
    /// Nothing cached yet: rescan everything.
    Full,
    /// The change is outside the source root (layouts, config): reprocess the
    /// cached tree without rescanning it.
    FullFromCache(Arc<ContentTree>),
    /// Rebuild only the node at this position.
    Read(NodeDescriptor),
}

pub fn classify_change(
    cached: Option<Arc<ContentTree>>,
    source: &Path,
    filename: &Path,
) -> DiffPlan {
    let Some(tree) = cached else {
        return DiffPlan::Full;
    };

    if !filename.starts_with(source) {
        return DiffPlan::FullFromCache(tree);
    }

    DiffPlan::Read(NodeDescriptor::from_path(filename))
}

fn snapshot_path(project_dir: &Path) -> PathBuf {
    project_dir.join(CACHE_DIR_NAME).join(SNAPSHOT_FILE_NAME)
}

pub fn load_snapshot(project_dir: &Path) -> Option<ContentTree> {
    let content = fs::read_to_string(snapshot_path(project_dir)).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn save_snapshot(project_dir: &Path, tree: &ContentTree) -> Result<()> {
    let cache_path = snapshot_path(project_dir);
    if let Some(cache_dir) = cache_path.parent() {
        fs::create_dir_all(cache_dir)?;
    }
    let content = serde_json::to_string(tree).map_err(|error| ReemError::Snapshot {
        path: cache_path.clone(),
        message: error.to_string(),
    })?;
    fs::write(cache_path, content)?;
    Ok(())
}
