use crate::error::{ReemError, Result};
use crate::parsing::{extract_frontmatter, is_markdown};
use crate::tree::{ContentNode, ContentTree, NodeDescriptor, NodeId};
use std::fs;
use std::path::Path;
use walkdir::WalkDir;

/// Turns a source directory into a content tree.
pub trait Scanner {
    fn scan(&self, root: &Path) -> Result<ContentTree>;

    /// Reconstructs a single node from disk. `Ok(None)` when it no longer exists.
    fn read(&self, descriptor: &NodeDescriptor) -> Result<Option<ContentNode>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsScanner;

impl FsScanner {
    pub fn new() -> Self {
        Self
    }

    fn scan_dir(&self, tree: &mut ContentTree, list: NodeId, dir: &Path) -> Result<()> {
        for entry in WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .sort_by_file_name()
        {
            let entry = entry.map_err(|error| ReemError::WalkDir {
                path: dir.to_path_buf(),
                message: error.to_string(),
            })?;

            let path = entry.path();
            let name = entry.file_name().to_string_lossy();
            if is_ignored(&name) {
                tracing::debug!("Skipping {}", path.display());
                continue;
            }

            if path.is_dir() {
                let child = tree.attach(list, ContentNode::list(dir, name.to_string()))?;
                self.scan_dir(tree, child, path)?;
            } else if path.is_file() {
                tree.attach(list, read_file(path)?)?;
            }
        }

        Ok(())
    }
}

impl Scanner for FsScanner {
    fn scan(&self, root: &Path) -> Result<ContentTree> {
        let parent = root.parent().unwrap_or(Path::new(""));
        let name = root
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut tree = ContentTree::new(ContentNode::list(parent, name));

        if !root.is_dir() {
            tracing::warn!("Source directory {} does not exist", root.display());
            return Ok(tree);
        }

        let list = tree.root();
        self.scan_dir(&mut tree, list, root)?;
        Ok(tree)
    }

    fn read(&self, descriptor: &NodeDescriptor) -> Result<Option<ContentNode>> {
        let path = descriptor.path();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();

        if is_ignored(&name) || !path.exists() {
            return Ok(None);
        }

        if path.is_dir() {
            return Ok(Some(ContentNode::list(&descriptor.source_path, name)));
        }

        read_file(&path).map(Some)
    }
}

fn is_ignored(name: &str) -> bool {
    name.starts_with('.') || name.starts_with('_')
}

fn read_file(path: &Path) -> Result<ContentNode> {
    let descriptor = NodeDescriptor::from_path(path);

    if !is_markdown(&descriptor.extension) {
        return Ok(ContentNode::file(
            descriptor.source_path,
            descriptor.basename,
            descriptor.extension,
        ));
    }

    let raw = fs::read_to_string(path)?;
    let (meta, body) = extract_frontmatter(&raw, path)?;

    let mut node = ContentNode::post(
        descriptor.source_path,
        descriptor.basename,
        descriptor.extension,
    );
    node.meta = meta;
    node.content = body;
    Ok(node)
}
