//! Content tree model.
//!
//! A build generation is a [`ContentTree`]: an arena of [`ContentNode`]s addressed by
//! [`NodeId`]. Lists own their children by id, and every child points back at its
//! owning list through [`ContentNode::list`]. The root's `list` is always `None`.

use crate::error::{ReemError, Result};
use crate::types::Frontmatter;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Post,
    File,
    List,
    Page,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Post => "post",
            FileType::File => "file",
            FileType::List => "list",
            FileType::Page => "page",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListChildren {
    pub posts: Vec<NodeId>,
    pub files: Vec<NodeId>,
    pub lists: Vec<NodeId>,
}

impl ListChildren {
    pub fn iter(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.posts
            .iter()
            .chain(self.files.iter())
            .chain(self.lists.iter())
            .copied()
    }

    pub fn len(&self) -> usize {
        self.posts.len() + self.files.len() + self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.iter().any(|child| child == id)
    }

    fn remove(&mut self, id: NodeId) -> bool {
        let before = self.len();
        self.posts.retain(|child| *child != id);
        self.files.retain(|child| *child != id);
        self.lists.retain(|child| *child != id);
        before != self.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filetype", rename_all = "lowercase")]
pub enum NodeKind {
    Post,
    File,
    Page,
    List(ListChildren),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    /// Directory containing the node.
    pub source_path: PathBuf,
    pub basename: String,
    pub extension: String,
    pub kind: NodeKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub render_file: bool,
    #[serde(default)]
    pub fixed_write: bool,
    #[serde(default)]
    pub view: Option<String>,
    #[serde(default)]
    pub list: Option<NodeId>,
    #[serde(default)]
    pub meta: Frontmatter,
}

impl ContentNode {
    pub fn new(
        kind: NodeKind,
        source_path: impl Into<PathBuf>,
        basename: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            basename: basename.into(),
            extension: extension.into(),
            kind,
            content: String::new(),
            render_file: false,
            fixed_write: false,
            view: None,
            list: None,
            meta: Frontmatter::default(),
        }
    }

    pub fn post(
        source_path: impl Into<PathBuf>,
        basename: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        let mut node = Self::new(NodeKind::Post, source_path, basename, extension);
        node.render_file = true;
        node
    }

    pub fn file(
        source_path: impl Into<PathBuf>,
        basename: impl Into<String>,
        extension: impl Into<String>,
    ) -> Self {
        Self::new(NodeKind::File, source_path, basename, extension)
    }

    pub fn list(source_path: impl Into<PathBuf>, basename: impl Into<String>) -> Self {
        let mut node = Self::new(
            NodeKind::List(ListChildren::default()),
            source_path,
            basename,
            "",
        );
        node.render_file = true;
        node
    }

    pub fn page(basename: impl Into<String>, extension: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::Page, "", basename, extension);
        node.render_file = true;
        node.fixed_write = true;
        node
    }

    pub fn filetype(&self) -> FileType {
        match self.kind {
            NodeKind::Post => FileType::Post,
            NodeKind::File => FileType::File,
            NodeKind::Page => FileType::Page,
            NodeKind::List(_) => FileType::List,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self.kind, NodeKind::List(_))
    }

    pub fn children(&self) -> Option<&ListChildren> {
        match &self.kind {
            NodeKind::List(children) => Some(children),
            _ => None,
        }
    }

    pub fn children_mut(&mut self) -> Option<&mut ListChildren> {
        match &mut self.kind {
            NodeKind::List(children) => Some(children),
            _ => None,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}{}", self.basename, self.extension)
    }

    /// Full source path of the node itself.
    pub fn path(&self) -> PathBuf {
        self.source_path.join(self.file_name())
    }

    pub fn title(&self) -> String {
        self.meta
            .get_string("title")
            .unwrap_or_else(|| self.basename.clone())
    }

    pub fn descriptor(&self) -> NodeDescriptor {
        NodeDescriptor {
            source_path: self.source_path.clone(),
            basename: self.basename.clone(),
            extension: self.extension.clone(),
        }
    }

    pub fn matches(&self, descriptor: &NodeDescriptor) -> bool {
        self.source_path == descriptor.source_path
            && self.basename == descriptor.basename
            && self.extension == descriptor.extension
    }
}

/// Identifies a node by its position on disk, independent of any tree generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub source_path: PathBuf,
    pub basename: String,
    pub extension: String,
}

impl NodeDescriptor {
    /// Splits `path` into parent directory, stem, and the remaining suffix
    /// (leading dot included, empty when there is none).
    pub fn from_path(path: &Path) -> Self {
        let source_path = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let basename = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_default();
        let extension = path
            .extension()
            .map(|extension| format!(".{}", extension.to_string_lossy()))
            .unwrap_or_default();

        Self {
            source_path,
            basename,
            extension,
        }
    }

    pub fn path(&self) -> PathBuf {
        self.source_path
            .join(format!("{}{}", self.basename, self.extension))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentTree {
    nodes: Vec<ContentNode>,
    root: NodeId,
}

impl ContentTree {
    pub fn new(mut root: ContentNode) -> Self {
        root.list = None;
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&ContentNode> {
        self.nodes.get(id.0)
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut ContentNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn node(&self, id: NodeId) -> Result<&ContentNode> {
        self.get(id).ok_or(ReemError::NodeNotFound { id: id.0 })
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut ContentNode> {
        self.get_mut(id).ok_or(ReemError::NodeNotFound { id: id.0 })
    }

    /// Adds `node` as a child of `parent`, filed under the collection matching its kind.
    pub fn attach(&mut self, parent: NodeId, mut node: ContentNode) -> Result<NodeId> {
        let id = NodeId(self.nodes.len());
        let filetype = node.filetype();
        let children = self
            .node_mut(parent)?
            .children_mut()
            .ok_or(ReemError::NodeNotFound { id: parent.0 })?;

        match filetype {
            FileType::Post => children.posts.push(id),
            FileType::File | FileType::Page => children.files.push(id),
            FileType::List => children.lists.push(id),
        }

        node.list = Some(parent);
        self.nodes.push(node);
        Ok(id)
    }

    /// Unhooks `id` from its owning list. The slot stays in the arena but is no
    /// longer reachable from the root.
    pub fn detach(&mut self, id: NodeId) -> Result<()> {
        if id == self.root {
            return Err(ReemError::NodeNotFound { id: id.0 });
        }
        self.node(id)?;

        for node in &mut self.nodes {
            if let Some(children) = node.children_mut() {
                children.remove(id);
            }
        }

        self.node_mut(id)?.list = None;
        Ok(())
    }

    /// Drops every node no longer reachable from the root and renumbers the rest in
    /// walk order. The result maps each old slot to its new id, `None` when dropped.
    pub fn compact(&mut self) -> Vec<Option<NodeId>> {
        let order = self.walk();
        let mut remap = vec![None; self.nodes.len()];
        for (index, old) in order.iter().enumerate() {
            remap[old.0] = Some(NodeId(index));
        }
        let moved = |id: NodeId| remap.get(id.0).copied().flatten();

        let mut slots: Vec<Option<ContentNode>> = std::mem::take(&mut self.nodes)
            .into_iter()
            .map(Some)
            .collect();
        for old in &order {
            let Some(mut node) = slots[old.0].take() else {
                continue;
            };
            node.list = node.list.and_then(moved);
            if let Some(children) = node.children_mut() {
                for ids in [
                    &mut children.posts,
                    &mut children.files,
                    &mut children.lists,
                ] {
                    *ids = ids.iter().filter_map(|id| moved(*id)).collect();
                }
            }
            self.nodes.push(node);
        }

        if let Some(root) = moved(self.root) {
            self.root = root;
        }
        remap
    }

    /// Swaps the payload at `id`, keeping the parent link and, for lists, the children.
    pub fn replace(&mut self, id: NodeId, mut node: ContentNode) -> Result<()> {
        let existing = self.node_mut(id)?;
        let kept = existing.children().filter(|_| node.is_list()).cloned();
        if let Some(children) = kept {
            node.kind = NodeKind::List(children);
        }
        node.list = existing.list;
        *existing = node;
        Ok(())
    }

    /// Reachable node ids, depth first, each list before its posts, files and lists.
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = vec![self.root];

        while let Some(id) = pending.pop() {
            if !seen.insert(id) {
                continue;
            }
            let Some(node) = self.get(id) else {
                continue;
            };
            order.push(id);
            if let Some(children) = node.children() {
                let mut next: Vec<NodeId> = children.iter().collect();
                next.reverse();
                pending.extend(next);
            }
        }

        order
    }

    pub fn of_type(&self, filetype: FileType) -> Vec<NodeId> {
        self.walk()
            .into_iter()
            .filter(|id| {
                self.get(*id)
                    .map(|node| node.filetype() == filetype)
                    .unwrap_or(false)
            })
            .collect()
    }

    pub fn posts(&self) -> Vec<NodeId> {
        self.of_type(FileType::Post)
    }

    pub fn files(&self) -> Vec<NodeId> {
        self.of_type(FileType::File)
    }

    pub fn lists(&self) -> Vec<NodeId> {
        self.of_type(FileType::List)
    }

    pub fn len(&self) -> usize {
        self.walk().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.get(id).and_then(|node| node.list)
    }

    pub fn find(&self, descriptor: &NodeDescriptor) -> Option<NodeId> {
        self.walk().into_iter().find(|id| {
            self.get(*id)
                .map(|node| node.matches(descriptor))
                .unwrap_or(false)
        })
    }

    /// The tracked list whose own directory is `dir`.
    pub fn find_list(&self, dir: &Path) -> Option<NodeId> {
        self.lists().into_iter().find(|id| {
            self.get(*id)
                .map(|node| node.path() == dir)
                .unwrap_or(false)
        })
    }

    /// Points every descendant of `list` at its immediate parent. Idempotent.
    pub fn link(&mut self, list: NodeId) -> Result<()> {
        let mut seen = HashSet::new();
        let mut pending = vec![list];

        while let Some(parent) = pending.pop() {
            if !seen.insert(parent) {
                continue;
            }
            let children: Vec<NodeId> = match self.node(parent)?.children() {
                Some(children) => children.iter().collect(),
                None => continue,
            };

            for child in children {
                let node = self.node_mut(child)?;
                node.list = Some(parent);
                if node.is_list() {
                    pending.push(child);
                }
            }
        }

        Ok(())
    }

    /// Links the whole tree and clears the root's parent.
    pub fn link_root(&mut self) -> Result<()> {
        let root = self.root;
        self.link(root)?;
        self.node_mut(root)?.list = None;
        Ok(())
    }
}
