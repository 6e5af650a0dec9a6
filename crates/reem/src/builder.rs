//! Build orchestration.
//!
//! [`Reem`] owns the four middleware stacks, the view configuration, registered
//! pages and the cached tree. A full [`Reem::build`] scans, links, caches and then
//! drives every node through its stack before the fill, clean and write hooks run.
//! [`Reem::diff_build`] narrows a single file change down to one node when it can.

use crate::cache::{DiffPlan, TreeCache, classify_change};
use crate::config::{Config, default_per_page, load_config};
use crate::error::{ErrorHandler, ReemError, Result};
use crate::index::IndexPlugin;
use crate::render::View;
use crate::scan::{FsScanner, Scanner};
use crate::tree::{ContentNode, ContentTree, FileType, NodeDescriptor, NodeId, NodeKind};
use crate::ware::{Cursor, Ware};
use crate::write::{FsWriter, OutputPlan, Writer, is_html, minify};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq)]
pub struct Env {
    pub production: bool,
    pub per_page: usize,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            production: false,
            per_page: default_per_page(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SourceFs {
    pub root: PathBuf,
    pub source: PathBuf,
    pub layout: PathBuf,
    pub destination: PathBuf,
    /// Last tree produced by the scanner, already linked.
    pub tree: Option<Arc<ContentTree>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stack {
    Post,
    File,
    List,
}

pub struct Reem {
    pub env: Env,
    pub fs: SourceFs,
    pub view: View,
    pub pages: Vec<ContentNode>,
    pub post: Ware<Cursor, Reem>,
    pub file: Ware<Cursor, Reem>,
    pub list: Ware<Cursor, Reem>,
    pub page: Ware<ContentNode, Reem>,
    tree: TreeCache,
    scanner: Box<dyn Scanner>,
    writer: Box<dyn Writer>,
    on_error: ErrorHandler,
}

thread_local! {
    static NOOP: ErrorHandler = Rc::new(|_: &ReemError| {});
}

/// Creates a builder rooted at `root`.
pub fn reem(root: impl AsRef<Path>) -> Result<Reem> {
    Reem::new(root)
}

impl Reem {
    /// Fails when `root` is empty or not valid UTF-8. Nothing is read from disk.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let valid = root.to_str().map(|root| !root.is_empty()).unwrap_or(false);
        if !valid {
            return Err(ReemError::Construction {
                root: root.to_path_buf(),
            });
        }

        let mut reem = Self {
            env: Env::default(),
            fs: SourceFs {
                root: root.to_path_buf(),
                source: PathBuf::new(),
                layout: PathBuf::new(),
                destination: PathBuf::new(),
                tree: None,
            },
            view: View::default(),
            pages: Vec::new(),
            post: Ware::new(),
            file: Ware::new(),
            list: Ware::new(),
            page: Ware::new(),
            tree: TreeCache::new(),
            scanner: Box::new(FsScanner::new()),
            writer: Box::new(FsWriter),
            on_error: Self::error(None),
        };
        reem.apply_config(&Config::default());
        reem.list.plug(IndexPlugin);

        Ok(reem)
    }

    /// Like [`Reem::new`], then applies `reem.toml` from the root when present.
    pub fn load(root: impl AsRef<Path>) -> Result<Self> {
        let mut reem = Self::new(root)?;
        let config = load_config(&reem.fs.root)?;
        reem.apply_config(&config);
        Ok(reem)
    }

    pub fn apply_config(&mut self, config: &Config) {
        self.env.production = config.production;
        self.env.per_page = config.per_page.max(1);
        self.fs.source = self.fs.root.join(&config.source);
        self.fs.layout = self.fs.root.join(&config.layout);
        self.fs.destination = self.fs.root.join(&config.destination);
        self.view.extension = config.view.extension.clone();
    }

    pub fn with_scanner(mut self, scanner: impl Scanner + 'static) -> Self {
        self.scanner = Box::new(scanner);
        self
    }

    pub fn with_writer(mut self, writer: impl Writer + 'static) -> Self {
        self.writer = Box::new(writer);
        self
    }

    /// A new, empty stack whose context is this builder.
    pub fn ware<S>(&self) -> Ware<S, Reem> {
        Ware::new()
    }

    /// Returns `handler` itself, or a shared no-op when there is none.
    pub fn error(handler: Option<ErrorHandler>) -> ErrorHandler {
        handler.unwrap_or_else(|| NOOP.with(Rc::clone))
    }

    pub fn on_error(&mut self, handler: Option<ErrorHandler>) {
        self.on_error = Self::error(handler);
    }

    pub fn add_page(&mut self, mut page: ContentNode) {
        page.kind = NodeKind::Page;
        page.fixed_write = true;
        page.render_file = true;
        self.pages.push(page);
    }

    pub fn output_plan(&self) -> OutputPlan {
        OutputPlan::new(
            &self.fs.source,
            &self.fs.destination,
            self.view.extension.clone(),
        )
    }

    pub fn cached(&self) -> Option<Arc<ContentTree>> {
        self.tree.get()
    }

    /// Replaces the cached generation with a private copy of `tree`.
    pub fn cache(&mut self, tree: &ContentTree) -> Arc<ContentTree> {
        self.tree.store(tree)
    }

    /// Seeds the cache from a persisted snapshot.
    pub fn restore(&mut self, mut tree: ContentTree) -> Result<Arc<ContentTree>> {
        tree.compact();
        self.link(&mut tree)?;
        Ok(self.cache(&tree))
    }

    pub fn link(&self, tree: &mut ContentTree) -> Result<()> {
        tree.link_root()
    }

    pub fn render(&self, item: &mut ContentNode) -> Result<String> {
        self.view.render(item)
    }

    pub fn build(&mut self) -> Result<Arc<ContentTree>> {
        self.build_from(None)
    }

    /// Full build. With a `hint` the source is not rescanned and the given tree is
    /// processed instead.
    pub fn build_from(&mut self, hint: Option<Arc<ContentTree>>) -> Result<Arc<ContentTree>> {
        let start = Instant::now();

        let mut tree = match hint {
            Some(cached) => {
                tracing::info!("Rebuilding from cached tree");
                ContentTree::clone(&cached)
            }
            None => {
                tracing::info!("Scanning {}", self.fs.source.display());
                self.scanner.scan(&self.fs.source)?
            }
        };

        self.link(&mut tree)?;
        let snapshot = self.cache(&tree);
        self.fs.tree = Some(Arc::clone(&snapshot));

        let mut ids = tree.posts();
        ids.extend(tree.files());
        ids.extend(tree.lists());
        let mut tree = self.process(tree, &ids)?;

        self.fill()?;
        self.clean(&tree)?;
        self.write(&mut tree)?;

        tracing::info!(
            "Built {} nodes and {} pages in {:.2?}",
            tree.len(),
            self.pages.len(),
            start.elapsed()
        );

        Ok(snapshot)
    }

    pub fn plan(&self, filename: &Path) -> DiffPlan {
        classify_change(self.cached(), &self.fs.source, filename)
    }

    pub fn diff_build(&mut self, filename: &Path) -> Result<Arc<ContentTree>> {
        match self.plan(filename) {
            DiffPlan::Full => {
                tracing::debug!("No cached tree, full build for {}", filename.display());
                self.build()
            }
            DiffPlan::FullFromCache(tree) => {
                tracing::debug!("{} is outside the source", filename.display());
                self.build_from(Some(tree))
            }
            DiffPlan::Read(descriptor) => self.read(&descriptor),
        }
    }

    /// Rebuilds the single node at `descriptor` on top of the cached tree.
    pub fn read(&mut self, descriptor: &NodeDescriptor) -> Result<Arc<ContentTree>> {
        let Some(cached) = self.cached() else {
            return self.build();
        };

        let mut tree = ContentTree::clone(&cached);
        let existing = tree.find(descriptor);

        let Some(node) = self.scanner.read(descriptor)? else {
            return match existing {
                Some(id) => self.remove(tree, id),
                None if tree.find_list(&descriptor.path()).is_some() => self.build(),
                None => {
                    tracing::debug!("{} is not tracked", descriptor.path().display());
                    Ok(cached)
                }
            };
        };

        if node.is_list() {
            tracing::debug!("Directory {} changed", descriptor.path().display());
            return self.build();
        }

        let id = match existing {
            Some(id) => {
                tree.replace(id, node)?;
                id
            }
            None => match tree.find_list(&descriptor.source_path) {
                Some(parent) => tree.attach(parent, node)?,
                None => return self.build(),
            },
        };

        self.link(&mut tree)?;
        let snapshot = self.cache(&tree);

        let mut ids = vec![id];
        ids.extend(tree.parent(id));
        let mut tree = self.process(tree, &ids)?;
        self.write_nodes(&mut tree, &ids)?;

        tracing::info!("Rebuilt {}", descriptor.path().display());
        Ok(snapshot)
    }

    fn remove(&mut self, mut tree: ContentTree, id: NodeId) -> Result<Arc<ContentTree>> {
        let parent = tree.parent(id);
        let path = tree.node(id)?.path();
        tree.detach(id)?;
        let remap = tree.compact();
        let parent = parent.and_then(|parent| remap.get(parent.index()).copied().flatten());

        self.link(&mut tree)?;
        let snapshot = self.cache(&tree);

        let ids: Vec<NodeId> = parent.into_iter().collect();
        let mut tree = self.process(tree, &ids)?;
        self.clean(&tree)?;
        self.write_nodes(&mut tree, &ids)?;

        tracing::info!("Removed {}", path.display());
        Ok(snapshot)
    }

    fn stack_mut(&mut self, stack: Stack) -> &mut Ware<Cursor, Reem> {
        match stack {
            Stack::Post => &mut self.post,
            Stack::File => &mut self.file,
            Stack::List => &mut self.list,
        }
    }

    /// Runs one stack with the builder as context. Plugs registered on the
    /// builder during the run end up after the existing ones.
    fn run_stack(&mut self, stack: Stack, cursor: &mut Cursor) -> Result<()> {
        let mut ware = std::mem::take(self.stack_mut(stack));
        let result = ware.run(self, cursor);

        let slot = self.stack_mut(stack);
        ware.append(slot);
        *slot = ware;

        result
    }

    fn process(&mut self, tree: ContentTree, ids: &[NodeId]) -> Result<ContentTree> {
        let root = tree.root();
        let mut cursor = Cursor::new(tree, root);

        for id in ids {
            cursor.id = *id;
            let stack = match cursor.node()?.filetype() {
                FileType::Post => Stack::Post,
                FileType::File => Stack::File,
                FileType::List => Stack::List,
                FileType::Page => continue,
            };
            tracing::debug!("Running {:?} stack on {}", stack, cursor.id);
            self.run_stack(stack, &mut cursor)?;
        }

        Ok(cursor.into_tree())
    }

    /// Runs the page stack over every registered page.
    pub fn fill(&mut self) -> Result<()> {
        let mut pages = std::mem::take(&mut self.pages);
        let mut ware = std::mem::take(&mut self.page);

        let mut result = Ok(());
        for page in pages.iter_mut() {
            result = ware.run(self, page);
            if result.is_err() {
                break;
            }
        }

        ware.append(&mut self.page);
        self.page = ware;
        pages.append(&mut self.pages);
        self.pages = pages;

        result
    }

    /// Removes files under the destination that no node or page maps to.
    pub fn clean(&self, tree: &ContentTree) -> Result<()> {
        let plan = self.output_plan();
        if !plan.destination.is_dir() {
            return Ok(());
        }

        let mut keep = HashSet::new();
        for id in tree.walk() {
            keep.insert(plan.output_path(tree.node(id)?)?);
        }
        for page in &self.pages {
            keep.insert(plan.output_path(page)?);
        }

        let mut orphans = Vec::new();
        for entry in WalkDir::new(&plan.destination).min_depth(1) {
            let entry = entry.map_err(|error| ReemError::WalkDir {
                path: plan.destination.clone(),
                message: error.to_string(),
            })?;
            if entry.file_type().is_file() && !keep.contains(entry.path()) {
                orphans.push(entry.into_path());
            }
        }

        for orphan in orphans {
            tracing::debug!("Removing {}", orphan.display());
            if let Err(error) = fs::remove_file(&orphan) {
                tracing::warn!("Could not remove {}: {}", orphan.display(), error);
                (self.on_error)(&ReemError::Io(error));
            }
        }

        Ok(())
    }

    /// Persists every reachable node and every registered page.
    pub fn write(&mut self, tree: &mut ContentTree) -> Result<()> {
        let ids = tree.walk();
        self.write_nodes(tree, &ids)?;

        let mut pages = std::mem::take(&mut self.pages);
        let result = pages.iter_mut().try_for_each(|page| self.write_node(page));
        pages.append(&mut self.pages);
        self.pages = pages;

        result
    }

    fn write_nodes(&self, tree: &mut ContentTree, ids: &[NodeId]) -> Result<()> {
        for id in ids {
            self.write_node(tree.node_mut(*id)?)?;
        }
        Ok(())
    }

    fn write_node(&self, node: &mut ContentNode) -> Result<()> {
        let destination = self.output_plan().output_path(node)?;

        if node.filetype() == FileType::File && !node.render_file {
            return self.writer.copy(&node.path(), &destination);
        }

        let output = self.render(node)?;
        let bytes = if self.env.production && is_html(&destination) {
            minify(&output)
        } else {
            output.into_bytes()
        };

        self.writer.write(&destination, &bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::TeraEngine;
    use std::cell::{Cell, RefCell};
    use tempfile::TempDir;

    struct StubScanner {
        source: Rc<RefCell<ContentTree>>,
        scans: Rc<Cell<usize>>,
        reads: Rc<Cell<usize>>,
    }

    impl Scanner for StubScanner {
        fn scan(&self, _: &Path) -> Result<ContentTree> {
            self.scans.set(self.scans.get() + 1);
            Ok(self.source.borrow().clone())
        }

        fn read(&self, descriptor: &NodeDescriptor) -> Result<Option<ContentNode>> {
            self.reads.set(self.reads.get() + 1);
            let source = self.source.borrow();
            Ok(source
                .find(descriptor)
                .and_then(|id| source.get(id))
                .cloned())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingWriter {
        written: Rc<RefCell<Vec<(PathBuf, String)>>>,
    }

    impl Writer for RecordingWriter {
        fn write(&self, destination: &Path, contents: &[u8]) -> Result<()> {
            self.written.borrow_mut().push((
                destination.to_path_buf(),
                String::from_utf8_lossy(contents).to_string(),
            ));
            Ok(())
        }

        fn copy(&self, source: &Path, destination: &Path) -> Result<()> {
            self.written.borrow_mut().push((
                destination.to_path_buf(),
                format!("copy:{}", source.display()),
            ));
            Ok(())
        }
    }

    struct Harness {
        reem: Reem,
        source: Rc<RefCell<ContentTree>>,
        scans: Rc<Cell<usize>>,
        reads: Rc<Cell<usize>>,
        writer: RecordingWriter,
    }

    impl Harness {
        fn new() -> Self {
            let source = Rc::new(RefCell::new(stub_tree()));
            let scans = Rc::new(Cell::new(0));
            let reads = Rc::new(Cell::new(0));
            let writer = RecordingWriter::default();
            let reem = reem("/project")
                .unwrap()
                .with_scanner(StubScanner {
                    source: Rc::clone(&source),
                    scans: Rc::clone(&scans),
                    reads: Rc::clone(&reads),
                })
                .with_writer(writer.clone());

            Self {
                reem,
                source,
                scans,
                reads,
                writer,
            }
        }

        fn written_paths(&self) -> Vec<PathBuf> {
            self.writer
                .written
                .borrow()
                .iter()
                .map(|(path, _)| path.clone())
                .collect()
        }

        fn written(&self, path: &str) -> Option<String> {
            self.writer
                .written
                .borrow()
                .iter()
                .rev()
                .find(|(written, _)| written == Path::new(path))
                .map(|(_, contents)| contents.clone())
        }

        fn reset_writes(&self) {
            self.writer.written.borrow_mut().clear();
        }
    }

    fn stub_tree() -> ContentTree {
        let mut tree = ContentTree::new(ContentNode::list("/project", "source"));
        let root = tree.root();
        let mut hello = ContentNode::post("/project/source", "hello", ".md");
        hello.content = "Hello".to_string();
        tree.attach(root, hello).unwrap();
        tree.attach(root, ContentNode::file("/project/source", "logo", ".png"))
            .unwrap();
        let blog = tree
            .attach(root, ContentNode::list("/project/source", "blog"))
            .unwrap();
        tree.attach(blog, ContentNode::post("/project/source/blog", "first", ".md"))
            .unwrap();
        tree
    }

    fn descriptor(path: &str) -> NodeDescriptor {
        NodeDescriptor::from_path(Path::new(path))
    }

    #[test]
    fn test_string_root_constructs() {
        let reem = reem("/project").unwrap();
        assert!(!reem.env.production);
        assert_eq!(reem.fs.source, PathBuf::from("/project/source"));
        assert_eq!(reem.fs.layout, PathBuf::from("/project/layout"));
        assert_eq!(reem.fs.destination, PathBuf::from("/project/site"));
        assert_eq!(reem.view.extension, ".html");
        assert!(reem.view.engine.is_none());
        assert!(reem.pages.is_empty());
        assert!(reem.cached().is_none());
    }

    #[test]
    fn test_empty_root_is_rejected() {
        assert!(matches!(
            Reem::new(""),
            Err(ReemError::Construction { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_root_is_rejected() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let root = Path::new(OsStr::from_bytes(b"/tmp/\xff"));
        assert!(matches!(
            Reem::new(root),
            Err(ReemError::Construction { .. })
        ));
    }

    #[test]
    fn test_stacks_are_bound_to_builder() {
        let reem = reem("/project").unwrap();

        assert!(reem.post.is_owner_bound());
        assert!(reem.file.is_owner_bound());
        assert!(reem.list.is_owner_bound());
        assert!(reem.page.is_owner_bound());
        assert!(reem.post.is_empty());
        assert!(reem.file.is_empty());
        assert!(reem.page.is_empty());
    }

    #[test]
    fn test_list_stack_has_index_plugin() {
        let reem = reem("/project").unwrap();
        assert_eq!(reem.list.len(), 1);
    }

    #[test]
    fn test_ware_is_empty_and_owner_bound() {
        let reem = reem("/project").unwrap();
        let ware: Ware<ContentNode, Reem> = reem.ware();
        assert!(ware.is_empty());
        assert!(ware.is_owner_bound());
    }

    #[test]
    fn test_stack_bound_to_another_builder() {
        let mut other = reem("/other").unwrap();
        other.env.per_page = 3;
        let mut ware: Ware<Cursor, Reem> = Ware::bound(other);
        ware.plug(|bound: &mut Reem, cursor: &mut Cursor| -> Result<()> {
            let per_page = bound.env.per_page;
            cursor.node_mut()?.meta.insert("per_page", per_page);
            bound.env.production = true;
            Ok(())
        });
        let mut reem = reem("/project").unwrap();
        let tree = ContentTree::new(ContentNode::list("/project", "source"));
        let root = tree.root();
        let mut cursor = Cursor::new(tree, root);

        ware.run(&mut reem, &mut cursor).unwrap();

        assert!(!reem.env.production);
        assert!(ware.context().unwrap().env.production);
        assert_eq!(cursor.node().unwrap().meta.get_i64("per_page"), Some(3));
    }

    #[test]
    fn test_add_page_forces_page_flags() {
        let mut reem = reem("/project").unwrap();
        let mut page = ContentNode::post("", "about", ".html");
        page.render_file = false;

        reem.add_page(page);

        let last = reem.pages.last().unwrap();
        assert_eq!(last.filetype(), FileType::Page);
        assert!(last.fixed_write);
        assert!(last.render_file);
        assert_eq!(last.basename, "about");
    }

    #[test]
    fn test_error_returns_given_handler() {
        let handler: ErrorHandler = Rc::new(|_: &ReemError| {});
        let returned = Reem::error(Some(Rc::clone(&handler)));
        assert!(Rc::ptr_eq(&handler, &returned));
    }

    #[test]
    fn test_error_without_handler_is_stable_noop() {
        let first = Reem::error(None);
        let second = Reem::error(None);

        first(&ReemError::plugin("ignored"));
        assert!(Rc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_on_error_installs_handler() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let mut reem = reem("/project").unwrap();

        reem.on_error(Some(Rc::new(move |error: &ReemError| {
            sink.borrow_mut().push(error.to_string());
        })));
        (reem.on_error)(&ReemError::plugin("boom"));

        assert_eq!(seen.borrow().as_slice(), ["Plugin error: boom".to_string()]);
    }

    #[test]
    fn test_cache_isolates_caller_tree() {
        let mut reem = reem("/project").unwrap();
        let mut tree = ContentTree::new(ContentNode::list("/project", "source"));
        assert!(reem.cached().is_none());

        let snapshot = reem.cache(&tree);
        assert_eq!(*snapshot, tree);

        let root = tree.root();
        tree.attach(root, ContentNode::post("/project/source", "late", ".md"))
            .unwrap();

        assert_eq!(reem.cached().unwrap().len(), 1);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_render_delegates_to_view() {
        let mut reem = reem("/project").unwrap();
        reem.view.extension = ".html".to_string();
        reem.view
            .set_engine(|view: &str, _: &ContentNode| -> Result<String> { Ok(view.to_string()) });
        let mut item = ContentNode::post("/project/source", "hello", ".md");

        assert_eq!(reem.render(&mut item).unwrap(), "post.html");
        assert_eq!(item.view.as_deref(), Some("post.html"));
    }

    #[test]
    fn test_load_applies_config_file() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(
            dir.path().join("reem.toml"),
            "production = true\nsource = \"content\"\n[view]\nextension = \".tera\"\n",
        )
        .unwrap();

        let reem = Reem::load(dir.path()).unwrap();

        assert!(reem.env.production);
        assert_eq!(reem.fs.source, dir.path().join("content"));
        assert_eq!(reem.view.extension, ".tera");
    }

    #[test]
    fn test_build_writes_every_node() {
        let mut harness = Harness::new();

        let tree = harness.reem.build().unwrap();

        assert_eq!(harness.scans.get(), 1);
        assert_eq!(tree.len(), 5);
        assert_eq!(
            harness.written_paths(),
            vec![
                PathBuf::from("/project/site/index.html"),
                PathBuf::from("/project/site/hello.html"),
                PathBuf::from("/project/site/logo.png"),
                PathBuf::from("/project/site/blog/index.html"),
                PathBuf::from("/project/site/blog/first.html"),
            ]
        );
        assert_eq!(harness.written("/project/site/hello.html").unwrap(), "Hello");
        assert_eq!(
            harness.written("/project/site/logo.png").unwrap(),
            "copy:/project/source/logo.png"
        );
    }

    #[test]
    fn test_build_links_and_caches_tree() {
        let mut harness = Harness::new();

        let tree = harness.reem.build().unwrap();

        let root = tree.root();
        assert_eq!(tree.node(root).unwrap().list, None);
        let blog = tree.find_list(Path::new("/project/source/blog")).unwrap();
        let first = tree.find(&descriptor("/project/source/blog/first.md")).unwrap();
        assert_eq!(tree.parent(first), Some(blog));
        assert_eq!(tree.parent(blog), Some(root));

        assert!(Arc::ptr_eq(&tree, &harness.reem.cached().unwrap()));
        assert!(Arc::ptr_eq(&tree, harness.reem.fs.tree.as_ref().unwrap()));
    }

    #[test]
    fn test_diff_build_without_cache_is_full_build() {
        let mut harness = Harness::new();

        let tree = harness
            .reem
            .diff_build(Path::new("/project/source/hello.md"))
            .unwrap();

        assert_eq!(harness.scans.get(), 1);
        assert_eq!(harness.reads.get(), 0);
        assert_eq!(tree.len(), 5);
    }

    #[test]
    fn test_change_outside_source_reprocesses_cache() {
        let mut harness = Harness::new();
        let first = harness.reem.build().unwrap();
        harness.reset_writes();

        let plan = harness.reem.plan(Path::new("/project/layout/post.html"));
        assert!(matches!(plan, DiffPlan::FullFromCache(_)));

        let second = harness
            .reem
            .diff_build(Path::new("/project/layout/post.html"))
            .unwrap();

        assert_eq!(harness.scans.get(), 1);
        assert_eq!(harness.reads.get(), 0);
        assert_eq!(harness.written_paths().len(), 5);
        assert_eq!(*first, *second);
    }

    #[test]
    fn test_plan_for_extensionless_file() {
        let mut harness = Harness::new();
        harness.reem.build().unwrap();

        let plan = harness
            .reem
            .plan(Path::new("/project/source/directory/file"));

        assert_eq!(
            plan,
            DiffPlan::Read(NodeDescriptor {
                source_path: PathBuf::from("/project/source/directory"),
                basename: "file".to_string(),
                extension: String::new(),
            })
        );
    }

    #[test]
    fn test_read_rebuilds_node_and_parent_list() {
        let mut harness = Harness::new();
        harness.reem.build().unwrap();
        harness.reset_writes();

        {
            let mut source = harness.source.borrow_mut();
            let id = source
                .find(&descriptor("/project/source/blog/first.md"))
                .unwrap();
            source.node_mut(id).unwrap().content = "Updated".to_string();
        }

        let tree = harness
            .reem
            .diff_build(Path::new("/project/source/blog/first.md"))
            .unwrap();

        assert_eq!(harness.scans.get(), 1);
        assert_eq!(harness.reads.get(), 1);
        assert_eq!(
            harness.written_paths(),
            vec![
                PathBuf::from("/project/site/blog/first.html"),
                PathBuf::from("/project/site/blog/index.html"),
            ]
        );
        assert_eq!(
            harness.written("/project/site/blog/first.html").unwrap(),
            "Updated"
        );
        let first = tree.find(&descriptor("/project/source/blog/first.md")).unwrap();
        assert_eq!(tree.node(first).unwrap().content, "Updated");
        assert!(tree.parent(first).is_some());
    }

    #[test]
    fn test_read_attaches_new_node() {
        let mut harness = Harness::new();
        harness.reem.build().unwrap();

        {
            let mut source = harness.source.borrow_mut();
            let blog = source.find_list(Path::new("/project/source/blog")).unwrap();
            source
                .attach(blog, ContentNode::post("/project/source/blog", "second", ".md"))
                .unwrap();
        }

        let tree = harness
            .reem
            .diff_build(Path::new("/project/source/blog/second.md"))
            .unwrap();

        let blog = tree.find_list(Path::new("/project/source/blog")).unwrap();
        let second = tree.find(&descriptor("/project/source/blog/second.md")).unwrap();
        assert_eq!(tree.parent(second), Some(blog));
        assert_eq!(tree.node(blog).unwrap().children().unwrap().posts.len(), 2);
        assert!(harness.written("/project/site/blog/second.html").is_some());
        assert_eq!(harness.scans.get(), 1);
    }

    #[test]
    fn test_read_detaches_removed_node() {
        let mut harness = Harness::new();
        harness.reem.build().unwrap();
        harness.reset_writes();

        {
            let mut source = harness.source.borrow_mut();
            let id = source
                .find(&descriptor("/project/source/blog/first.md"))
                .unwrap();
            source.detach(id).unwrap();
        }

        let tree = harness
            .reem
            .diff_build(Path::new("/project/source/blog/first.md"))
            .unwrap();

        assert!(tree.find(&descriptor("/project/source/blog/first.md")).is_none());
        assert_eq!(tree.len(), 4);
        let stored = serde_json::to_value(&*tree).unwrap();
        assert_eq!(stored["nodes"].as_array().unwrap().len(), 4);
        assert_eq!(
            harness.written_paths(),
            vec![PathBuf::from("/project/site/blog/index.html")]
        );
        assert_eq!(harness.scans.get(), 1);
    }

    #[test]
    fn test_read_of_untracked_missing_file_keeps_cache() {
        let mut harness = Harness::new();
        let built = harness.reem.build().unwrap();
        harness.reset_writes();

        let tree = harness
            .reem
            .diff_build(Path::new("/project/source/nope.md"))
            .unwrap();

        assert!(Arc::ptr_eq(&built, &tree));
        assert!(harness.written_paths().is_empty());
    }

    #[test]
    fn test_directory_change_is_full_build() {
        let mut harness = Harness::new();
        harness.reem.build().unwrap();

        harness
            .reem
            .diff_build(Path::new("/project/source/blog"))
            .unwrap();

        assert_eq!(harness.scans.get(), 2);
    }

    #[test]
    fn test_new_node_without_tracked_list_is_full_build() {
        let mut harness = Harness::new();
        harness.reem.build().unwrap();

        {
            let mut source = harness.source.borrow_mut();
            let root = source.root();
            let other = source
                .attach(root, ContentNode::list("/project/source", "other"))
                .unwrap();
            source
                .attach(other, ContentNode::post("/project/source/other", "x", ".md"))
                .unwrap();
        }

        let tree = harness
            .reem
            .diff_build(Path::new("/project/source/other/x.md"))
            .unwrap();

        assert_eq!(harness.scans.get(), 2);
        assert_eq!(tree.len(), 7);
    }

    #[test]
    fn test_restore_allows_read_without_scan() {
        let mut harness = Harness::new();
        harness.reem.restore(stub_tree()).unwrap();

        harness
            .reem
            .diff_build(Path::new("/project/source/hello.md"))
            .unwrap();

        assert_eq!(harness.scans.get(), 0);
        assert_eq!(harness.reads.get(), 1);
        assert!(harness.written("/project/site/hello.html").is_some());
    }

    #[test]
    fn test_restore_drops_unreachable_nodes() {
        let mut harness = Harness::new();
        let mut tree = stub_tree();
        let hello = tree.find(&descriptor("/project/source/hello.md")).unwrap();
        tree.detach(hello).unwrap();

        let cached = harness.reem.restore(tree).unwrap();

        let stored = serde_json::to_value(&*cached).unwrap();
        assert_eq!(stored["nodes"].as_array().unwrap().len(), 4);
        assert_eq!(cached.len(), 4);
        assert_eq!(cached.posts().len(), 1);
    }

    #[test]
    fn test_stacks_run_posts_then_files_then_lists() {
        let mut harness = Harness::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        for (stack, label) in [
            (&mut harness.reem.post, "post"),
            (&mut harness.reem.file, "file"),
            (&mut harness.reem.list, "list"),
        ] {
            let log = Rc::clone(&log);
            stack.plug(move |_: &mut Reem, cursor: &mut Cursor| -> Result<()> {
                log.borrow_mut()
                    .push(format!("{}:{}", label, cursor.node()?.basename));
                Ok(())
            });
        }

        harness.reem.build().unwrap();

        assert_eq!(
            log.borrow().as_slice(),
            [
                "post:hello",
                "post:first",
                "file:logo",
                "list:source",
                "list:blog"
            ]
        );
    }

    #[test]
    fn test_plug_error_aborts_build() {
        let mut harness = Harness::new();
        harness
            .reem
            .post
            .plug(|_: &mut Reem, _: &mut Cursor| -> Result<()> {
                Err(ReemError::plugin("nope"))
            });

        let result = harness.reem.build();

        assert!(matches!(result, Err(ReemError::Plugin { .. })));
        assert!(harness.written_paths().is_empty());
    }

    #[test]
    fn test_plugs_added_during_run_are_kept() {
        let mut harness = Harness::new();
        let added = Rc::new(Cell::new(false));
        let runs = Rc::new(Cell::new(0));

        let (flag, counter) = (Rc::clone(&added), Rc::clone(&runs));
        harness
            .reem
            .post
            .plug(move |reem: &mut Reem, _: &mut Cursor| -> Result<()> {
                if !flag.replace(true) {
                    let counter = Rc::clone(&counter);
                    reem.post
                        .plug(move |_: &mut Reem, _: &mut Cursor| -> Result<()> {
                            counter.set(counter.get() + 1);
                            Ok(())
                        });
                }
                Ok(())
            });

        harness.reem.build().unwrap();

        assert_eq!(harness.reem.post.len(), 2);
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_processing_never_mutates_cache() {
        let mut harness = Harness::new();
        harness
            .reem
            .post
            .plug(|_: &mut Reem, cursor: &mut Cursor| -> Result<()> {
                cursor.node_mut()?.content = "changed".to_string();
                Ok(())
            });

        let tree = harness.reem.build().unwrap();

        let hello = tree.find(&descriptor("/project/source/hello.md")).unwrap();
        assert_eq!(tree.node(hello).unwrap().content, "Hello");
        assert_eq!(harness.written("/project/site/hello.html").unwrap(), "changed");
    }

    #[test]
    fn test_list_stack_indexes_children() {
        let mut harness = Harness::new();
        let totals = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&totals);
        harness
            .reem
            .list
            .plug(move |_: &mut Reem, cursor: &mut Cursor| -> Result<()> {
                sink.borrow_mut()
                    .push(cursor.node()?.meta.get_i64("total"));
                Ok(())
            });

        harness.reem.build().unwrap();

        assert_eq!(totals.borrow().as_slice(), [Some(1), Some(1)]);
    }

    #[test]
    fn test_fill_runs_page_stack_and_pages_are_written() {
        let mut harness = Harness::new();
        harness.reem.add_page(ContentNode::page("feed", ".xml"));
        harness
            .reem
            .page
            .plug(|reem: &mut Reem, page: &mut ContentNode| -> Result<()> {
                page.content = format!("<feed per-page=\"{}\"/>", reem.env.per_page);
                Ok(())
            });

        harness.reem.build().unwrap();

        assert_eq!(
            harness.written("/project/site/feed.xml").unwrap(),
            "<feed per-page=\"10\"/>"
        );
        assert_eq!(harness.reem.pages.len(), 1);
    }

    #[test]
    fn test_production_minifies_html_output() {
        let mut harness = Harness::new();
        harness.reem.env.production = true;
        harness
            .reem
            .post
            .plug(|_: &mut Reem, cursor: &mut Cursor| -> Result<()> {
                cursor.node_mut()?.content = "<div>\n  <p>hi</p>\n</div>\n".to_string();
                Ok(())
            });

        harness.reem.build().unwrap();

        let hello = harness.written("/project/site/hello.html").unwrap();
        assert!(!hello.contains('\n'));
        assert!(hello.contains("<p>hi</p>"));
    }

    fn create_project() -> TempDir {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("source");
        fs::create_dir_all(source.join("blog")).unwrap();
        fs::create_dir_all(dir.path().join("layout")).unwrap();
        fs::write(
            source.join("blog/2024-01-15-hello.md"),
            "+++\ntitle = \"Hello\"\n+++\n\nFirst *post*",
        )
        .unwrap();
        fs::write(
            source.join("blog/2024-02-01-later.md"),
            "---\ntitle: Later\n---\n\nSecond post",
        )
        .unwrap();
        fs::write(source.join("logo.png"), [0u8, 1, 2]).unwrap();
        fs::write(
            dir.path().join("layout/post.html"),
            "<h1>{{ title }}</h1>{{ content | safe }}",
        )
        .unwrap();
        fs::write(
            dir.path().join("layout/list.html"),
            "{% for entry in meta.index %}{{ entry.title }}@{{ entry.url | safe }};{% endfor %}",
        )
        .unwrap();
        dir
    }

    fn fs_reem(dir: &TempDir) -> Reem {
        let mut reem = reem(dir.path()).unwrap();
        let engine = TeraEngine::new(&reem.fs.layout).unwrap();
        reem.view.set_engine(engine);
        reem
    }

    #[test]
    fn test_filesystem_build_end_to_end() {
        let dir = create_project();
        let site = dir.path().join("site");
        fs::create_dir_all(&site).unwrap();
        fs::write(site.join("stale.html"), "old").unwrap();
        let mut reem = fs_reem(&dir);

        reem.build().unwrap();

        let hello = fs::read_to_string(site.join("blog/2024-01-15-hello.html")).unwrap();
        assert_eq!(hello, "<h1>Hello</h1><p>First <em>post</em></p>\n");
        let index = fs::read_to_string(site.join("blog/index.html")).unwrap();
        assert_eq!(
            index,
            "Later@/blog/2024-02-01-later.html;Hello@/blog/2024-01-15-hello.html;"
        );
        assert_eq!(fs::read(site.join("logo.png")).unwrap(), vec![0, 1, 2]);
        assert!(site.join("index.html").exists());
        assert!(!site.join("stale.html").exists());
    }

    #[test]
    fn test_filesystem_incremental_edit_and_delete() {
        let dir = create_project();
        let site = dir.path().join("site");
        let source = dir.path().join("source");
        let mut reem = fs_reem(&dir);
        reem.build().unwrap();

        let later = source.join("blog/2024-02-01-later.md");
        fs::write(&later, "---\ntitle: Renamed\n---\n\nEdited").unwrap();
        reem.diff_build(&later).unwrap();

        let html = fs::read_to_string(site.join("blog/2024-02-01-later.html")).unwrap();
        assert_eq!(html, "<h1>Renamed</h1><p>Edited</p>\n");
        let index = fs::read_to_string(site.join("blog/index.html")).unwrap();
        assert!(index.starts_with("Renamed@"));

        fs::remove_file(&later).unwrap();
        let tree = reem.diff_build(&later).unwrap();

        assert!(!site.join("blog/2024-02-01-later.html").exists());
        let index = fs::read_to_string(site.join("blog/index.html")).unwrap();
        assert_eq!(index, "Hello@/blog/2024-01-15-hello.html;");
        assert_eq!(tree.posts().len(), 1);
    }

    #[test]
    fn test_clean_reports_nothing_for_tracked_outputs() {
        let dir = create_project();
        let errors = Rc::new(Cell::new(0));
        let counter = Rc::clone(&errors);
        let mut reem = fs_reem(&dir);
        reem.on_error(Some(Rc::new(move |_: &ReemError| {
            counter.set(counter.get() + 1)
        })));

        reem.build().unwrap();
        reem.build().unwrap();

        assert_eq!(errors.get(), 0);
        assert!(dir.path().join("site/blog/index.html").exists());
    }
}
