use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use reem::{Reem, TeraEngine, load_snapshot, save_snapshot};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{RecvTimeoutError, channel};
use std::time::{Duration, Instant};

const DEBOUNCE_DURATION: Duration = Duration::from_millis(300);

type CommandResult = Result<(), Box<dyn std::error::Error>>;

fn open_project(root: &Path) -> Result<Reem, Box<dyn std::error::Error>> {
    let root = fs::canonicalize(root)?;
    let mut reem = Reem::load(&root)?;
    install_engine(&mut reem)?;
    Ok(reem)
}

fn install_engine(reem: &mut Reem) -> reem::Result<()> {
    if reem.fs.layout.is_dir() {
        let engine = TeraEngine::new(&reem.fs.layout)?;
        reem.view.set_engine(engine);
    } else {
        tracing::debug!(
            "No layout directory at {}, copying content as is",
            reem.fs.layout.display()
        );
    }
    Ok(())
}

/// Absolute form of `file` that still works once the file is gone.
fn resolve(root: &Path, file: &Path) -> PathBuf {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    };

    if let Ok(canonical) = fs::canonicalize(&path) {
        return canonical;
    }

    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => fs::canonicalize(parent)
            .map(|parent| parent.join(name))
            .unwrap_or(path),
        _ => path,
    }
}

pub fn build_site(root: &Path) -> CommandResult {
    let start = Instant::now();
    let mut reem = open_project(root)?;

    let tree = reem.build()?;
    save_snapshot(&reem.fs.root, &tree)?;

    tracing::info!(
        "Site written to {} in {:.2?}",
        reem.fs.destination.display(),
        start.elapsed()
    );
    Ok(())
}

pub fn rebuild_file(root: &Path, file: &Path) -> CommandResult {
    let mut reem = open_project(root)?;
    let file = resolve(&reem.fs.root, file);

    if let Some(tree) = load_snapshot(&reem.fs.root) {
        reem.restore(tree)?;
    }

    let tree = reem.diff_build(&file)?;
    save_snapshot(&reem.fs.root, &tree)?;
    Ok(())
}

pub fn watch_site(root: &Path) -> CommandResult {
    let mut reem = open_project(root)?;
    let tree = reem.build()?;
    save_snapshot(&reem.fs.root, &tree)?;

    let (notify_tx, notify_rx) = channel::<notify::Result<Event>>();
    let mut watcher = RecommendedWatcher::new(
        notify_tx,
        Config::default().with_poll_interval(Duration::from_millis(200)),
    )?;

    for dir in [&reem.fs.source, &reem.fs.layout] {
        if dir.exists() {
            watcher.watch(dir, RecursiveMode::Recursive)?;
        }
    }

    tracing::info!("Watching {} for changes", reem.fs.root.display());

    let destination = reem.fs.destination.clone();
    loop {
        let first = match notify_rx.recv() {
            Ok(event) => event,
            Err(error) => {
                tracing::error!("Watch error: {error}");
                break;
            }
        };

        let mut changed = BTreeSet::new();
        let mut pending = vec![first];
        loop {
            match notify_rx.recv_timeout(DEBOUNCE_DURATION) {
                Ok(event) => pending.push(event),
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }

        for event in pending {
            match event {
                Ok(event) => changed.extend(event.paths),
                Err(error) => tracing::warn!("Watch error: {error}"),
            }
        }
        changed.retain(|path: &PathBuf| !path.starts_with(&destination));

        if changed.iter().any(|path| path.starts_with(&reem.fs.layout)) {
            install_engine(&mut reem)?;
        }

        for path in changed {
            tracing::info!("Changed: {}", path.display());
            match reem.diff_build(&path) {
                Ok(tree) => save_snapshot(&reem.fs.root, &tree)?,
                Err(error) => tracing::error!("Rebuild error: {error}"),
            }
        }
    }

    Ok(())
}
