//! Debounced filesystem watcher feeding the publish queue.

use super::state::relative_to;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use notify_debouncer_mini::{DebouncedEventKind, Debouncer, new_debouncer};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;
use tessera_core::DatasetPath;

/// Watch `root` recursively and push every changed dataset path on `queue`.
///
/// Each debounce tick enqueues a path at most once. The watcher stops when
/// the returned debouncer is dropped.
pub fn watch(
    root: PathBuf,
    skip: Vec<PathBuf>,
    debounce: Duration,
    queue: flume::Sender<DatasetPath>,
) -> notify::Result<Debouncer<RecommendedWatcher>> {
    let watch_root = root.clone();
    let mut debouncer = new_debouncer(
        debounce,
        move |events: Result<Vec<notify_debouncer_mini::DebouncedEvent>, notify::Error>| {
            let events = match events {
                Ok(events) => events,
                Err(e) => {
                    tracing::warn!(error = %e, "Watcher error");
                    return;
                }
            };

            let changed: BTreeSet<DatasetPath> = events
                .iter()
                .filter(|event| {
                    matches!(
                        event.kind,
                        DebouncedEventKind::Any | DebouncedEventKind::AnyContinuous
                    )
                })
                .filter_map(|event| relative_to(&root, &skip, &event.path))
                .collect();

            for path in changed {
                tracing::debug!(%path, "Change detected");
                if queue.send(path).is_err() {
                    // Workers are gone; shutting down.
                    return;
                }
            }
        },
    )?;

    debouncer
        .watcher()
        .watch(&watch_root, RecursiveMode::Recursive)?;
    tracing::info!(root = %watch_root.display(), ?debounce, "Watching for changes");
    Ok(debouncer)
}
