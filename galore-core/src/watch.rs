//! Filesystem watch plumbing for gallery refreshes.
//!
//! A thin wrapper around `notify` that collapses raw filesystem notifications
//! into a single debounced refresh trigger per gallery command. The watcher
//! callback runs on the notify backend thread and must never block, so it
//! only classifies the event and enqueues a trigger; the debounce loop on the
//! runtime side waits for the burst to go quiet before firing.

use std::collections::HashSet;
use std::future::Future;
use std::path::PathBuf;

use notify::event::{AccessKind, AccessMode, EventKind};
use notify::{Config as NotifyConfig, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, spawn_blocking};
use tokio::time::{Duration, Instant, sleep_until};
use tracing::{debug, trace, warn};

/// Configuration knobs for watch processing.
#[derive(Clone, Debug)]
pub struct WatchSettings {
    /// Quiet period after the last filesystem event before a refresh fires.
    pub debounce_window: Duration,
    /// Capacity of the trigger channel between watcher callbacks and the
    /// debounce loop.
    pub event_buffer: usize,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(200),
            event_buffer: 64,
        }
    }
}

/// Message from a watcher callback to the debounce loop.
#[derive(Debug)]
pub(crate) enum TriggerMessage {
    Changed,
    Error(String),
}

/// State of the per-command debounce loop.
#[derive(Clone, Copy, Debug)]
enum DebounceState {
    Idle,
    Pending { deadline: Instant },
}

/// Spawns the debounce loop for one gallery command.
///
/// Every `Changed` trigger pushes the deadline out to a full window from
/// now, so the refresh fires only once a burst has been quiet for the whole
/// window. Errors are logged without touching the deadline. The loop exits
/// when the channel closes, which only happens at teardown, so a pending
/// trigger is abandoned rather than flushed.
pub(crate) fn spawn_debounce<F, Fut>(
    command: String,
    window: Duration,
    mut rx: mpsc::Receiver<TriggerMessage>,
    mut on_quiet: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut state = DebounceState::Idle;
        loop {
            match state {
                DebounceState::Idle => match rx.recv().await {
                    Some(TriggerMessage::Changed) => {
                        state = DebounceState::Pending {
                            deadline: Instant::now() + window,
                        };
                    }
                    Some(TriggerMessage::Error(error)) => {
                        warn!(command = %command, %error, "filesystem watch reported an error");
                    }
                    None => break,
                },
                DebounceState::Pending { deadline } => {
                    tokio::select! {
                        _ = sleep_until(deadline) => {
                            state = DebounceState::Idle;
                            debug!(command = %command, "change burst settled, refreshing");
                            on_quiet().await;
                        }
                        msg = rx.recv() => match msg {
                            Some(TriggerMessage::Changed) => {
                                state = DebounceState::Pending {
                                    deadline: Instant::now() + window,
                                };
                            }
                            Some(TriggerMessage::Error(error)) => {
                                warn!(command = %command, %error, "filesystem watch reported an error");
                            }
                            None => break,
                        },
                    }
                }
            }
        }
        debug!(command = %command, "debounce loop stopped");
    })
}

/// Builds one watcher handle covering `directories` for a gallery command.
///
/// Runs the blocking notify setup off the runtime. Directories that cannot
/// be watched are logged and left out of the returned set; a failure to
/// create the watcher itself yields `None` with an empty set. Neither case
/// blocks the refresh that requested the watches.
pub(crate) async fn install_watchers(
    command: &str,
    directories: HashSet<PathBuf>,
    tx: mpsc::Sender<TriggerMessage>,
) -> (Option<RecommendedWatcher>, HashSet<PathBuf>) {
    if directories.is_empty() {
        return (None, HashSet::new());
    }

    let name = command.to_string();
    let dirs: Vec<PathBuf> = directories.into_iter().collect();
    match spawn_blocking(move || build_watcher(&name, dirs, tx)).await {
        Ok(result) => result,
        Err(join_error) => {
            warn!(command = %command, error = %join_error, "watcher installation panicked");
            (None, HashSet::new())
        }
    }
}

fn build_watcher(
    command: &str,
    directories: Vec<PathBuf>,
    tx: mpsc::Sender<TriggerMessage>,
) -> (Option<RecommendedWatcher>, HashSet<PathBuf>) {
    let callback_command = command.to_string();
    let mut watcher = match RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| match res {
            Ok(event) => {
                if !is_change_event(&event.kind) {
                    return;
                }
                trace!(command = %callback_command, kind = ?event.kind, "filesystem change observed");
                // Runs on the notify thread. A full queue means a refresh is
                // already due, so dropping the trigger loses nothing.
                let _ = tx.try_send(TriggerMessage::Changed);
            }
            Err(err) => {
                let _ = tx.try_send(TriggerMessage::Error(err.to_string()));
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(watcher) => watcher,
        Err(error) => {
            warn!(command = %command, %error, "failed to create filesystem watcher");
            return (None, HashSet::new());
        }
    };

    let mut watched = HashSet::new();
    for dir in directories {
        match watcher.watch(&dir, RecursiveMode::NonRecursive) {
            Ok(()) => {
                watched.insert(dir);
            }
            Err(error) => {
                warn!(
                    command = %command,
                    path = %dir.display(),
                    %error,
                    "failed to watch gallery directory"
                );
            }
        }
    }

    if watched.is_empty() {
        return (None, watched);
    }
    (Some(watcher), watched)
}

/// Filters out notifications that do not change gallery contents.
///
/// Reads and opens are ignored so sampling traffic near the galleries does
/// not schedule refreshes; a close-after-write still counts as a change.
fn is_change_event(kind: &EventKind) -> bool {
    match kind {
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        EventKind::Access(_) => false,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use notify::event::{CreateKind, ModifyKind, RemoveKind};
    use tokio::time;

    use super::*;

    const WINDOW: Duration = Duration::from_millis(200);

    fn counting_debounce(
        rx: mpsc::Receiver<TriggerMessage>,
    ) -> (Arc<AtomicUsize>, JoinHandle<()>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let task = spawn_debounce("cats".to_string(), WINDOW, rx, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (fired, task)
    }

    #[test]
    fn classifies_event_kinds() {
        assert!(is_change_event(&EventKind::Create(CreateKind::File)));
        assert!(is_change_event(&EventKind::Modify(ModifyKind::Any)));
        assert!(is_change_event(&EventKind::Remove(RemoveKind::Any)));
        assert!(is_change_event(&EventKind::Access(AccessKind::Close(
            AccessMode::Write
        ))));
        assert!(!is_change_event(&EventKind::Access(AccessKind::Read)));
        assert!(!is_change_event(&EventKind::Access(AccessKind::Open(
            AccessMode::Any
        ))));
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_changes_fires_one_refresh() {
        let (tx, rx) = mpsc::channel(8);
        let (fired, _task) = counting_debounce(rx);

        for _ in 0..5 {
            tx.send(TriggerMessage::Changed).await.expect("send");
            time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(WINDOW + Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        time::sleep(WINDOW * 4).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn later_events_push_the_deadline_back() {
        let (tx, rx) = mpsc::channel(8);
        let (fired, _task) = counting_debounce(rx);

        tx.send(TriggerMessage::Changed).await.expect("send");
        time::sleep(Duration::from_millis(150)).await;
        tx.send(TriggerMessage::Changed).await.expect("send");

        // 300ms after the first event the original deadline has long passed,
        // but the second event moved it to 350ms.
        time::sleep(Duration::from_millis(150)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_errors_do_not_schedule_refreshes() {
        let (tx, rx) = mpsc::channel(8);
        let (fired, _task) = counting_debounce(rx);

        tx.send(TriggerMessage::Error("overflow".to_string()))
            .await
            .expect("send");
        time::sleep(WINDOW * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tx.send(TriggerMessage::Changed).await.expect("send");
        time::sleep(WINDOW * 2).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closing_the_channel_stops_the_loop() {
        let (tx, rx) = mpsc::channel(8);
        let (fired, task) = counting_debounce(rx);

        tx.send(TriggerMessage::Changed).await.expect("send");
        drop(tx);

        time::timeout(Duration::from_secs(5), task)
            .await
            .expect("loop exits")
            .expect("join");
        // A trigger pending at teardown is dropped, not flushed.
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn install_skips_unwatchable_directories() {
        let temp = tempfile::tempdir().expect("tempdir");
        let good = temp.path().join("good");
        std::fs::create_dir(&good).expect("mkdir");
        let missing = temp.path().join("missing");

        let (tx, _rx) = mpsc::channel(8);
        let dirs = HashSet::from([good.clone(), missing]);
        let (watcher, watched) = install_watchers("walls", dirs, tx).await;

        assert!(watcher.is_some());
        assert_eq!(watched, HashSet::from([good]));
    }

    #[tokio::test]
    async fn install_with_no_directories_is_a_no_op() {
        let (tx, _rx) = mpsc::channel(8);
        let (watcher, watched) = install_watchers("empty", HashSet::new(), tx).await;
        assert!(watcher.is_none());
        assert!(watched.is_empty());
    }
}
