//! Reporter trait for progress events
//!
//! Core logic pushes typed events through this interface without being
//! coupled to a specific terminal renderer. The CLI implements it for console
//! output; `ChannelReporter` forwards events to any async consumer.

use std::path::{Path, PathBuf};

use tokio::sync::mpsc::UnboundedSender;

use crate::merge::MergeResult;

/// State of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Planned and validated, nothing executed yet.
    Pending { steps: usize },
    /// Executing step `index`.
    Running { index: usize, kind: String },
    /// Every step finished.
    Completed,
    /// Step `index` failed.
    Failed { index: usize, kind: String },
}

pub trait Reporter: Send + Sync {
    /// A catalog was loaded, either from the cache or by running its resolver.
    fn catalog(&self, source_id: &str, versions: usize, refreshed: bool);

    /// A pipeline run changed state.
    fn run_state(&self, run: &str, state: &RunState);

    /// Bytes received for a download.
    fn downloading(&self, url: &str, current: u64, total: Option<u64>);

    /// A merge into a target finished.
    fn merged(&self, package: &str, target: &Path, result: &MergeResult);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn catalog(&self, source_id: &str, versions: usize, refreshed: bool) {
        (**self).catalog(source_id, versions, refreshed);
    }
    fn run_state(&self, run: &str, state: &RunState) {
        (**self).run_state(run, state);
    }
    fn downloading(&self, url: &str, current: u64, total: Option<u64>) {
        (**self).downloading(url, current, total);
    }
    fn merged(&self, package: &str, target: &Path, result: &MergeResult) {
        (**self).merged(package, target, result);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
}

/// A no-op reporter for silent operations (e.g., testing).
#[derive(Debug, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn catalog(&self, _: &str, _: usize, _: bool) {}
    fn run_state(&self, _: &str, _: &RunState) {}
    fn downloading(&self, _: &str, _: u64, _: Option<u64>) {}
    fn merged(&self, _: &str, _: &Path, _: &MergeResult) {}
    fn info(&self, _: &str) {}
    fn warning(&self, _: &str) {}
}

/// Discrete progress event, as forwarded by [`ChannelReporter`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Catalog {
        source_id: String,
        versions: usize,
        refreshed: bool,
    },
    RunState {
        run: String,
        state: RunState,
    },
    Downloading {
        url: String,
        current: u64,
        total: Option<u64>,
    },
    Merged {
        package: String,
        target: PathBuf,
        result: MergeResult,
    },
    Info(String),
    Warning(String),
}

/// Pushes every event into an unbounded channel. Send failures (receiver
/// dropped) are ignored.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: UnboundedSender<Event>,
}

impl ChannelReporter {
    pub fn new(tx: UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

impl Reporter for ChannelReporter {
    fn catalog(&self, source_id: &str, versions: usize, refreshed: bool) {
        self.send(Event::Catalog {
            source_id: source_id.to_string(),
            versions,
            refreshed,
        });
    }
    fn run_state(&self, run: &str, state: &RunState) {
        self.send(Event::RunState {
            run: run.to_string(),
            state: state.clone(),
        });
    }
    fn downloading(&self, url: &str, current: u64, total: Option<u64>) {
        self.send(Event::Downloading {
            url: url.to_string(),
            current,
            total,
        });
    }
    fn merged(&self, package: &str, target: &Path, result: &MergeResult) {
        self.send(Event::Merged {
            package: package.to_string(),
            target: target.to_path_buf(),
            result: result.clone(),
        });
    }
    fn info(&self, msg: &str) {
        self.send(Event::Info(msg.to_string()));
    }
    fn warning(&self, msg: &str) {
        self.send(Event::Warning(msg.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_reporter_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let reporter = std::sync::Arc::new(ChannelReporter::new(tx));
        reporter.run_state("fd", &RunState::Pending { steps: 2 });
        reporter.warning("careful");

        assert_eq!(
            rx.try_recv().unwrap(),
            Event::RunState {
                run: "fd".into(),
                state: RunState::Pending { steps: 2 }
            }
        );
        assert_eq!(rx.try_recv().unwrap(), Event::Warning("careful".into()));
    }

    #[test]
    fn test_send_after_receiver_dropped_is_silent() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        ChannelReporter::new(tx).info("nobody listening");
    }
}
