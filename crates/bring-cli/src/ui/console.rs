//! Line-oriented progress reporter on stderr.

use std::collections::HashSet;
use std::io::{Write, stderr};
use std::path::Path;
use std::sync::Mutex;

use bring_core::{MergeResult, Reporter, RunState, filename_from_url};
use crossterm::style::Stylize;

use super::theme::{Theme, format_size};

/// Prints one line per notable event. Progress lines are dropped in quiet
/// mode; warnings never are.
#[derive(Debug)]
pub struct ConsoleReporter {
    quiet: bool,
    theme: Theme,
    active_downloads: Mutex<HashSet<String>>,
}

impl ConsoleReporter {
    pub fn new(quiet: bool) -> Self {
        Self {
            quiet,
            theme: Theme::default(),
            active_downloads: Mutex::new(HashSet::new()),
        }
    }

    fn line(&self, text: &str) {
        if self.quiet {
            return;
        }
        let mut err = stderr().lock();
        let _ = writeln!(err, "{text}");
    }

    /// Whether `url` was not being tracked yet; `finished` stops tracking it.
    fn track(&self, url: &str, finished: bool) -> bool {
        let Ok(mut active) = self.active_downloads.lock() else {
            return false;
        };
        if finished {
            active.remove(url);
            false
        } else {
            active.insert(url.to_string())
        }
    }
}

impl Reporter for ConsoleReporter {
    fn catalog(&self, source_id: &str, versions: usize, refreshed: bool) {
        if refreshed {
            self.line(&format!(
                "  {} {source_id} ({versions} versions)",
                "resolved".with(self.theme.colors.secondary)
            ));
        }
    }

    fn run_state(&self, run: &str, state: &RunState) {
        let text = match state {
            RunState::Pending { steps } => format!("{steps} steps"),
            RunState::Running { index, kind } => format!("step {index}: {kind}"),
            RunState::Completed => "built".to_string(),
            RunState::Failed { index, kind } => {
                let msg = format!("step {index} ({kind}) failed");
                self.line(&format!(
                    "  {} {}",
                    run.with(self.theme.colors.package_name),
                    msg.with(self.theme.colors.error)
                ));
                return;
            }
        };
        self.line(&format!(
            "  {} {}",
            run.with(self.theme.colors.package_name),
            text.with(self.theme.colors.secondary)
        ));
    }

    fn downloading(&self, url: &str, current: u64, total: Option<u64>) {
        let name = filename_from_url(url);
        let finished = total.is_some_and(|t| current >= t);
        if finished {
            self.track(url, true);
            self.line(&format!(
                "  {} {name} {}",
                "fetched".with(self.theme.colors.success),
                format_size(current).with(self.theme.colors.secondary)
            ));
        } else if self.track(url, false) {
            self.line(&format!("  {} {name}", "fetching".with(self.theme.colors.secondary)));
        }
    }

    fn merged(&self, package: &str, target: &Path, result: &MergeResult) {
        let summary = format!(
            "{} created, {} updated, {} unchanged, {} removed",
            result.created.len(),
            result.updated.len(),
            result.unchanged.len(),
            result.removed.len()
        );
        self.line(&format!(
            "  {} {} -> {} ({})",
            "merged".with(self.theme.colors.success),
            package.with(self.theme.colors.package_name),
            target.display(),
            summary.with(self.theme.colors.secondary)
        ));
    }

    fn info(&self, msg: &str) {
        self.line(&format!("  {msg}"));
    }

    fn warning(&self, msg: &str) {
        let mut err = stderr().lock();
        let _ = writeln!(err, "  {} {msg}", "warning".with(self.theme.colors.warning));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_tracking() {
        let reporter = ConsoleReporter::new(true);
        assert!(reporter.track("https://x.io/a.tar.gz", false));
        assert!(!reporter.track("https://x.io/a.tar.gz", false));
        reporter.track("https://x.io/a.tar.gz", true);
        assert!(reporter.track("https://x.io/a.tar.gz", false));
    }
}
