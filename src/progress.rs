// Progress reporting for long waits
//
// Interactive terminals get an indicatif spinner; everything else gets plain
// status lines on stderr.

use indicatif::{ProgressBar, ProgressStyle};
use std::io::IsTerminal;
use std::sync::Mutex;
use std::time::Duration;

/// Receives human-readable status while waiting on the remote builder
pub trait ProgressSink: Send + Sync {
    fn start(&self, message: &str);
    fn update(&self, message: &str);
    fn finish(&self, message: &str);
}

/// Spinner on a TTY, plain lines otherwise
pub struct TerminalProgress {
    interactive: bool,
    spinner: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    /// Detect interactivity from stderr
    pub fn new() -> Self {
        Self::with_interactive(std::io::stderr().is_terminal())
    }

    pub fn with_interactive(interactive: bool) -> Self {
        Self {
            interactive,
            spinner: Mutex::new(None),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive
    }
}

impl Default for TerminalProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for TerminalProgress {
    fn start(&self, message: &str) {
        if !self.interactive {
            eprintln!("{}", message);
            return;
        }

        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));

        if let Ok(mut slot) = self.spinner.lock() {
            if let Some(old) = slot.replace(spinner) {
                old.finish_and_clear();
            }
        }
    }

    fn update(&self, message: &str) {
        let spinner = self.spinner.lock().ok().and_then(|slot| slot.clone());
        match spinner {
            Some(spinner) => spinner.set_message(message.to_string()),
            None if !self.interactive => eprintln!("{}", message),
            None => {}
        }
    }

    fn finish(&self, message: &str) {
        let spinner = self.spinner.lock().ok().and_then(|mut slot| slot.take());
        match spinner {
            Some(spinner) => spinner.finish_with_message(message.to_string()),
            None => eprintln!("{}", message),
        }
    }
}

/// Discards all progress
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn start(&self, _message: &str) {}
    fn update(&self, _message: &str) {}
    fn finish(&self, _message: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_progress_has_no_spinner() {
        let progress = TerminalProgress::with_interactive(false);
        progress.start("Waiting for remote builder fly-builder-x...");
        progress.update("Waiting for remote builder fly-builder-x... starting");
        assert!(progress.spinner.lock().unwrap().is_none());
        progress.finish("Remote builder fly-builder-x ready");
    }

    #[test]
    fn test_interactive_progress_tracks_spinner() {
        let progress = TerminalProgress::with_interactive(true);
        progress.start("waiting");
        assert!(progress.spinner.lock().unwrap().is_some());
        progress.finish("done");
        assert!(progress.spinner.lock().unwrap().is_none());
    }
}
