//! Animated in-progress indicator lines.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::{LogClass, LogConsole};
use chrootctl_shared::constants::PROGRESS_PREFIX;

const SPINNER_FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const SPINNER_INTERVAL: Duration = Duration::from_millis(200);
const DOTS_INTERVAL: Duration = Duration::from_millis(400);

/// Animation style of a progress line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProgressKind {
    #[default]
    Spinner,
    Dots,
}

impl ProgressKind {
    fn interval(self) -> Duration {
        match self {
            ProgressKind::Spinner => SPINNER_INTERVAL,
            ProgressKind::Dots => DOTS_INTERVAL,
        }
    }

    fn render(self, base: &str, frame: usize) -> String {
        match self {
            ProgressKind::Spinner => {
                format!("{PROGRESS_PREFIX}{base} {}", SPINNER_FRAMES[frame % SPINNER_FRAMES.len()])
            }
            ProgressKind::Dots => match frame % 4 {
                0 => format!("{PROGRESS_PREFIX}{base}"),
                n => format!("{PROGRESS_PREFIX}{base} {}", ".".repeat(n)),
            },
        }
    }
}

/// A live progress line. Dropping it removes the line.
#[must_use = "the indicator disappears as soon as the handle is dropped"]
pub struct ProgressHandle {
    console: LogConsole,
    id: u64,
    kind: ProgressKind,
    base: Arc<Mutex<String>>,
    frame: Arc<Mutex<usize>>,
    ticker: Option<JoinHandle<()>>,
}

impl ProgressHandle {
    /// Replace the indicator's text, keeping the animation running.
    pub fn update(&self, text: impl Into<String>) {
        let text = text.into();
        let rendered = self.kind.render(&text, *self.frame.lock());
        *self.base.lock() = text;
        self.console.update_transient(self.id, rendered);
    }

    pub fn finish(self) {}
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.abort();
        }
        self.console.remove_transient(self.id);
    }
}

impl LogConsole {
    /// Show an animated indicator below the current output.
    pub fn begin_progress(&self, text: impl Into<String>, kind: ProgressKind) -> ProgressHandle {
        let base = Arc::new(Mutex::new(text.into()));
        let frame = Arc::new(Mutex::new(0usize));
        let id = self.insert_transient(kind.render(&base.lock(), 0));

        let ticker = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let console = self.clone();
            let (base, frame) = (Arc::clone(&base), Arc::clone(&frame));
            handle.spawn(async move {
                let mut interval = tokio::time::interval(kind.interval());
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let next = {
                        let mut frame = frame.lock();
                        *frame += 1;
                        *frame
                    };
                    let text = kind.render(&base.lock(), next);
                    console.update_transient(id, text);
                }
            })
        });

        ProgressHandle {
            console: self.clone(),
            id,
            kind,
            base,
            frame,
            ticker,
        }
    }

    /// Print a section header and start an indicator under it.
    pub fn begin_action(
        &self,
        header: &str,
        progress_text: impl Into<String>,
        kind: ProgressKind,
    ) -> ProgressHandle {
        self.append(format!("━━━ {header} ━━━"), LogClass::Info);
        self.begin_progress(progress_text, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ConsoleOptions;

    #[test]
    fn test_render_frames() {
        assert_eq!(ProgressKind::Spinner.render("Starting", 0), "⏳ Starting |");
        assert_eq!(ProgressKind::Spinner.render("Starting", 3), "⏳ Starting \\");
        assert_eq!(ProgressKind::Spinner.render("Starting", 4), "⏳ Starting |");
        assert_eq!(ProgressKind::Dots.render("Backing up", 0), "⏳ Backing up");
        assert_eq!(ProgressKind::Dots.render("Backing up", 3), "⏳ Backing up ...");
    }

    #[tokio::test(start_paused = true)]
    async fn test_indicator_animates_and_disappears() {
        let console = LogConsole::new(ConsoleOptions::default(), None);
        let progress = console.begin_action("Starting Backup", "Backing up chroot", ProgressKind::Dots);

        let rendered = console.rendered();
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[0].text, "━━━ Starting Backup ━━━");
        assert_eq!(rendered[1].text, "⏳ Backing up chroot");

        tokio::time::sleep(Duration::from_millis(850)).await;
        assert_eq!(console.rendered()[1].text, "⏳ Backing up chroot ..");

        progress.update("Compressing");
        assert!(console.rendered()[1].text.starts_with("⏳ Compressing"));

        progress.finish();
        assert_eq!(console.rendered().len(), 1);
        assert_eq!(console.lines().len(), 1);
    }
}
