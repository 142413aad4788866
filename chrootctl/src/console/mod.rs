//! Bounded, render-batched log console.
//!
//! Appends land in a queue. A flush, scheduled at most once at a time one
//! frame later, materializes up to `batch_size` queued entries into the
//! rendered buffer, trims it to `max_lines`, follows the bottom when the
//! viewer was there, and schedules a debounced save.
//!
//! Renderers observe the rendered buffer through [`LogConsole::subscribe`].

mod clipboard;
mod progress;

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinHandle;

use crate::db::StateStore;
use crate::options::ConsoleOptions;
use chrootctl_shared::constants::keys;

pub use clipboard::{Clipboard, CommandClipboard};
pub(crate) use clipboard::copy_with_fallback;
pub use progress::{ProgressHandle, ProgressKind};

#[cfg(test)]
pub(crate) use clipboard::tests::MemoryClipboard;

const EVENT_CAPACITY: usize = 256;

/// Visual class of a console line.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogClass {
    #[default]
    None,
    Info,
    Warn,
    Err,
    Success,
    Debug,
}

/// One persisted console line.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub text: String,
    #[serde(default)]
    pub class: LogClass,
}

impl LogEntry {
    pub fn new(text: impl Into<String>, class: LogClass) -> Self {
        Self {
            text: text.into(),
            class,
        }
    }
}

/// A line in the rendered buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedLine {
    pub id: u64,
    pub text: String,
    pub class: LogClass,
    /// In-progress indicator, exempt from retention counting.
    pub transient: bool,
}

/// Changes to the rendered buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConsoleEvent {
    Appended(Vec<RenderedLine>),
    Updated(RenderedLine),
    Removed(Vec<u64>),
    Cleared,
    /// The buffer was replaced wholesale, e.g. by [`LogConsole::load`].
    Reset,
}

/// Cheap-to-clone handle to the console.
#[derive(Clone)]
pub struct LogConsole {
    inner: Arc<ConsoleInner>,
}

struct ConsoleInner {
    options: ConsoleOptions,
    store: Option<StateStore>,
    state: Mutex<ConsoleState>,
    idle: Notify,
    events: broadcast::Sender<ConsoleEvent>,
}

struct ConsoleState {
    queue: VecDeque<LogEntry>,
    rendered: VecDeque<RenderedLine>,
    next_id: u64,
    flush_pending: bool,
    save_task: Option<JoinHandle<()>>,
    viewport_rows: usize,
    scroll_top: usize,
    scrolled_up: bool,
    debug_enabled: bool,
}

impl ConsoleState {
    fn max_scroll(&self) -> usize {
        self.rendered.len().saturating_sub(self.viewport_rows)
    }

    fn at_bottom(&self, threshold: usize) -> bool {
        self.max_scroll().abs_diff(self.scroll_top) <= threshold
    }

    fn push_line(&mut self, text: String, class: LogClass, transient: bool) -> RenderedLine {
        let line = RenderedLine {
            id: self.next_id,
            text,
            class,
            transient,
        };
        self.next_id += 1;
        self.rendered.push_back(line.clone());
        line
    }

    /// Drop the oldest non-transient lines beyond `max_lines`.
    fn trim(&mut self, max_lines: usize) -> Vec<u64> {
        let retained = self.rendered.iter().filter(|l| !l.transient).count();
        let mut excess = retained.saturating_sub(max_lines);
        if excess == 0 {
            return Vec::new();
        }

        let mut removed = Vec::with_capacity(excess);
        self.rendered.retain(|line| {
            if excess > 0 && !line.transient {
                excess -= 1;
                removed.push(line.id);
                false
            } else {
                true
            }
        });
        // Rows vanished above the viewport
        self.scroll_top = self.scroll_top.saturating_sub(removed.len());
        removed
    }

    fn entries(&self) -> Vec<LogEntry> {
        self.rendered
            .iter()
            .filter(|l| !l.transient)
            .map(|l| LogEntry::new(l.text.clone(), l.class))
            .collect()
    }
}

impl LogConsole {
    /// New console. With a store, rendered content is persisted under the
    /// console key; call [`LogConsole::load`] to restore it.
    pub fn new(options: ConsoleOptions, store: Option<StateStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let viewport_rows = options.viewport_rows;
        Self {
            inner: Arc::new(ConsoleInner {
                options,
                store,
                state: Mutex::new(ConsoleState {
                    queue: VecDeque::new(),
                    rendered: VecDeque::new(),
                    next_id: 1,
                    flush_pending: false,
                    save_task: None,
                    viewport_rows,
                    scroll_top: 0,
                    scrolled_up: false,
                    debug_enabled: false,
                }),
                idle: Notify::new(),
                events,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConsoleEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: ConsoleEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }

    /// Show debug-class lines in the rendered console.
    pub fn set_debug_enabled(&self, enabled: bool) {
        self.inner.state.lock().debug_enabled = enabled;
    }

    pub fn debug_enabled(&self) -> bool {
        self.inner.state.lock().debug_enabled
    }

    // ========================================================================
    // APPENDING
    // ========================================================================

    /// Queue one line. Empty text is ignored.
    pub fn append(&self, text: impl Into<String>, class: LogClass) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        mirror(&text, class);

        {
            let mut state = self.inner.state.lock();
            if class == LogClass::Debug && !state.debug_enabled {
                return;
            }
            state.queue.push_back(LogEntry { text, class });
        }
        self.request_flush();
    }

    /// Queue several lines at once, dropping blank ones.
    pub fn append_batch<I, S>(&self, lines: I, class: LogClass)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries: Vec<LogEntry> = lines
            .into_iter()
            .filter(|line| !line.as_ref().trim().is_empty())
            .map(|line| LogEntry::new(line.as_ref(), class))
            .collect();
        if entries.is_empty() {
            return;
        }
        for entry in &entries {
            mirror(&entry.text, class);
        }

        {
            let mut state = self.inner.state.lock();
            if class == LogClass::Debug && !state.debug_enabled {
                return;
            }
            state.queue.extend(entries);
        }
        self.request_flush();
    }

    // ========================================================================
    // FLUSHING
    // ========================================================================

    fn request_flush(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.flush_pending || state.queue.is_empty() {
                return;
            }
            state.flush_pending = true;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let console = self.clone();
                let delay = self.inner.options.frame_interval;
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    console.run_flush();
                });
            }
            Err(_) => self.run_flush(),
        }
    }

    fn run_flush(&self) {
        if self.flush_batch() {
            self.request_flush();
        }
    }

    /// Materialize one batch. Returns true if entries remain queued.
    fn flush_batch(&self) -> bool {
        let threshold = self.inner.options.scroll_threshold_rows;
        let (appended, removed, more) = {
            let mut state = self.inner.state.lock();
            state.flush_pending = false;

            let follow = state.at_bottom(threshold) && !state.scrolled_up;
            let take = state.queue.len().min(self.inner.options.batch_size);
            let batch: Vec<LogEntry> = state.queue.drain(..take).collect();

            let appended: Vec<RenderedLine> = batch
                .into_iter()
                .map(|entry| state.push_line(entry.text, entry.class, false))
                .collect();
            let removed = state.trim(self.inner.options.max_lines);

            if follow {
                state.scroll_top = state.max_scroll();
            }
            (appended, removed, !state.queue.is_empty())
        };

        if !removed.is_empty() {
            self.emit(ConsoleEvent::Removed(removed));
        }
        if !appended.is_empty() {
            self.emit(ConsoleEvent::Appended(appended));
            self.schedule_save();
        }
        if !more {
            self.inner.idle.notify_waiters();
        }
        more
    }

    /// Materialize everything queued right now, bypassing the frame delay.
    fn drain_now(&self) {
        while self.flush_batch() {}
    }

    fn is_idle(&self) -> bool {
        let state = self.inner.state.lock();
        state.queue.is_empty() && !state.flush_pending
    }

    /// Resolve once the queue is empty and no flush is pending.
    pub async fn wait_for_flush(&self) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }

    // ========================================================================
    // TRANSIENT LINES
    // ========================================================================

    /// Place an in-progress line below everything appended so far.
    pub(crate) fn insert_transient(&self, text: String) -> u64 {
        self.drain_now();
        let line = {
            let mut state = self.inner.state.lock();
            let follow = state.at_bottom(self.inner.options.scroll_threshold_rows)
                && !state.scrolled_up;
            let line = state.push_line(text, LogClass::Info, true);
            if follow {
                state.scroll_top = state.max_scroll();
            }
            line
        };
        let id = line.id;
        self.emit(ConsoleEvent::Appended(vec![line]));
        id
    }

    pub(crate) fn update_transient(&self, id: u64, text: String) {
        let updated = {
            let mut state = self.inner.state.lock();
            state
                .rendered
                .iter_mut()
                .find(|line| line.id == id && line.transient)
                .map(|line| {
                    line.text = text;
                    line.clone()
                })
        };
        if let Some(line) = updated {
            self.emit(ConsoleEvent::Updated(line));
        }
    }

    pub(crate) fn remove_transient(&self, id: u64) {
        let removed = {
            let mut state = self.inner.state.lock();
            let before = state.rendered.len();
            state.rendered.retain(|line| line.id != id);
            let removed = state.rendered.len() != before;
            if removed {
                let max = state.max_scroll();
                state.scroll_top = state.scroll_top.min(max);
            }
            removed
        };
        if removed {
            self.emit(ConsoleEvent::Removed(vec![id]));
        }
    }

    // ========================================================================
    // SCROLLING
    // ========================================================================

    pub fn set_viewport_rows(&self, rows: usize) {
        let mut state = self.inner.state.lock();
        state.viewport_rows = rows;
        let max = state.max_scroll();
        state.scroll_top = state.scroll_top.min(max);
    }

    pub fn scroll_position(&self) -> usize {
        self.inner.state.lock().scroll_top
    }

    pub fn max_scroll(&self) -> usize {
        self.inner.state.lock().max_scroll()
    }

    pub fn is_at_bottom(&self) -> bool {
        self.inner
            .state
            .lock()
            .at_bottom(self.inner.options.scroll_threshold_rows)
    }

    pub fn is_scrolled_up(&self) -> bool {
        self.inner.state.lock().scrolled_up
    }

    /// Record a scroll made by the user. Leaving the bottom suspends
    /// auto-scroll until the user comes back.
    pub fn handle_user_scroll(&self, position: usize) {
        let mut state = self.inner.state.lock();
        state.scroll_top = position.min(state.max_scroll());
        state.scrolled_up = !state.at_bottom(self.inner.options.scroll_threshold_rows);
    }

    pub fn scroll_to_bottom(&self) {
        let mut state = self.inner.state.lock();
        state.scroll_top = state.max_scroll();
        state.scrolled_up = false;
    }

    // ========================================================================
    // CONTENT
    // ========================================================================

    /// Rendered, non-transient lines, oldest first.
    pub fn lines(&self) -> Vec<LogEntry> {
        self.inner.state.lock().entries()
    }

    /// Everything rendered, transient lines included.
    pub fn rendered(&self) -> Vec<RenderedLine> {
        self.inner.state.lock().rendered.iter().cloned().collect()
    }

    /// Rendered text, one line per row.
    pub fn text(&self) -> String {
        let state = self.inner.state.lock();
        state
            .rendered
            .iter()
            .map(|line| line.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_empty(&self) -> bool {
        let state = self.inner.state.lock();
        state.rendered.is_empty() && state.queue.is_empty()
    }

    /// Empty the console and forget the persisted copy.
    pub fn clear(&self) {
        {
            let mut state = self.inner.state.lock();
            state.queue.clear();
            state.rendered.clear();
            state.scroll_top = 0;
            state.scrolled_up = false;
            if let Some(task) = state.save_task.take() {
                task.abort();
            }
        }
        if let Some(store) = &self.inner.store {
            store.remove(keys::CONSOLE_LOGS);
        }
        self.emit(ConsoleEvent::Cleared);
        self.inner.idle.notify_waiters();
    }

    // ========================================================================
    // PERSISTENCE
    // ========================================================================

    /// Restore persisted content, re-trimming and re-saving if it grew past
    /// the line limit.
    pub fn load(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let Some(entries) = store.get_json::<Vec<LogEntry>>(keys::CONSOLE_LOGS) else {
            return;
        };

        let trimmed = {
            let mut state = self.inner.state.lock();
            state.rendered.clear();
            for entry in entries {
                state.push_line(entry.text, entry.class, false);
            }
            let trimmed = !state.trim(self.inner.options.max_lines).is_empty();
            state.scroll_top = state.max_scroll();
            state.scrolled_up = false;
            trimmed
        };

        tracing::debug!(lines = self.lines().len(), trimmed, "Console restored");
        if trimmed {
            self.save_now();
        }
        self.emit(ConsoleEvent::Reset);
    }

    /// Persist the rendered content immediately.
    pub fn save_now(&self) {
        let Some(store) = &self.inner.store else {
            return;
        };
        let entries = self.lines();
        store.set_json(keys::CONSOLE_LOGS, &entries);
    }

    fn schedule_save(&self) {
        if self.inner.store.is_none() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.save_now();
            return;
        };

        let console = self.clone();
        let delay = self.inner.options.save_debounce;
        let task = handle.spawn(async move {
            tokio::time::sleep(delay).await;
            console.save_now();
        });

        if let Some(previous) = self.inner.state.lock().save_task.replace(task) {
            previous.abort();
        }
    }
}

/// Forward a console line to the diagnostic log.
fn mirror(text: &str, class: LogClass) {
    match class {
        LogClass::Err => tracing::error!(target: "chrootctl::console", "{text}"),
        LogClass::Warn => tracing::warn!(target: "chrootctl::console", "{text}"),
        LogClass::Debug => tracing::debug!(target: "chrootctl::console", "{text}"),
        _ => tracing::info!(target: "chrootctl::console", "{text}"),
    }
}
