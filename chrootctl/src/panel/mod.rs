//! Feature workflows.
//!
//! A [`Panel`] threads one shared context (command runner, console, guard,
//! status machine, durable state and the user-interface seam) through every
//! workflow. Each workflow lives in its own module and adds methods to
//! `Panel`:
//!
//! - `lifecycle`: start/stop/restart, status refresh, update
//! - `session`: users, login command, boot flags, post-exec script
//! - `hotspot`, `forward_nat`, `interfaces`: networking features
//! - `backup`, `sparse`, `uninstall`: maintenance operations

mod backup;
mod forward_nat;
mod hotspot;
mod interfaces;
mod lifecycle;
mod outcome;
mod session;
mod sparse;
mod uninstall;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::bridge::{CommandResult, CommandRunner, HostBridge, RunOptions};
use crate::console::{Clipboard, CommandClipboard, LogClass, LogConsole, ProgressKind};
use crate::db::{Database, FeatureFlags, Flag, StateStore};
use crate::guard::CommandGuard;
use crate::options::PanelOptions;
use crate::status::{Status, StatusMachine};
use chrootctl_shared::constants::keys;
use chrootctl_shared::errors::ChrootResult;

pub use hotspot::{Band, HotspotSettings};
pub use interfaces::{InterfaceList, InterfaceManager, InterfaceOption};
pub use lifecycle::ChrootAction;
pub use outcome::{forwarding_started, mentions_warning};

// ============================================================================
// USER INTERFACE SEAM
// ============================================================================

/// A yes/no question put to the user before a destructive step.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub title: String,
    pub message: String,
    pub confirm_label: String,
    pub cancel_label: String,
}

impl Confirmation {
    pub fn new(title: impl Into<String>, message: impl Into<String>, confirm_label: &str) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            confirm_label: confirm_label.to_string(),
            cancel_label: "Cancel".to_string(),
        }
    }
}

/// A request for a file location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathRequest {
    pub title: String,
    pub message: String,
    pub default_dir: String,
    /// Suggested file name; empty when choosing an existing file.
    pub default_file_name: String,
    /// Choosing an existing archive rather than a destination.
    pub existing: bool,
}

/// Why a size is being asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SizePurpose {
    Migrate,
    Resize { current: String },
}

/// Dialogs and popups the workflows need from whoever renders them.
///
/// Every method has a conservative default: decline, cancel, do nothing.
#[async_trait]
pub trait UserInterface: Send + Sync {
    async fn confirm(&self, _request: &Confirmation) -> bool {
        false
    }

    async fn pick_path(&self, _request: &PathRequest) -> Option<String> {
        None
    }

    /// Image size in GB.
    async fn select_size_gb(&self, _purpose: &SizePurpose) -> Option<u32> {
        None
    }

    /// Close any open configuration popup.
    async fn close_popups(&self) {}
}

/// Headless interface that declines everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoInteraction;

#[async_trait]
impl UserInterface for NoInteraction {}

// ============================================================================
// PANEL
// ============================================================================

/// Values read from the device during the session.
#[derive(Clone, Debug, Default)]
pub(crate) struct Session {
    pub root_access: bool,
    pub offline_notified: bool,
    pub users: Vec<String>,
    pub selected_user: Option<String>,
    pub run_at_boot: bool,
    pub android_optimizations: bool,
    pub post_exec_script: String,
}

/// Cheap-to-clone handle to one control panel.
#[derive(Clone)]
pub struct Panel {
    inner: Arc<PanelInner>,
}

struct PanelInner {
    options: PanelOptions,
    runner: CommandRunner,
    console: LogConsole,
    guard: CommandGuard,
    status: StatusMachine,
    store: StateStore,
    ui: Arc<dyn UserInterface>,
    clipboard: Arc<dyn Clipboard>,
    fallback_clipboard: Option<Arc<dyn Clipboard>>,
    hotspot_ifaces: InterfaceManager,
    forward_ifaces: InterfaceManager,
    session: Mutex<Session>,
}

impl Panel {
    pub fn builder(options: PanelOptions) -> PanelBuilder {
        PanelBuilder::new(options)
    }

    pub fn options(&self) -> &PanelOptions {
        &self.inner.options
    }

    pub fn runner(&self) -> &CommandRunner {
        &self.inner.runner
    }

    pub fn console(&self) -> &LogConsole {
        &self.inner.console
    }

    pub fn guard(&self) -> &CommandGuard {
        &self.inner.guard
    }

    pub fn status(&self) -> &StatusMachine {
        &self.inner.status
    }

    pub fn store(&self) -> &StateStore {
        &self.inner.store
    }

    pub(crate) fn ui(&self) -> &dyn UserInterface {
        self.inner.ui.as_ref()
    }

    pub(crate) fn session(&self) -> parking_lot::MutexGuard<'_, Session> {
        self.inner.session.lock()
    }

    /// Wait for the bridge, restore the console and read the initial state.
    pub async fn initialize(&self) {
        self.inner.runner.wait_for_bridge().await;
        self.inner.console.load();

        let flags = self.feature_flags();
        tracing::info!(
            hotspot = flags.hotspot,
            forwarding = flags.forwarding,
            debug = flags.debug,
            sparse = flags.sparse,
            "Restored feature flags"
        );
        self.inner.console.set_debug_enabled(flags.debug);

        if self.check_root_access(false).await {
            self.refresh_status().await;
            self.fetch_users(false).await;
            self.read_run_at_boot().await;
            self.read_android_optimizations().await;
            self.hotspot_interfaces(false, true).await;
            self.forwarding_interfaces(false, true).await;
        } else {
            self.refresh_status().await;
        }
    }

    /// All persisted feature flags at once.
    pub fn feature_flags(&self) -> FeatureFlags {
        self.inner.store.load_flags()
    }

    pub fn debug_mode(&self) -> bool {
        self.inner.store.flag(Flag::Debug)
    }

    /// Toggle verbose script logging and debug lines in the console.
    pub fn set_debug_mode(&self, enabled: bool) {
        self.inner.store.set_flag(Flag::Debug, enabled);
        self.inner.console.set_debug_enabled(enabled);
        self.log(
            if enabled {
                "Debug mode enabled"
            } else {
                "Debug mode disabled"
            },
            LogClass::Info,
        );
    }

    /// Copy the console to the clipboard.
    pub async fn copy_logs(&self) -> bool {
        self.inner
            .console
            .copy_logs(
                self.inner.clipboard.as_ref(),
                self.inner.fallback_clipboard.as_deref(),
            )
            .await
    }

    pub(crate) async fn copy_text(&self, text: &str) -> bool {
        crate::console::copy_with_fallback(
            text,
            self.inner.clipboard.as_ref(),
            self.inner.fallback_clipboard.as_deref(),
        )
        .await
    }

    // ========================================================================
    // SHARED WORKFLOW STEPS
    // ========================================================================

    pub(crate) fn log(&self, text: impl Into<String>, class: LogClass) {
        self.inner.console.append(text, class);
    }

    pub(crate) fn run_options(&self) -> RunOptions {
        RunOptions::root().with_debug(self.debug_mode())
    }

    /// `sh <chroot.sh> <args>`
    pub(crate) fn chroot_command(&self, args: &str) -> String {
        format!("sh {} {}", self.inner.options.paths.chroot_script, args)
    }

    pub(crate) async fn read(&self, command: &str) -> ChrootResult<String> {
        self.inner.runner.run_sync(command, self.run_options()).await
    }

    /// Run a script asynchronously, streaming its lines into the console.
    pub(crate) async fn run_streamed(&self, command: &str) -> CommandResult {
        let console = self.inner.console.clone();
        self.inner
            .runner
            .run_async_awaitable(
                command,
                self.run_options(),
                Some(Box::new(move |line: &str| console.append(line, LogClass::None))),
            )
            .await
    }

    /// Like [`Panel::run_streamed`], also returning the streamed lines.
    pub(crate) async fn run_streamed_collect(&self, command: &str) -> (CommandResult, Vec<String>) {
        let console = self.inner.console.clone();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let result = self
            .inner
            .runner
            .run_async_awaitable(
                command,
                self.run_options(),
                Some(Box::new(move |line: &str| {
                    console.append(line, LogClass::None);
                    sink.lock().push(line.to_string());
                })),
            )
            .await;
        let lines = std::mem::take(&mut *lines.lock());
        (result, lines)
    }

    /// Enter `status`, print `header` and stream `command` under a dots
    /// indicator. The caller holds the action lock.
    pub(crate) async fn run_maintenance(
        &self,
        status: Status,
        header: &str,
        progress_text: &str,
        command: &str,
    ) -> CommandResult {
        self.inner.status.set(status);
        let progress = self
            .inner
            .console
            .begin_action(header, progress_text, ProgressKind::Dots);
        let result = self.run_streamed(command).await;
        progress.finish();
        tracing::info!(status = %status, success = result.success, "Maintenance command finished");
        result
    }

    /// Close popups and give them `delay` to animate out.
    pub(crate) async fn close_popups(&self, delay: Duration) {
        self.ui().close_popups().await;
        tokio::time::sleep(delay).await;
    }

    /// Refresh the status after `delay`, off the calling task.
    pub fn schedule_status_refresh(&self, delay: Duration) -> JoinHandle<()> {
        let panel = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            panel.refresh_status().await;
        })
    }
}

// ============================================================================
// BUILDER
// ============================================================================

/// Assembles a [`Panel`].
pub struct PanelBuilder {
    options: PanelOptions,
    bridge: Option<Arc<dyn HostBridge>>,
    ui: Option<Arc<dyn UserInterface>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    fallback_clipboard: Option<Arc<dyn Clipboard>>,
    store: Option<StateStore>,
}

impl PanelBuilder {
    pub fn new(options: PanelOptions) -> Self {
        Self {
            options,
            bridge: None,
            ui: None,
            clipboard: None,
            fallback_clipboard: None,
            store: None,
        }
    }

    /// Attach a host bridge up front. One can also be attached later
    /// through [`Panel::runner`].
    pub fn bridge(mut self, bridge: Arc<dyn HostBridge>) -> Self {
        self.bridge = Some(bridge);
        self
    }

    pub fn ui(mut self, ui: Arc<dyn UserInterface>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    pub fn fallback_clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.fallback_clipboard = Some(clipboard);
        self
    }

    /// Use `store` instead of opening the database under `home_dir`.
    pub fn store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> ChrootResult<Panel> {
        self.options.validate()?;

        let store = match self.store {
            Some(store) => store,
            None => StateStore::new(Database::open(&self.options.db_path())?),
        };

        let runner = CommandRunner::new(self.options.bridge_poll.clone());
        if let Some(bridge) = self.bridge {
            runner.attach(bridge);
        }

        let console = LogConsole::new(self.options.console.clone(), Some(store.clone()));
        let guard = CommandGuard::new(runner.clone(), console.clone());
        let paths = &self.options.paths;

        let hotspot_ifaces = InterfaceManager::new(
            runner.clone(),
            console.clone(),
            store.clone(),
            &paths.hotspot_script,
            keys::HOTSPOT_INTERFACES_CACHE,
            keys::HOTSPOT_IFACE,
        );
        let forward_ifaces = InterfaceManager::new(
            runner.clone(),
            console.clone(),
            store.clone(),
            &paths.forward_nat_script,
            keys::FORWARD_NAT_INTERFACES_CACHE,
            keys::SELECTED_INTERFACE,
        )
        .default_to_first(true);

        tracing::debug!(
            home_dir = %self.options.home_dir.display(),
            bridge = runner.is_available(),
            "Panel built"
        );

        Ok(Panel {
            inner: Arc::new(PanelInner {
                options: self.options,
                runner,
                console,
                guard,
                status: StatusMachine::new(),
                store,
                ui: self.ui.unwrap_or_else(|| Arc::new(NoInteraction)),
                clipboard: self
                    .clipboard
                    .unwrap_or_else(|| Arc::new(CommandClipboard::termux())),
                fallback_clipboard: self.fallback_clipboard,
                hotspot_ifaces,
                forward_ifaces,
                session: Mutex::new(Session::default()),
            }),
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for workflow tests.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::bridge::mock::MockBridge;
    use crate::console::{LogEntry, MemoryClipboard};

    /// Scripted answers for every dialog.
    #[derive(Default)]
    pub(crate) struct ScriptedUi {
        pub confirm: bool,
        pub path: Option<String>,
        pub size: Option<u32>,
        pub confirmations: Mutex<Vec<Confirmation>>,
        pub path_requests: Mutex<Vec<PathRequest>>,
        pub closes: AtomicUsize,
    }

    impl ScriptedUi {
        pub fn accepting() -> Self {
            Self {
                confirm: true,
                ..Default::default()
            }
        }

        pub fn with_path(mut self, path: &str) -> Self {
            self.path = Some(path.to_string());
            self
        }

        pub fn with_size(mut self, size: u32) -> Self {
            self.size = Some(size);
            self
        }

        pub fn closes(&self) -> usize {
            self.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UserInterface for ScriptedUi {
        async fn confirm(&self, request: &Confirmation) -> bool {
            self.confirmations.lock().push(request.clone());
            self.confirm
        }

        async fn pick_path(&self, request: &PathRequest) -> Option<String> {
            self.path_requests.lock().push(request.clone());
            self.path.clone()
        }

        async fn select_size_gb(&self, _purpose: &SizePurpose) -> Option<u32> {
            self.size
        }

        async fn close_popups(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub(crate) struct Fixture {
        pub panel: Panel,
        pub mock: Arc<MockBridge>,
        pub ui: Arc<ScriptedUi>,
        pub clipboard: Arc<MemoryClipboard>,
    }

    impl Fixture {
        /// Console lines after pending flushes settle.
        pub async fn lines(&self) -> Vec<LogEntry> {
            self.panel.console().wait_for_flush().await;
            self.panel.console().lines()
        }

        pub async fn texts(&self) -> Vec<String> {
            self.lines().await.into_iter().map(|l| l.text).collect()
        }

        pub async fn has_line(&self, text: &str, class: LogClass) -> bool {
            self.lines()
                .await
                .iter()
                .any(|l| l.text == text && l.class == class)
        }
    }

    pub(crate) fn fixture(ui: ScriptedUi) -> Fixture {
        let mock = Arc::new(MockBridge::new());
        let ui = Arc::new(ui);
        let clipboard = Arc::new(MemoryClipboard::default());
        let options = PanelOptions {
            home_dir: std::env::temp_dir().join("chrootctl-panel-tests"),
            ..Default::default()
        };
        let panel = Panel::builder(options)
            .bridge(mock.clone())
            .ui(ui.clone())
            .clipboard(clipboard.clone())
            .store(StateStore::in_memory().unwrap())
            .build()
            .unwrap();
        Fixture {
            panel,
            mock,
            ui,
            clipboard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn test_no_interaction_declines() {
        let ui = NoInteraction;
        assert!(!ui.confirm(&Confirmation::new("t", "m", "Ok")).await);
        assert_eq!(ui.select_size_gb(&SizePurpose::Migrate).await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_refresh_reads_status() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: RUNNING");
        f.panel
            .schedule_status_refresh(Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(f.panel.status().current(), Status::Running);
    }

    #[tokio::test]
    async fn test_debug_mode_prefixes_commands() {
        let f = fixture(ScriptedUi::default());
        f.panel.set_debug_mode(true);
        f.panel.read("sh chroot.sh status").await.unwrap();
        assert_eq!(f.mock.commands(), vec!["LOGGING_ENABLED=1 sh chroot.sh status"]);
        assert!(f.panel.store().flag(Flag::Debug));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_restores_feature_flags() {
        let f = fixture(ScriptedUi::default());
        f.mock.on_sync("chroot.sh status", "Status: STOPPED");
        f.panel.store().set_flag(Flag::Debug, true);
        f.panel.store().set_flag(Flag::Sparse, true);

        f.panel.initialize().await;

        assert!(f.panel.console().debug_enabled());
        assert_eq!(
            f.panel.feature_flags(),
            FeatureFlags {
                debug: true,
                sparse: true,
                ..Default::default()
            }
        );
        assert_eq!(f.panel.status().current(), Status::Stopped);
    }

    #[tokio::test]
    async fn test_build_opens_database_under_home() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = PanelOptions {
            home_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let panel = Panel::builder(options.clone()).build().unwrap();
        panel.store().set("k", "v");
        assert!(options.db_path().exists());
        assert!(!panel.runner().is_available());
    }
}
