//! NAT forwarding of chroot traffic through a host interface.

use std::sync::Arc;

use parking_lot::Mutex;

use super::Panel;
use super::outcome::{forwarding_started, mentions_warning};
use crate::bridge::{AsyncCallbacks, CommandId, CommandResult};
use crate::console::{LogClass, ProgressHandle, ProgressKind};
use crate::db::Flag;
use crate::guard::{GuardOutcome, GuardToken};
use crate::status::ActionLock;
use crate::util::double_quote;
use chrootctl_shared::constants::keys;

impl Panel {
    pub fn forwarding_active(&self) -> bool {
        self.store().flag(Flag::Forwarding)
    }

    /// Start forwarding through `iface` and remember it as the selection.
    pub async fn start_forwarding(&self, iface: &str) -> GuardOutcome<bool> {
        let iface = iface.trim();
        if iface.is_empty() {
            self.log("Please select a network interface", LogClass::Err);
            return GuardOutcome::Ran(false);
        }

        self.guard()
            .with_guard("forwarding-start", || self.start_forwarding_steps(iface))
            .await
    }

    async fn start_forwarding_steps(&self, iface: &str) -> bool {
        self.store().set(keys::SELECTED_INTERFACE, iface);

        self.close_popups(self.options().delays.popup_close).await;
        let lock = self.status().lock_actions();

        let text = format!("Starting forwarding on {iface}");
        let progress = self
            .console()
            .begin_action(&text, text.clone(), ProgressKind::Spinner);
        let command = format!(
            "sh {} -i {} 2>&1",
            self.options().paths.forward_nat_script,
            double_quote(iface)
        );
        let (result, lines) = self.run_streamed_collect(&command).await;
        progress.finish();

        let started = forwarding_started(&result, &lines.join("\n"));
        tracing::info!(iface, success = result.success, started, "Forwarding start finished");

        if started {
            self.log(
                format!("✓ Forwarding started successfully on {iface}"),
                LogClass::Success,
            );
            self.store().set_flag(Flag::Forwarding, true);
        } else {
            self.log("✗ Failed to start forwarding", LogClass::Err);
        }

        drop(lock);
        self.schedule_status_refresh(self.options().delays.status_refresh);
        started
    }

    /// Tear forwarding down without waiting for the script.
    ///
    /// The guard and the action lock stay held until the script settles;
    /// its completion clears the flag, reports and schedules a refresh.
    ///
    /// # Returns
    /// * `Ran(Some(id))` - the stop script was dispatched
    /// * `Ran(None)` - the bridge refused to start it
    pub async fn stop_forwarding(&self) -> GuardOutcome<Option<CommandId>> {
        let token = match self.guard().acquire("forwarding-stop") {
            GuardOutcome::Ran(token) => token,
            GuardOutcome::Busy { holder } => return GuardOutcome::Busy { holder },
            GuardOutcome::Unavailable => return GuardOutcome::Unavailable,
        };

        self.close_popups(self.options().delays.popup_close).await;
        let lock = self.status().lock_actions();
        let progress = self.console().begin_action(
            "Stopping forwarding",
            "Stopping forwarding",
            ProgressKind::Spinner,
        );

        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let panel = self.clone();
        let callbacks = AsyncCallbacks::new()
            .on_output(move |line| sink.lock().push(line.to_string()))
            .on_settled(move |result| {
                let output = std::mem::take(&mut *lines.lock());
                panel.finish_stop_forwarding(result, output, progress, lock, token);
            });

        let command = format!("sh {} -k 2>&1", self.options().paths.forward_nat_script);
        let id = self.runner().run_async(&command, self.run_options(), callbacks);
        if id.is_none() {
            self.log("✗ Failed to stop forwarding", LogClass::Err);
            self.schedule_status_refresh(self.options().delays.status_refresh);
        }
        GuardOutcome::Ran(id)
    }

    fn finish_stop_forwarding(
        &self,
        result: CommandResult,
        output: Vec<String>,
        progress: ProgressHandle,
        lock: ActionLock,
        token: GuardToken,
    ) {
        progress.finish();
        self.store().set_flag(Flag::Forwarding, false);

        if result.success {
            self.log("✓ Forwarding stopped successfully", LogClass::Success);
        } else {
            let text = if output.is_empty() {
                result.text().to_string()
            } else {
                output.join("\n")
            };
            if mentions_warning(&text) {
                self.log("⚠ Forwarding cleanup completed with warnings", LogClass::Warn);
            } else {
                self.log(
                    "⚠ Forwarding stop completed (some rules may not have existed)",
                    LogClass::Warn,
                );
            }
            self.console().append_batch(text.lines(), LogClass::None);
        }

        tracing::info!(op = token.operation(), success = result.success, "Forwarding stop settled");
        drop(lock);
        drop(token);
        self.schedule_status_refresh(self.options().delays.status_refresh);
    }
}
