//! Exporting console text to the system clipboard.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::{LogClass, LogConsole};
use chrootctl_shared::errors::{ChrootError, ChrootResult};

/// Somewhere text can be copied to.
#[async_trait]
pub trait Clipboard: Send + Sync {
    async fn write_text(&self, text: &str) -> ChrootResult<()>;
}

/// Clipboard backed by an external tool reading the text on stdin.
#[derive(Clone, Debug)]
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
}

impl CommandClipboard {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    /// `termux-clipboard-set`, available on Android through Termux:API.
    pub fn termux() -> Self {
        Self::new("termux-clipboard-set", &[])
    }

    /// `xclip`, for desktop development hosts.
    pub fn xclip() -> Self {
        Self::new("xclip", &["-selection", "clipboard"])
    }
}

#[async_trait]
impl Clipboard for CommandClipboard {
    async fn write_text(&self, text: &str) -> ChrootResult<()> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ChrootError::CommandFailed(format!("{}: {e}", self.program)))?;

        // stdin is dropped at the end of the match so the tool sees EOF
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(text.as_bytes()).await,
            None => Ok(()),
        };

        let status = child.wait().await?;
        written.map_err(|e| {
            ChrootError::CommandFailed(format!("{}: failed to write text: {e}", self.program))
        })?;
        if !status.success() {
            return Err(ChrootError::CommandFailed(format!(
                "{} exited with {status}",
                self.program
            )));
        }
        Ok(())
    }
}

impl LogConsole {
    /// Copy the rendered console text, trying `primary` first.
    ///
    /// When every clipboard fails the text is appended to the console so the
    /// user can copy it by hand.
    pub async fn copy_logs(&self, primary: &dyn Clipboard, fallback: Option<&dyn Clipboard>) -> bool {
        self.wait_for_flush().await;
        let text = self.text();
        if text.trim().is_empty() {
            self.append("Console is empty - nothing to copy", LogClass::Warn);
            return false;
        }

        if copy_with_fallback(&text, primary, fallback).await {
            self.append("Console logs copied to clipboard", LogClass::Success);
            return true;
        }

        self.append(
            "Failed to copy console logs - please copy manually",
            LogClass::Warn,
        );
        self.append(text, LogClass::None);
        false
    }
}

/// Write `text` to `primary`, falling back to `fallback` on error.
pub(crate) async fn copy_with_fallback(
    text: &str,
    primary: &dyn Clipboard,
    fallback: Option<&dyn Clipboard>,
) -> bool {
    match primary.write_text(text).await {
        Ok(()) => return true,
        Err(e) => tracing::debug!(error = %e, "Primary clipboard failed"),
    }
    match fallback {
        Some(clipboard) => match clipboard.write_text(text).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(error = %e, "Fallback clipboard failed");
                false
            }
        },
        None => false,
    }
}
