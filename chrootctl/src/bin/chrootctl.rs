//! chrootctl command-line front end.
//!
//! Runs one panel operation per invocation against the local root shell and
//! prints the console output as it is produced.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use tokio::sync::{broadcast, oneshot};

use chrootctl::console::ConsoleEvent;
use chrootctl::{
    Band, Confirmation, GuardOutcome, HotspotSettings, InterfaceList, LogClass, Panel,
    PanelOptions, PathRequest, ProcessBridge, SizePurpose, UserInterface, init_logging_for,
};

/// Manage an Android chroot through its root shell scripts.
#[derive(Parser, Debug)]
#[command(name = "chrootctl", version, about)]
struct Cli {
    /// JSON options file; every field is optional.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Answer yes to every confirmation.
    #[arg(short, long, global = true)]
    yes: bool,

    /// Enable verbose script logging for this and later runs.
    #[arg(long, global = true)]
    debug: bool,

    /// Run commands without `su`.
    #[arg(long, global = true)]
    no_root: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the chroot status and which actions are available.
    Status,
    Start,
    Stop,
    Restart,
    /// Apply the OTA update.
    Update,
    /// Archive the chroot.
    Backup {
        /// Destination file; prompted for when omitted.
        #[arg(long)]
        path: Option<String>,
    },
    /// Replace the chroot with an archive.
    Restore {
        #[arg(long)]
        path: Option<String>,
    },
    /// Convert the rootfs into a sparse image.
    Migrate {
        /// Image size in GB.
        #[arg(long)]
        size: Option<u32>,
    },
    /// Resize the sparse image.
    Resize {
        #[arg(long)]
        size: Option<u32>,
    },
    /// Reclaim unused space in the sparse image.
    Trim,
    /// Delete the chroot and all of its data.
    Uninstall,
    /// Wi-Fi hotspot.
    Hotspot {
        #[command(subcommand)]
        action: HotspotCommand,
    },
    /// NAT forwarding.
    Forward {
        #[command(subcommand)]
        action: ForwardCommand,
    },
    /// List regular users inside the chroot.
    Users {
        /// Remember this user for the login command.
        #[arg(long)]
        select: Option<String>,
    },
    /// Copy the login command for the selected user.
    Login,
    /// Start the chroot at boot.
    Boot { state: Toggle },
    /// Android optimizations (doze off) while the chroot runs.
    Optimizations { state: Toggle },
    /// Script run after every chroot start.
    PostExec {
        #[command(subcommand)]
        action: PostExecCommand,
    },
    /// Console history.
    Logs {
        #[command(subcommand)]
        action: LogsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum HotspotCommand {
    Start {
        #[arg(long)]
        iface: Option<String>,
        #[arg(long)]
        ssid: Option<String>,
        #[arg(long)]
        password: Option<String>,
        /// `2` for 2.4 GHz or `5` for 5 GHz.
        #[arg(long)]
        band: Option<String>,
        #[arg(long)]
        channel: Option<u32>,
    },
    Stop,
    /// List interfaces usable as uplink.
    Ifaces {
        #[arg(long)]
        refresh: bool,
    },
    /// Hide the hotspot warning from now on.
    DismissWarning,
}

#[derive(Subcommand, Debug)]
enum ForwardCommand {
    Start {
        /// Interface to forward through; defaults to the saved one.
        #[arg(long)]
        iface: Option<String>,
    },
    Stop,
    Ifaces {
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PostExecCommand {
    Show,
    /// Install the script from a local file.
    Set { file: PathBuf },
    Clear,
}

#[derive(Subcommand, Debug)]
enum LogsCommand {
    Print,
    Copy,
    Clear,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        matches!(self, Toggle::On)
    }
}

// ============================================================================
// TERMINAL INTERFACE
// ============================================================================

/// Dialogs answered from the command line or, failing that, from stdin.
struct TerminalUi {
    assume_yes: bool,
    path: Option<String>,
    size: Option<u32>,
}

impl TerminalUi {
    fn prompt(question: String) -> Option<String> {
        let mut stdout = io::stdout();
        let _ = write!(stdout, "{question}");
        let _ = stdout.flush();
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_string()),
        }
    }

    async fn ask(question: String) -> Option<String> {
        tokio::task::spawn_blocking(move || Self::prompt(question))
            .await
            .ok()
            .flatten()
    }
}

#[async_trait]
impl UserInterface for TerminalUi {
    async fn confirm(&self, request: &Confirmation) -> bool {
        if self.assume_yes {
            return true;
        }
        let question = format!(
            "\n{}\n\n{}\n\n{}? [y/N] ",
            request.title, request.message, request.confirm_label
        );
        Self::ask(question)
            .await
            .is_some_and(|answer| matches!(answer.to_lowercase().as_str(), "y" | "yes"))
    }

    async fn pick_path(&self, request: &PathRequest) -> Option<String> {
        if let Some(path) = &self.path {
            return Some(path.clone());
        }
        let default = if request.default_file_name.is_empty() {
            None
        } else {
            Some(format!("{}/{}", request.default_dir, request.default_file_name))
        };
        let question = match &default {
            Some(default) => format!("{}\n{}\nPath [{default}]: ", request.title, request.message),
            None => format!("{}\n{}\nPath: ", request.title, request.message),
        };
        let answer = Self::ask(question).await?;
        if answer.is_empty() { default } else { Some(answer) }
    }

    async fn select_size_gb(&self, purpose: &SizePurpose) -> Option<u32> {
        if let Some(size) = self.size {
            return Some(size);
        }
        let question = match purpose {
            SizePurpose::Migrate => "Image size in GB: ".to_string(),
            SizePurpose::Resize { current } => {
                format!("Current size {current}. New size in GB: ")
            }
        };
        Self::ask(question).await?.parse().ok()
    }
}

// ============================================================================
// OUTPUT
// ============================================================================

fn print_line(text: &str, class: LogClass) {
    match class {
        LogClass::Err | LogClass::Warn => eprintln!("{text}"),
        _ => println!("{text}"),
    }
}

/// Print appended console lines until told to stop, then drain what is left.
fn spawn_printer(
    mut events: broadcast::Receiver<ConsoleEvent>,
    mut stop: oneshot::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let handle = |event: ConsoleEvent| {
            if let ConsoleEvent::Appended(lines) = event {
                for line in lines.iter().filter(|l| !l.transient) {
                    print_line(&line.text, line.class);
                }
            }
        };
        loop {
            tokio::select! {
                _ = &mut stop => break,
                event = events.recv() => match event {
                    Ok(event) => handle(event),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return,
                },
            }
        }
        while let Ok(event) = events.try_recv() {
            handle(event);
        }
    })
}

fn print_interfaces(list: Option<InterfaceList>) {
    let Some(list) = list else {
        return;
    };
    if list.is_empty() {
        println!("No interfaces found");
    }
    for option in &list.options {
        let marker = if list.selected.as_deref() == Some(option.value.as_str()) {
            "*"
        } else {
            " "
        };
        println!("{marker} {}", option.label);
    }
}

fn finished(outcome: GuardOutcome<bool>) -> Result<()> {
    match outcome {
        GuardOutcome::Ran(true) => Ok(()),
        GuardOutcome::Ran(false) => bail!("operation did not complete"),
        GuardOutcome::Busy { holder } => bail!("busy: {holder} is still running"),
        GuardOutcome::Unavailable => bail!("no command bridge available"),
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

async fn run(panel: &Panel, command: Commands) -> Result<()> {
    match command {
        Commands::Status => {
            let status = panel.refresh_status_manual().await;
            let snapshot = panel.status().snapshot();
            println!("status: {status}");
            let enabled = |disabled: bool| if disabled { "no" } else { "yes" };
            println!("start: {}", enabled(snapshot.buttons.start));
            println!("stop: {}", enabled(snapshot.buttons.stop));
            println!("restart: {}", enabled(snapshot.buttons.restart));
            if let Some(user) = panel.selected_user() {
                println!("user: {user}");
            }
            println!("run at boot: {}", panel.run_at_boot());
            println!("android optimizations: {}", panel.android_optimizations());
            let flags = panel.feature_flags();
            println!("hotspot active: {}", flags.hotspot);
            println!("forwarding active: {}", flags.forwarding);
            println!("sparse image: {}", flags.sparse);
            Ok(())
        }
        Commands::Start => finished(panel.start_chroot().await),
        Commands::Stop => finished(panel.stop_chroot().await),
        Commands::Restart => finished(panel.restart_chroot().await),
        Commands::Update => finished(panel.update_chroot().await),
        Commands::Backup { .. } => finished(panel.backup_chroot().await),
        Commands::Restore { .. } => finished(panel.restore_chroot().await),
        Commands::Migrate { .. } => finished(panel.migrate_to_sparse().await),
        Commands::Resize { .. } => finished(panel.resize_sparse().await),
        Commands::Trim => finished(panel.trim_sparse().await),
        Commands::Uninstall => finished(panel.uninstall_chroot().await),
        Commands::Hotspot { action } => run_hotspot(panel, action).await,
        Commands::Forward { action } => run_forward(panel, action).await,
        Commands::Users { select } => {
            let users = panel.fetch_users(false).await;
            if let Some(user) = select {
                if !users.contains(&user) {
                    bail!("no such user: {user}");
                }
                panel.select_user(&user);
            }
            let selected = panel.selected_user();
            for user in users {
                let marker = if selected.as_deref() == Some(user.as_str()) { "*" } else { " " };
                println!("{marker} {user}");
            }
            Ok(())
        }
        Commands::Login => {
            panel.fetch_users(true).await;
            panel.copy_login_command().await;
            Ok(())
        }
        Commands::Boot { state } => {
            if panel.set_run_at_boot(state.enabled()).await {
                Ok(())
            } else {
                bail!("could not change run-at-boot")
            }
        }
        Commands::Optimizations { state } => {
            if panel.set_android_optimizations(state.enabled()).await {
                Ok(())
            } else {
                bail!("could not change Android optimizations")
            }
        }
        Commands::PostExec { action } => match action {
            PostExecCommand::Show => {
                print!("{}", panel.load_post_exec_script().await);
                Ok(())
            }
            PostExecCommand::Set { file } => {
                let content = std::fs::read_to_string(&file)
                    .with_context(|| format!("failed to read {}", file.display()))?;
                if panel.save_post_exec_script(&content).await {
                    Ok(())
                } else {
                    bail!("could not save post-exec script")
                }
            }
            PostExecCommand::Clear => {
                if panel.clear_post_exec_script().await {
                    Ok(())
                } else {
                    bail!("could not clear post-exec script")
                }
            }
        },
        Commands::Logs { action } => run_logs(panel, action).await,
    }
}

async fn run_hotspot(panel: &Panel, action: HotspotCommand) -> Result<()> {
    match action {
        HotspotCommand::Start {
            iface,
            ssid,
            password,
            band,
            channel,
        } => {
            let saved = panel.hotspot_settings();
            let band = band.map(|b| Band::from_value(&b)).unwrap_or(saved.band);
            let settings = HotspotSettings {
                iface: iface.unwrap_or(saved.iface),
                ssid: ssid.unwrap_or(saved.ssid),
                password: password.unwrap_or(saved.password),
                band,
                channel: channel.unwrap_or(saved.channel),
            };
            finished(panel.start_hotspot(settings).await)
        }
        HotspotCommand::Stop => finished(panel.stop_hotspot().await),
        HotspotCommand::Ifaces { refresh } => {
            print_interfaces(panel.hotspot_interfaces(refresh, false).await);
            Ok(())
        }
        HotspotCommand::DismissWarning => {
            panel.dismiss_hotspot_warning();
            Ok(())
        }
    }
}

async fn run_forward(panel: &Panel, action: ForwardCommand) -> Result<()> {
    match action {
        ForwardCommand::Start { iface } => {
            let iface = match iface {
                Some(iface) => iface,
                None => panel
                    .forwarding_interfaces(false, false)
                    .await
                    .and_then(|list| list.selected)
                    .unwrap_or_default(),
            };
            finished(panel.start_forwarding(&iface).await)
        }
        ForwardCommand::Stop => {
            let dispatched = match panel.stop_forwarding().await {
                GuardOutcome::Ran(id) => id.is_some(),
                GuardOutcome::Busy { holder } => bail!("busy: {holder} is still running"),
                GuardOutcome::Unavailable => bail!("no command bridge available"),
            };
            if !dispatched {
                bail!("could not start the stop script");
            }
            // The stop script settles in the background; stay until it does
            panel.guard().wait_idle().await;
            Ok(())
        }
        ForwardCommand::Ifaces { refresh } => {
            print_interfaces(panel.forwarding_interfaces(refresh, false).await);
            Ok(())
        }
    }
}

async fn run_logs(panel: &Panel, action: LogsCommand) -> Result<()> {
    panel.console().load();
    match action {
        LogsCommand::Print => {
            for line in panel.console().lines() {
                print_line(&line.text, line.class);
            }
        }
        LogsCommand::Copy => {
            panel.copy_logs().await;
            panel.console().wait_for_flush().await;
            if let Some(line) = panel.console().lines().last() {
                print_line(&line.text, line.class);
            }
        }
        LogsCommand::Clear => panel.console().clear(),
    }
    panel.console().save_now();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let options = match &cli.config {
        Some(path) => PanelOptions::load(path)
            .with_context(|| format!("failed to load options from {}", path.display()))?,
        None => PanelOptions::default(),
    };
    init_logging_for(&options.home_dir).context("failed to initialize logging")?;

    let (path, size) = match &cli.command {
        Commands::Backup { path } | Commands::Restore { path } => (path.clone(), None),
        Commands::Migrate { size } | Commands::Resize { size } => (None, *size),
        _ => (None, None),
    };
    let ui = TerminalUi {
        assume_yes: cli.yes,
        path,
        size,
    };
    let bridge = if cli.no_root {
        ProcessBridge::unprivileged()
    } else {
        ProcessBridge::new()
    };

    let panel = Panel::builder(options)
        .bridge(Arc::new(bridge))
        .ui(Arc::new(ui))
        .build()
        .context("failed to build panel")?;

    // Log commands only touch the local history
    if matches!(cli.command, Commands::Logs { .. }) {
        return run(&panel, cli.command).await;
    }

    let (stop_tx, stop_rx) = oneshot::channel();
    let printer = spawn_printer(panel.console().subscribe(), stop_rx);

    panel.initialize().await;
    if cli.debug && !panel.debug_mode() {
        panel.set_debug_mode(true);
    }
    tracing::info!(command = ?cli.command, "Running command");

    let result = run(&panel, cli.command).await;

    panel.console().wait_for_flush().await;
    panel.console().save_now();
    let _ = stop_tx.send(());
    let _ = printer.await;
    result
}
