//! CFW Helper - Clash Controller Watcher
//!
//! Polls the Clash external controller and raises a desktop alert when the
//! proxy leaves rule mode or allows LAN access, at a bounded rate.

// Only show console in console mode
#![cfg_attr(windows, windows_subsystem = "windows")]

mod condition;
mod debounce;
mod fetcher;
mod logger;
mod notification;
mod poller;
mod settings;
#[cfg(windows)]
mod tray;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use condition::ConditionEvaluator;
use debounce::SystemClock;
use fetcher::HttpFetcher;
use notification::NotificationSink;
use poller::Poller;
use settings::{Options, Settings};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, info_span};

/// CFW Helper - Warns about risky Clash settings
#[derive(Parser)]
#[command(name = "cfw_helper", version)]
#[command(about = "Alerts when Clash is not in rule mode or allows LAN access")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    options: Options,
}

#[derive(Subcommand)]
enum Commands {
    /// Log to the console instead of the log file (for debugging)
    Console,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keeps the file writer alive until exit
    let _log_guard = match cli.command {
        Some(Commands::Console) => {
            attach_console();
            logger::init_console_logger()?;
            info!("CFW Helper {} started in console mode", env!("CARGO_PKG_VERSION"));
            None
        }
        None => {
            let guard = logger::init_file_logger(cli.options.keep_logs)?;
            info!("CFW Helper {} started", env!("CARGO_PKG_VERSION"));
            Some(guard)
        }
    };

    let settings = match Settings::from_options(&cli.options) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Startup failed: {}", e);
            return Err(e).context("invalid startup configuration");
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("could not start the async runtime")?;

    runtime.block_on(run_app(settings))
}

/// Main application logic
async fn run_app(settings: Settings) -> Result<()> {
    let fetcher = HttpFetcher::new(settings.endpoint.clone(), settings.secret.clone(), settings.timeout)
        .context("could not build the HTTP client")?;

    let shutdown = Arc::new(Notify::new());

    // CTRL+C handler - can fail with windows_subsystem="windows"
    let ctrlc_signal = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("CTRL+C received, shutting down...");
        ctrlc_signal.notify_one();
    }) {
        info!("No CTRL+C handler: {}", e);
    }

    #[cfg(windows)]
    tray::start_tray(shutdown.clone());

    let evaluator = ConditionEvaluator::new(settings.watch.iter().copied());
    notification::show_start_notification(fetcher.endpoint().as_str(), evaluator.watched());

    let poller = Poller::new(
        fetcher,
        evaluator,
        desktop_sink(),
        Arc::new(SystemClock),
        settings.poll,
        info_span!("poller"),
    );

    // Blocks until CTRL+C or tray exit
    poller.run(shutdown).await;

    #[cfg(windows)]
    tray::stop_tray();

    notification::show_stop_notification();
    Ok(())
}

#[cfg(windows)]
fn desktop_sink() -> Arc<dyn NotificationSink> {
    Arc::new(tray::TrayBalloonSink)
}

#[cfg(not(windows))]
fn desktop_sink() -> Arc<dyn NotificationSink> {
    Arc::new(notification::DesktopSink)
}

/// Creates own console (the EXE is built for the windows subsystem)
#[cfg(windows)]
fn attach_console() {
    use windows::Win32::System::Console::AllocConsole;
    unsafe {
        let _ = AllocConsole();
    }
}

#[cfg(not(windows))]
fn attach_console() {}
