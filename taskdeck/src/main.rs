//! `taskdeck`: terminal task list for a GraphQL task API.
//!
//! Loads the task list over HTTP, keeps it live over a WebSocket
//! subscription, and applies every change optimistically. Configuration via
//! CLI flags, environment variables, or config file
//! (`~/.config/taskdeck/config.toml`).
//!
//! ```bash
//! # Against a local dev server
//! cargo run --bin taskdeck-devserver &
//! cargo run --bin taskdeck
//!
//! # Store the token from a sign-in redirect, then start
//! cargo run --bin taskdeck -- --redirect-url 'https://app.example.com/#token=...'
//!
//! # Forget the stored token
//! cargo run --bin taskdeck -- --logout
//! ```

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crossterm::{
    event::{self, Event, KeyEventKind},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{Terminal, backend::CrosstermBackend};
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskdeck::app::{App, Severity};
use taskdeck::auth::redirect::absorb_into;
use taskdeck::auth::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
use taskdeck::config::{CliArgs, ClientConfig};
use taskdeck::net::{self, NetCommand, NetEvent, NetHandles};
use taskdeck::reconcile::Reconciler;
use taskdeck::transport::TransportRouter;
use taskdeck::transport::http::HttpChannel;
use taskdeck::transport::ws::WsChannel;
use taskdeck::ui;

/// How long shutdown waits for subscriptions to close.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Initialize logging before terminal setup (logs go to file, not stdout).
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!(api_url = %config.api_url, "taskdeck starting");

    let credentials = open_credentials(&cli, &config)?;

    if cli.logout {
        credentials.clear().map_err(io::Error::other)?;
        tracing::info!("stored token removed");
        println!("Signed out.");
        return Ok(());
    }

    let mut notices = Vec::new();
    if let Some(redirect) = &cli.redirect_url {
        match absorb_into(credentials.as_ref(), redirect) {
            Ok(Some(cleaned)) => notices.push(format!("Signed in via {cleaned}")),
            Ok(None) => notices.push("Redirect URL carried no token".to_string()),
            Err(e) => {
                eprintln!("Error: {e}");
                return Err(io::Error::other(e));
            }
        }
    }

    let router = build_router(&config, Arc::clone(&credentials))?;

    // Set up terminal.
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(Reconciler::new(config.max_task_title_len))
        .with_identity(credentials.get().is_some(), config.sign_in_url.clone());
    for notice in notices {
        app.push_system(Severity::Info, notice);
    }

    // Run the app.
    let handles = net::spawn_net(router, &config.net_config());
    let result = run_app(&mut terminal, &mut app, handles, &config).await;

    // Restore terminal.
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    tracing::info!("taskdeck exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, since ratatui owns the terminal).
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("taskdeck.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// `--token` wins over the token file and is never persisted.
fn open_credentials(cli: &CliArgs, config: &ClientConfig) -> io::Result<Arc<dyn CredentialStore>> {
    if let Some(token) = &cli.token {
        return Ok(Arc::new(MemoryCredentialStore::with_token(token.clone())));
    }
    let path = config
        .credentials_file
        .clone()
        .or_else(FileCredentialStore::default_path)
        .ok_or_else(|| {
            io::Error::other("no data directory for the token file; pass --credentials-file")
        })?;
    tracing::debug!(path = %path.display(), "using token file");
    Ok(Arc::new(FileCredentialStore::new(path)))
}

fn build_router(
    config: &ClientConfig,
    credentials: Arc<dyn CredentialStore>,
) -> io::Result<TransportRouter<HttpChannel, WsChannel>> {
    let http = HttpChannel::new(
        config.api_url.clone(),
        config.connect_timeout,
        config.request_timeout,
    )
    .map_err(io::Error::other)?;
    let ws_config = config.ws_config().map_err(io::Error::other)?;
    tracing::info!(ws_url = %ws_config.url, "live updates endpoint");
    let ws = WsChannel::new(ws_config);
    Ok(TransportRouter::new(http, ws, credentials))
}

/// Main application loop.
async fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    handles: NetHandles,
    config: &ClientConfig,
) -> io::Result<()> {
    let NetHandles {
        commands,
        mut events,
        task,
    } = handles;

    loop {
        // Step 1: Draw the UI frame.
        terminal.draw(|frame| ui::draw(frame, app))?;

        // Step 2: Drain all pending NetEvents (non-blocking).
        drain_net_events(app, &mut events);

        // Step 3: Poll for terminal input events.
        if event::poll(config.poll_timeout)?
            && let Event::Key(key) = event::read()?
        {
            if key.kind != KeyEventKind::Press {
                continue;
            }

            if let Some(net_cmd) = app.handle_key_event(key) {
                match commands.try_send(net_cmd) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(cmd)) => {
                        // Optimistic state already reflects the intent; wait for room.
                        if commands.send(cmd).await.is_err() {
                            app.push_system(Severity::Error, "Network stopped; command not sent");
                        }
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        app.push_system(Severity::Error, "Network stopped; command not sent");
                    }
                }
            }
        }

        if app.should_quit {
            // Close the subscriptions before leaving.
            let _ = commands.send(NetCommand::Shutdown).await;
            if tokio::time::timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
                tracing::warn!("networking did not shut down in time");
            }
            return Ok(());
        }
    }
}

/// Drain all pending `NetEvent`s from the receiver and apply them to the app.
fn drain_net_events(app: &mut App, rx: &mut mpsc::Receiver<NetEvent>) {
    while let Ok(event) = rx.try_recv() {
        app.apply_net_event(event);
    }
}
