// =============================================================================
// Confluence Bot — Main Entry Point
// =============================================================================
//
// Console front end: `/start` walks the setup wizard, the final choice starts
// a streaming session, accepted signals are printed as text reports.
// Signals are recommendations only; nothing here places orders.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod config;
mod engine;
mod feed;
mod indicators;
mod market_data;
mod session;
mod types;
mod validator;

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Settings;
use crate::session::{BinanceFeedFactory, ConsoleSink, SessionManager, UserId, Wizard};
use crate::validator::{AiValidator, OpenRouterClient};

const SETTINGS_PATH: &str = "confluence_config.json";
const SSID_PATH: &str = "ssid.txt";

/// The console has exactly one user.
const CONSOLE_USER: UserId = 0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    let (mut settings, load_error) = match Settings::load(SETTINGS_PATH) {
        Ok(s) => (s, None),
        Err(e) => (Settings::default(), Some(e)),
    };
    settings.apply_env();
    settings.load_ssid_file(SSID_PATH);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_level)),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Confluence Bot — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    if let Some(e) = load_error {
        warn!(error = %e, "failed to load settings, using defaults");
        if !Path::new(SETTINGS_PATH).exists() {
            match settings.save(SETTINGS_PATH) {
                Ok(()) => info!(path = SETTINGS_PATH, "wrote default settings"),
                Err(e) => warn!(error = %e, "could not write default settings"),
            }
        }
    }
    info!(?settings, "configuration");

    if settings.feed_ssid.is_none() {
        warn!("no feed credential (FEED_SSID or ssid.txt); sessions will fail to connect");
    }
    if settings.ai_api_key.is_empty() {
        warn!("no validator API key; every candidate will be rejected");
    }

    // ── 2. Validator ─────────────────────────────────────────────────────
    let client = OpenRouterClient::new(
        settings.ai_base_url.clone(),
        settings.ai_api_key.clone(),
        settings.ai_model.clone(),
        settings.ai_timeout(),
    )?;
    let validator = Arc::new(AiValidator::new(
        Arc::new(client),
        settings.ai_min_interval(),
        settings.ai_timeout(),
    )?);

    // ── 3. Session manager ───────────────────────────────────────────────
    let manager = SessionManager::new(
        &settings,
        Arc::new(BinanceFeedFactory::from_settings(&settings)),
        validator,
        Arc::new(ConsoleSink),
    );

    // ── 4. Console loop ──────────────────────────────────────────────────
    println!("Commands: /start, /stop, /status, /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut wizard: Option<Wizard> = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !handle_line(line.trim(), &manager, &mut wizard).await {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    error!(error = %e, "failed to read stdin");
                    break;
                }
            },
        }
    }

    // ── 5. Shutdown ──────────────────────────────────────────────────────
    manager.stop_all().await;
    info!("shutdown complete");
    Ok(())
}

/// Handle one console line.  Returns `false` to quit.
async fn handle_line(line: &str, manager: &SessionManager, wizard: &mut Option<Wizard>) -> bool {
    match line {
        "" => {}
        "/quit" | "/exit" => return false,
        "/start" => {
            let w = Wizard::new();
            println!("{}", w.state().render());
            *wizard = Some(w);
        }
        "/stop" => {
            *wizard = None;
            if manager.stop(CONSOLE_USER).await {
                println!("Stopped streaming.");
            } else {
                println!("No active session.");
            }
        }
        "/status" => match manager.status(CONSOLE_USER) {
            Some(status) => println!("{status}"),
            None => println!("Idle. Use /start to begin."),
        },
        choice => {
            let Some(w) = wizard.as_mut() else {
                println!("Unknown command. Use /start, /stop, /status or /quit.");
                return true;
            };
            if let Err(e) = w.choose(choice) {
                println!("{e}");
                println!("{}", w.state().render());
                return true;
            }
            let Some(spec) = w.spec().cloned() else {
                println!("{}", w.state().render());
                return true;
            };
            *wizard = None;
            match manager.start(CONSOLE_USER, spec.clone()).await {
                Ok(()) => println!(
                    "Streaming {} ({}) @ {}s. Generating signals only when all strategies agree.",
                    spec.asset, spec.market, spec.expiry_seconds
                ),
                Err(e) => println!("Failed to start session: {e:#}"),
            }
        }
    }
    true
}
