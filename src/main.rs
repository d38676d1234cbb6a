mod config;
mod error;
mod evaluator;
mod model;
mod monitor;
mod notifier;
mod source;
mod store;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use error_stack::{Report, ResultExt};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::AppConfig;
use model::{Alert, AlertStatus, Direction, StatusFilter};
use monitor::{Monitor, MonitorOptions};
use notifier::desktop::{DesktopNotifier, desktop_available};
use notifier::{NoopNotifier, Notifier};
use source::yahoo::YahooSource;
use store::{AlertStore, AlertUpdate};

const STORE_FILE: &str = "alerts.json";

#[derive(Debug, Display, Error)]
pub enum AppError {
    #[display("configuration error")]
    Config,
    #[display("alert store error")]
    Store,
    #[display("monitor error")]
    Monitor,
}

#[derive(Parser)]
#[command(name = "ticker-alert", about = "Manage and monitor stock price alerts")]
struct Cli {
    /// Path to the TOML configuration file (built-in defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Display stored alerts with optional filters
    List {
        /// Filter alerts by status
        #[arg(short, long, value_enum, default_value_t = StatusFilter::Active)]
        status: StatusFilter,
        /// Restrict results to a specific ticker symbol
        #[arg(short, long)]
        ticker: Option<String>,
    },
    /// Create a new alert
    Add {
        /// Ticker symbol, e.g. AAPL
        ticker: String,
        /// Price threshold to watch
        threshold_price: f64,
        /// Fire when the price is at-or-above or at-or-below the threshold
        #[arg(value_enum)]
        direction: Direction,
        /// Keep firing on later cycles instead of one-shot
        #[arg(long)]
        persistent: bool,
    },
    /// Delete an alert by id
    Remove {
        /// Alert identifier to remove
        id: String,
    },
    /// Set an alert's status back to active
    Enable {
        /// Alert identifier to enable
        id: String,
    },
    /// Stop an alert from being evaluated
    Disable {
        /// Alert identifier to disable
        id: String,
    },
    /// Change threshold, direction, or firing mode of an alert
    Update {
        /// Target alert identifier
        id: String,
        /// New threshold price
        #[arg(short, long)]
        price: Option<f64>,
        /// New direction
        #[arg(short, long, value_enum)]
        direction: Option<Direction>,
        /// One-shot (false) vs repeating (true) firing
        #[arg(long)]
        persistent: Option<bool>,
    },
    /// Continuously check active alerts and log when they trigger
    Monitor {
        /// Polling interval in seconds between price checks
        #[arg(short, long)]
        interval: Option<u64>,
        /// Optional number of cycles to run (default infinite)
        #[arg(long)]
        iterations: Option<u64>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(report) = run().await {
        eprintln!("{report:?}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Report<AppError>> {
    let cli = Cli::parse();
    let config = config::load_or_default(cli.config.as_deref()).change_context(AppError::Config)?;

    init_tracing(&config);

    let store_path = Path::new(&config.general.data_dir).join(STORE_FILE);
    let store = AlertStore::open(store_path).change_context(AppError::Store)?;

    match cli.command {
        Commands::List { status, ticker } => {
            let alerts = store
                .list(status, ticker.as_deref())
                .change_context(AppError::Store)?;
            if alerts.is_empty() {
                println!("No alerts found.");
            } else {
                for alert in &alerts {
                    println!("{}", render_alert(alert));
                }
            }
        }
        Commands::Add {
            ticker,
            threshold_price,
            direction,
            persistent,
        } => {
            let alert = store
                .create(&ticker, threshold_price, direction, persistent)
                .change_context(AppError::Store)?;
            println!("Created alert {} for {}.", alert.id, alert.ticker);
            println!("{}", render_alert(&alert));
        }
        Commands::Remove { id } => {
            store.remove(&id).change_context(AppError::Store)?;
            println!("Removed alert {id}.");
        }
        Commands::Enable { id } => {
            let alert = store
                .set_status(&id, AlertStatus::Active)
                .change_context(AppError::Store)?;
            println!("Enabled alert {}.", alert.id);
            println!("{}", render_alert(&alert));
        }
        Commands::Disable { id } => {
            let alert = store
                .set_status(&id, AlertStatus::Disabled)
                .change_context(AppError::Store)?;
            println!("Disabled alert {}.", alert.id);
            println!("{}", render_alert(&alert));
        }
        Commands::Update {
            id,
            price,
            direction,
            persistent,
        } => {
            let update = AlertUpdate {
                threshold_price: price,
                direction,
                persistent,
            };
            let alert = store.update(&id, update).change_context(AppError::Store)?;
            println!("Updated alert {}.", alert.id);
            println!("{}", render_alert(&alert));
        }
        Commands::Monitor {
            interval,
            iterations,
        } => {
            let interval_secs = interval.unwrap_or(config.monitor.interval_secs);
            if interval_secs == 0 {
                return Err(Report::new(AppError::Config)
                    .attach("polling interval must be at least 1 second"));
            }

            let monitor = Monitor::new(
                Arc::new(store),
                Arc::new(YahooSource::new()),
                build_notifier(&config),
                MonitorOptions {
                    interval: Duration::from_secs(interval_secs),
                    max_iterations: iterations,
                    fetch_timeout: Duration::from_secs(config.monitor.fetch_timeout_secs),
                },
            );

            let cancel = CancellationToken::new();
            let signal_cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("ctrl+c received, stopping after the current cycle");
                    signal_cancel.cancel();
                }
            });

            monitor.run(cancel).await.change_context(AppError::Monitor)?;
        }
    }

    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::new(&config.general.log_level);
    match config.general.log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

/// Pick the notification capability once at startup; the monitor never
/// probes again.
fn build_notifier(config: &AppConfig) -> Arc<dyn Notifier> {
    if !config.notifications.desktop {
        info!("desktop notifications disabled by config, firings are log-only");
        return Arc::new(NoopNotifier);
    }
    if !desktop_available() {
        info!("no desktop notification service available, firings are log-only");
        return Arc::new(NoopNotifier);
    }
    Arc::new(DesktopNotifier)
}

fn render_alert(alert: &Alert) -> String {
    let mut line = format!(
        "{} | {} {} ${:.2} | status={} | persistent={}",
        alert.id,
        alert.ticker,
        alert.direction,
        alert.threshold_price,
        alert.status,
        alert.persistent
    );
    if let Some(checked) = alert.last_checked {
        line.push_str(&format!(" | last_checked={}", checked.to_rfc3339()));
    }
    if let Some(triggered) = alert.triggered_at {
        line.push_str(&format!(" | triggered_at={}", triggered.to_rfc3339()));
    }
    line
}
