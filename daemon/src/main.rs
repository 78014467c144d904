/// Atelier Daemon - Main entry point
/// Starts the HTTP server for stage workflow coordination
use atelier_core::{TracingNotificationSink, WorkflowCoordinator};
use atelier_daemon::{ApiServer, DaemonConfig};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "atelier-daemon",
    about = "HTTP server for interior-design project stage workflows",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Configuration file path
    #[arg(
        short,
        long,
        value_name = "PATH",
        help = "Path to configuration file (TOML)"
    )]
    config: Option<PathBuf>,

    /// HTTP server port
    #[arg(
        short = 'p',
        long,
        value_name = "PORT",
        help = "HTTP server port (default: 8080)"
    )]
    http_port: Option<u16>,

    /// Database URL
    #[arg(
        short,
        long,
        value_name = "URL",
        help = "SQLite database URL (default: sqlite://atelier.db)"
    )]
    database_url: Option<String>,

    /// Enable authentication
    #[arg(long, help = "Require JWT bearer tokens")]
    enable_auth: bool,

    /// JWT secret
    #[arg(
        long,
        value_name = "SECRET",
        help = "JWT secret (required if auth enabled)"
    )]
    jwt_secret: Option<String>,

    /// Log level
    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    verbose: bool,
}

fn init_logging(level: &str, format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(level.parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_line_number(true);

    if format == "compact" {
        builder.compact().init();
    } else {
        builder.init();
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install CTRL+C signal handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        () = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = DaemonConfig::load_or_default(args.config.as_deref())?;

    // Apply CLI overrides
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    if args.verbose {
        config.logging.level = "debug".to_string();
    }
    if let Some(port) = args.http_port {
        config.server.http_port = port;
    }
    if let Some(url) = args.database_url {
        config.atelier.storage.database_url = url;
    }
    if args.enable_auth {
        config.auth.enabled = true;
    }
    if let Some(secret) = args.jwt_secret {
        config.auth.jwt_secret = secret;
    }

    init_logging(&config.logging.level, &config.logging.format)?;

    info!("Starting Atelier Daemon v{}", atelier_daemon::VERSION);
    match &args.config {
        Some(path) => info!("Loaded configuration from: {}", path.display()),
        None => info!("Using default configuration"),
    }

    // Validate configuration
    config.validate()?;

    info!(
        "Server configuration: HTTP {}:{}, database {}",
        config.server.http_addr, config.server.http_port, config.atelier.storage.database_url
    );

    if config.auth.enabled {
        info!("Authentication: ENABLED");
    } else {
        info!("Authentication: DISABLED (trusting gateway identity headers)");
    }

    let coordinator =
        WorkflowCoordinator::from_config(&config.atelier, Arc::new(TracingNotificationSink))
            .await?;
    let server = ApiServer::new(config, Arc::new(coordinator))?;

    server.run(shutdown_signal()).await?;

    info!("Atelier Daemon stopped");
    Ok(())
}
