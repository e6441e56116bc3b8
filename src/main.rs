use clap::{Parser, Subcommand};
use linkpool::admin::{self, AdminCommands};
use linkpool::config::Config;
use linkpool::error::AppResult;
use linkpool::service;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// linkpool - short-code pool service for a URL shortener
#[derive(Parser, Debug)]
#[command(name = "linkpool")]
#[command(version = "1.0.0")]
#[command(about = "Short-code pool service for a URL shortener", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pool service (initialize, then monitor and replenish)
    Serve {
        /// Run migrations on startup
        #[arg(long, default_value_t = true)]
        migrate: bool,
    },

    /// Administrative commands
    Admin {
        #[command(subcommand)]
        admin_command: AdminCommands,
    },
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string())),
        )
        .init();

    // Load configuration
    let config = Config::from_env()?;

    match cli.command {
        Commands::Serve { migrate } => service::run_service(config, migrate).await,
        Commands::Admin { admin_command } => admin::run(config, admin_command).await,
    }
}
