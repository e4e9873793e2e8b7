use clap::Parser;
use quarry::cli::{self, Cli, Commands};
use quarry::config::{AppConfig, LoggingConfig};
use quarry::error::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = AppConfig::load(cli.config.as_deref())?;
    let _log_guard = init_logging(&cfg.logging);

    match cli.command.unwrap_or(Commands::Serve { port: None }) {
        Commands::Serve { port } => cli::run_serve(cfg, port).await?,
        Commands::Hunt { topic } => cli::run_hunt_once(cfg, &topic).await?,
        Commands::Agents => cli::print_agents(cfg).await?,
        Commands::Status => cli::print_status(cfg).await?,
    }
    Ok(())
}

fn init_logging(cfg: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.level.clone()));

    match &cfg.dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "quarry.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
