//! LinkChat CLI entry point

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use linkchat_ble::{CentralLink, LinkDriver};
use linkchat_cli::{
    chat::ChatSession,
    cli::{Cli, Commands},
    config::CliConfig,
    error::{CliError, Result},
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let config = load_configuration(&cli)?;

    match cli.command {
        Commands::Scan {
            connect_first,
            name,
        } => {
            let config = config.with_overrides(name, None)?;
            let (driver, handle) = CentralLink::new(config.ble.clone(), config.link.clone()).await?;
            handle.start_discovery().await?;
            let session = ChatSession::new(handle.clone(), &config).with_connect_first(connect_first);
            run_link(driver, session).await?;
        }
        Commands::Advertise { room, name } => {
            let config = config.with_overrides(name, room)?;
            advertise(config).await?;
        }
    }

    info!("LinkChat exited");
    Ok(())
}

#[cfg(target_os = "linux")]
async fn advertise(config: CliConfig) -> Result<()> {
    let (driver, handle) =
        linkchat_ble::PeripheralLink::new(config.ble.clone(), config.link.clone()).await?;
    info!(room = %config.room_label, "hosting room");
    handle.start_advertising(config.room_label.clone()).await?;
    let session = ChatSession::new(handle, &config);
    run_link(driver, session).await
}

#[cfg(not(target_os = "linux"))]
async fn advertise(_config: CliConfig) -> Result<()> {
    Err(linkchat_ble::BleLinkError::PeripheralUnsupported.into())
}

/// Drive the radio on its own task while the chat session runs here
async fn run_link<D>(driver: D, session: ChatSession) -> Result<()>
where
    D: LinkDriver + 'static,
{
    let driver_task = tokio::spawn(driver.run());
    session.run().await?;
    match driver_task.await {
        Ok(result) => result.map_err(CliError::from),
        Err(e) => Err(CliError::Driver(e.to_string())),
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    // RUST_LOG wins over --verbose when set
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(log_level).init(),
    }
}

/// Load configuration from file or use defaults
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    if let Some(config_path) = &cli.config {
        info!("Loading configuration from: {}", config_path);
        CliConfig::load_from_file(config_path)
    } else {
        info!("Using default configuration");
        Ok(CliConfig::default())
    }
}
