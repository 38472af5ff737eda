mod cli;
mod config;
mod prefs;
mod storage;

use std::io;

use crate::cli::{Command, ConfigCommand};
use clap::Parser;
use color_eyre::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let cli = cli::Cli::parse();
    let config = config::load()?;
    let file = cli.file.as_deref();
    let mut stdout = io::stdout().lock();

    match cli.command {
        Command::Version => print_version(),
        Command::Config(ConfigCommand::Init) => init_config(&config)?,
        Command::Health => run_health_check(&config, file)?,
        Command::Put { key, value, kind } => {
            let prefs = storage::open_preferences(&config, file)?;
            prefs::put(&prefs, &key, kind.into(), &value)?;
        }
        Command::Get { key, kind, default } => {
            let prefs = storage::open_preferences(&config, file)?;
            prefs::get(&prefs, &key, kind.into(), default.as_deref(), &mut stdout)?;
        }
        Command::Remove { key } => {
            prefs::remove(&storage::open_preferences(&config, file)?, &key)?
        }
        Command::Clear => prefs::clear(&storage::open_preferences(&config, file)?)?,
        Command::Contains { key } => {
            let prefs = storage::open_preferences(&config, file)?;
            prefs::contains(&prefs, &key, &mut stdout)?;
        }
        Command::Keys => prefs::keys(&storage::open_preferences(&config, file)?, &mut stdout)?,
    }

    Ok(())
}

fn init_tracing() {
    // Logs go to stderr so command output stays pipeable.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(io::stderr);
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}

fn print_version() {
    println!("cloak {}", env!("CARGO_PKG_VERSION"));
}

/// Runs a quick health check of the keyring and preference file.
fn run_health_check(config: &config::Config, file: Option<&std::path::Path>) -> Result<()> {
    let prefs = storage::open_preferences(config, file)?;
    prefs::health(&prefs)?;
    println!("Key: {} ({})", prefs.key().alias(), prefs.key().fingerprint());
    println!("Storage: ok ({})", prefs.store().path().display());
    Ok(())
}

fn init_config(config: &config::Config) -> Result<()> {
    let path = config::write_default_if_missing(config)?;
    println!("Config initialized at {}", path.display());
    Ok(())
}
