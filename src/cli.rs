//! Command line front end
//! Loads the config, installs logging and dispatches to the explorer
//! commands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::commands::{
    explore_device, init_config, parse_uuid, read_characteristic, scan_devices, show_config,
    watch_characteristic,
};
use crate::config::explorer_config::ExplorerConfig;
use crate::config::AppConfig;
use crate::core::bluetooth::constants::DEFAULT_SCAN_DURATION_SECS;
use crate::core::bluetooth::types::DeviceId;
use crate::logging::init_logging;
use crate::state::AppState;

#[derive(Debug, PartialEq, Eq, Parser)]
#[command(name = "blexplorer")]
#[command(about = "Scan, connect to and explore Bluetooth Low Energy peripherals", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Config file to use instead of the one in the user config directory
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Commands {
    /// List nearby devices with their decoded advertisements
    Scan {
        /// How long to scan, in seconds
        #[arg(default_value_t = DEFAULT_SCAN_DURATION_SECS)]
        seconds: u64,
    },
    /// Connect and list services, reading every readable value
    Explore {
        /// Device id as printed by `scan`
        device: DeviceId,
    },
    /// Read one characteristic
    Read {
        device: DeviceId,
        /// Service UUID, full or short form such as 180f
        #[arg(value_parser = parse_uuid)]
        service: Uuid,
        /// Characteristic UUID, full or short form such as 2a19
        #[arg(value_parser = parse_uuid)]
        characteristic: Uuid,
    },
    /// Print notifications of a characteristic until interrupted
    Notify {
        device: DeviceId,
        #[arg(value_parser = parse_uuid)]
        characteristic: Uuid,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum ConfigAction {
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Print the config in effect
    Show,
}

/// Runs one command against the default Bluetooth adapter.
pub async fn run(cli: Cli) -> Result<()> {
    init_logging(LevelFilter::Info);
    let mut out = std::io::stdout();

    let command = match cli.command {
        Commands::Config { action } => {
            return run_config(action, cli.config.as_deref(), &mut out).await;
        }
        command => command,
    };

    let config = AppConfig::load(cli.config.as_deref()).await?;
    log::set_max_level(config.explorer.log_level_filter());

    let state = AppState::new(config).await?;

    let result = match command {
        Commands::Scan { seconds } => scan_devices(&state, Duration::from_secs(seconds), &mut out)
            .await
            .map(|count| info!("{} device(s) found.", count)),
        Commands::Explore { device } => explore_device(&state, &device, &mut out).await,
        Commands::Read {
            device,
            service,
            characteristic,
        } => read_characteristic(&state, &device, service, characteristic, &mut out)
            .await
            .map(|_| ()),
        Commands::Notify {
            device,
            characteristic,
        } => {
            let cancel = CancellationToken::new();
            let interrupt = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!("Failed to listen for interrupt: {}", e);
                }
                interrupt.cancel();
            });
            watch_characteristic(&state, &device, characteristic, None, cancel, &mut out)
                .await
                .map(|count| info!("{} notification(s) received.", count))
        }
        // Handled before the adapter is opened.
        Commands::Config { .. } => Ok(()),
    };

    state.controller.shutdown();
    result
}

async fn run_config<W: std::io::Write>(
    action: ConfigAction,
    path: Option<&Path>,
    out: &mut W,
) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match path {
                Some(path) => path.to_path_buf(),
                None => ExplorerConfig::default_path()
                    .context("No config directory on this platform, pass --config")?,
            };
            init_config(&path, force, out).await
        }
        ConfigAction::Show => {
            let config = AppConfig::load(path).await?;
            show_config(&config, out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scan_record::record::uuid_from_short;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("blexplorer").chain(args.iter().copied()))
    }

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn scan_defaults_its_duration() {
        let cli = parse(&["scan"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Scan {
                seconds: DEFAULT_SCAN_DURATION_SECS
            }
        );
        assert_eq!(cli.config, None);
    }

    #[test]
    fn config_flag_may_come_after_the_command() {
        let cli = parse(&["scan", "--config", "/tmp/explorer.json", "3"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/explorer.json")));
        assert_eq!(cli.command, Commands::Scan { seconds: 3 });

        let cli = parse(&["-c", "/tmp/explorer.json", "explore", "dev-1"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/explorer.json")));
        assert_eq!(
            cli.command,
            Commands::Explore {
                device: DeviceId::from("dev-1")
            }
        );
    }

    #[test]
    fn read_takes_short_uuids() {
        let cli = parse(&["read", "AA:BB:CC:DD:EE:FF", "180f", "2a19"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Read {
                device: DeviceId::from("AA:BB:CC:DD:EE:FF"),
                service: uuid_from_short(0x180f),
                characteristic: uuid_from_short(0x2a19),
            }
        );
    }

    #[test]
    fn config_actions_parse() {
        let cli = parse(&["config", "init", "--force"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Init { force: true }
            }
        );
        let cli = parse(&["config", "show"]).unwrap();
        assert_eq!(
            cli.command,
            Commands::Config {
                action: ConfigAction::Show
            }
        );
    }

    #[test]
    fn bad_arguments_are_rejected() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["explore"]).is_err());
        assert!(parse(&["scan", "soon"]).is_err());
        assert!(parse(&["--config"]).is_err());
        assert!(parse(&["read", "dev-1", "zz", "2a19"]).is_err());
    }

    #[test]
    fn help_is_not_a_failure() {
        let help = parse(&["--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
        assert_eq!(help.exit_code(), 0);
    }

    #[tokio::test]
    async fn config_init_writes_defaults_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blexplorer").join("explorer_config.json");

        let mut out = Vec::new();
        run_config(ConfigAction::Init { force: false }, Some(&path), &mut out)
            .await
            .unwrap();
        assert!(path.is_file());
        assert!(String::from_utf8(out).unwrap().contains("Wrote default config"));

        let again = run_config(
            ConfigAction::Init { force: false },
            Some(&path),
            &mut Vec::<u8>::new(),
        )
        .await;
        assert!(again.is_err());

        run_config(ConfigAction::Init { force: true }, Some(&path), &mut Vec::<u8>::new())
            .await
            .unwrap();
    }
}
