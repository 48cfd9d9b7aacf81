//! otaflash CLI - Command-line tool for dual-bank firmware updates.
//!
//! ## Features
//!
//! - Query the installed firmware versions
//! - Install a firmware image into the inactive bank
//! - List serial ports
//! - Generate test images
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use log::debug;
use otaflash::port::DEFAULT_BAUD;
use otaflash::{NativePort, SerialConfig, SessionConfig, UpdateSession};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use thiserror::Error;

mod commands;
mod config;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(std::sync::atomic::Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors that map to a specific exit code.
#[derive(Debug, Error)]
pub(crate) enum CliError {
    /// Invalid invocation (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// The device update did not complete (exit code 1).
    #[error("{0}")]
    Failed(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Failed(_) => 1,
        }
    }
}

/// otaflash - Dual-bank firmware updates over a serial link.
///
/// Environment variables:
///   OTAFLASH_PORT   - Default serial port
///   OTAFLASH_BAUD   - Default baud rate (default: 115200)
#[derive(Parser)]
#[command(name = "otaflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port to use.
    #[arg(short, long, global = true, env = "OTAFLASH_PORT")]
    port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "OTAFLASH_BAUD")]
    baud: Option<u32>,

    /// Response timeout in seconds.
    #[arg(long, global = true, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    timeout: Option<u64>,

    /// Attempts per packet and per READY wait.
    #[arg(long, global = true, value_name = "N")]
    retries: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Show the firmware versions installed on the device.
    Info {
        /// Output version information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Install a firmware image into the inactive bank.
    Update {
        /// Path to the raw firmware image.
        firmware: PathBuf,

        /// Version number to record for the new firmware.
        #[arg(long = "fw-version", value_name = "N")]
        fw_version: u32,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Write a test firmware image with a recognizable byte pattern.
    GenImage {
        /// Output file.
        output: PathBuf,

        /// Image size in bytes.
        #[arg(long, default_value_t = 1024)]
        size: usize,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Connection and session settings after layering flags, environment and files.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub(crate) port: Option<String>,
    pub(crate) baud: u32,
    pub(crate) session: SessionConfig,
    pub(crate) quiet: bool,
}

impl Settings {
    fn resolve(cli: &Cli, config: &Config) -> Self {
        let mut session = config.session_config();
        if let Some(secs) = cli.timeout {
            session = session.with_response_timeout(Duration::from_secs(secs));
        }
        if let Some(retries) = cli.retries {
            session = session.with_max_retries(retries);
        }

        Self {
            port: cli
                .port
                .clone()
                .or_else(|| config.connection.port.clone()),
            baud: cli.baud.or(config.connection.baud).unwrap_or(DEFAULT_BAUD),
            session,
            quiet: cli.quiet,
        }
    }

    /// Serial settings for the selected port.
    pub(crate) fn serial_config(&self) -> Result<SerialConfig> {
        let port = self.port.as_deref().ok_or_else(|| {
            CliError::Usage(
                "No serial port specified. Use --port, OTAFLASH_PORT or [connection] port in \
                 otaflash.toml"
                    .to_string(),
            )
        })?;

        Ok(SerialConfig::new(port, self.baud).with_timeout(self.session.response_timeout))
    }

    /// Open the port and prepare an update session.
    pub(crate) fn open_session(&self) -> Result<UpdateSession<NativePort>> {
        let serial = self.serial_config()?;
        if !self.quiet {
            eprintln!(
                "{} Using {} at {} baud",
                style("🔌").cyan(),
                style(&serial.port_name).green(),
                serial.baud_rate
            );
        }

        UpdateSession::open(&serial, self.session.clone())
            .with_context(|| format!("Failed to open serial port {}", serial.port_name))
    }
}

fn main() -> ExitCode {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, std::sync::atomic::Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "otaflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<CliError>()
                .map_or(1, CliError::exit_code);
            eprintln!("{} {err:#}", style("Error:").red().bold());
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    // Load configuration
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let settings = Settings::resolve(cli, &config);
    debug!("Settings: {settings:?}");

    match &cli.command {
        Commands::Info { json } => commands::device::cmd_info(&settings, *json),
        Commands::Update {
            firmware,
            fw_version,
        } => commands::device::cmd_update(&settings, firmware, *fw_version),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::GenImage { output, size } => {
            commands::image::cmd_gen_image(output, *size, cli.quiet)
        },
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_update() {
        let cli = Cli::try_parse_from([
            "otaflash",
            "--port",
            "/dev/ttyUSB0",
            "--baud",
            "230400",
            "update",
            "fw.bin",
            "--fw-version",
            "7",
        ])
        .unwrap();

        assert_eq!(cli.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(cli.baud, Some(230400));
        match cli.command {
            Commands::Update {
                firmware,
                fw_version,
            } => {
                assert_eq!(firmware, PathBuf::from("fw.bin"));
                assert_eq!(fw_version, 7);
            },
            _ => panic!("Expected Update command"),
        }
    }

    #[test]
    fn test_cli_update_requires_version() {
        assert!(Cli::try_parse_from(["otaflash", "update", "fw.bin"]).is_err());
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "otaflash",
            "info",
            "--json",
            "-p",
            "COM3",
            "--timeout",
            "2",
            "--retries",
            "5",
            "-vv",
        ])
        .unwrap();

        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.timeout, Some(2));
        assert_eq!(cli.retries, Some(5));
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Info { json: true }));
    }

    #[test]
    fn test_cli_rejects_zero_timeout() {
        assert!(Cli::try_parse_from(["otaflash", "--timeout", "0", "info"]).is_err());
        let cli = Cli::try_parse_from(["otaflash", "--timeout", "1", "info"]).unwrap();
        assert_eq!(cli.timeout, Some(1));
    }

    #[test]
    fn test_cli_parse_gen_image_default_size() {
        let cli = Cli::try_parse_from(["otaflash", "gen-image", "test.bin"]).unwrap();
        match cli.command {
            Commands::GenImage { output, size } => {
                assert_eq!(output, PathBuf::from("test.bin"));
                assert_eq!(size, 1024);
            },
            _ => panic!("Expected GenImage command"),
        }
    }

    #[test]
    fn test_cli_parse_completions() {
        let cli = Cli::try_parse_from(["otaflash", "completions", "zsh"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Zsh }
        ));
    }

    #[test]
    fn test_settings_flags_override_config() {
        let mut config = Config::default();
        config.connection.port = Some("/dev/ttyS0".to_string());
        config.connection.baud = Some(9600);
        config.session.max_retries = Some(8);
        config.session.timeout_secs = Some(9);

        let cli = Cli::try_parse_from(["otaflash", "--port", "/dev/ttyUSB1", "--retries", "2", "info"])
            .unwrap();
        let settings = Settings::resolve(&cli, &config);

        assert_eq!(settings.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(settings.baud, 9600);
        assert_eq!(settings.session.max_retries, 2);
        assert_eq!(settings.session.response_timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_settings_defaults() {
        let cli = Cli::try_parse_from(["otaflash", "info"]).unwrap();
        let settings = Settings::resolve(&cli, &Config::default());

        assert_eq!(settings.baud, DEFAULT_BAUD);
        assert_eq!(settings.session, SessionConfig::default());
    }

    #[test]
    fn test_missing_port_is_usage_error() {
        let settings = Settings {
            port: None,
            baud: DEFAULT_BAUD,
            session: SessionConfig::default(),
            quiet: true,
        };
        let err = settings.serial_config().unwrap_err();
        let cli_err = err.downcast_ref::<CliError>().unwrap();
        assert!(matches!(cli_err, CliError::Usage(_)));
        assert_eq!(cli_err.exit_code(), 2);
    }

    #[test]
    fn test_serial_config_uses_session_timeout() {
        let settings = Settings {
            port: Some("/dev/ttyUSB0".to_string()),
            baud: 57600,
            session: SessionConfig::default().with_response_timeout(Duration::from_secs(3)),
            quiet: true,
        };
        let serial = settings.serial_config().unwrap();
        assert_eq!(serial.baud_rate, 57600);
        assert_eq!(serial.timeout, Duration::from_secs(3));
    }
}
