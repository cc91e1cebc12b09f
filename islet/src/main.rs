//! Islet CLI - tools for Isle object memories and the sync fabric.
//!
//! It uses clap for argument parsing and dispatches to the command
//! handlers in [`commands`].

mod commands;
mod config;
mod error;

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::traits::run;
use commands::{
    ContendArgs, ContendCommand, HashArgs, HashCommand, InspectArgs, InspectCommand, LoadArgs,
    LoadCommand, SignArgs, SignCommand,
};
use config::Config;
use error::{IsletError, Result};

/// Islet - inspect, load, hash and sign Isle object memories
#[derive(Parser, Debug)]
#[command(name = "islet")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Inspect, load, hash and sign Isle object memories", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// More output; repeat for debug and trace logging
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "ISLET_CONFIG")]
    config: Option<PathBuf>,

    /// Print reports as JSON
    #[arg(long, global = true, env = "ISLET_JSON")]
    json: bool,

    /// Disable color output
    #[arg(long, global = true, env = "ISLET_NO_COLOR")]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the islet CLI.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the header and layout of an image without loading it
    Inspect {
        file: PathBuf,
    },

    /// Load an image and its parents, then print the relocated chain
    Load {
        /// URI (file://, suite://, memory:) or file path
        uri: String,

        /// Load into read-only memory
        #[arg(long)]
        read_only: bool,

        /// Directories searched for file:// parents, separated like PATH
        #[arg(short, long, env = "ISLET_PATH")]
        path: Option<String>,

        /// Keep canonical addresses, as the hosted build tool does
        #[arg(long)]
        hosted: bool,
    },

    /// Print the content hash of an image's memory
    Hash {
        file: PathBuf,
    },

    /// Wrap an image as a signed suite container
    Sign {
        file: PathBuf,

        /// File holding the suite key
        #[arg(short, long, env = "ISLET_KEY_FILE")]
        key: PathBuf,

        /// Container to write
        #[arg(short, long)]
        output: PathBuf,

        /// Overwrite an existing container
        #[arg(short, long)]
        force: bool,
    },

    /// Increment a shared atomic from many simulated cores
    Contend {
        /// Threads to spawn (default: one per enabled core)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Increments per thread
        #[arg(short = 'n', long, default_value_t = 100)]
        increments: u32,

        /// Increment with compare-and-set loops
        #[arg(long)]
        cas: bool,

        /// Islands in the fabric (overrides the configuration)
        #[arg(long)]
        islands: Option<usize>,

        /// Cores per island (overrides the configuration)
        #[arg(long)]
        cores: Option<usize>,

        /// Manager cores (overrides the configuration)
        #[arg(long)]
        managers: Option<usize>,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = try_main(cli) {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}

fn try_main(cli: Cli) -> Result<()> {
    init_logging(cli.verbose, cli.no_color)?;

    let mut config = match cli.config.as_deref() {
        Some(path) => Config::load_from_path(path)?,
        None => Config::load()?,
    };
    if cli.verbose > 0 {
        config.loader.verbose = true;
    }

    execute_command(cli.command, cli.json, config)
}

/// Initialize the logging system.
///
/// `ISLET_LOG`, then `RUST_LOG`, override the level picked by `-v`.
/// Records from the `log` facade used by the libraries are forwarded.
fn init_logging(verbose: u8, no_color: bool) -> Result<()> {
    let filter = EnvFilter::try_from_env("ISLET_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            EnvFilter::new(match verbose {
                0 => "warn",
                1 => "info",
                2 => "debug",
                _ => "trace",
            })
        });

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(!no_color)
        .with_target(verbose > 1)
        .with_thread_names(verbose > 2);

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .map_err(|e| IsletError::Config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

fn execute_command(command: Commands, json: bool, mut config: Config) -> Result<()> {
    match command {
        Commands::Inspect { file } => run::<InspectCommand>(InspectArgs { file }, &config, json),
        Commands::Load {
            uri,
            read_only,
            path,
            hosted,
        } => run::<LoadCommand>(
            LoadArgs {
                uri,
                read_only,
                path,
                hosted,
            },
            &config,
            json,
        ),
        Commands::Hash { file } => run::<HashCommand>(HashArgs { file }, &config, json),
        Commands::Sign {
            file,
            key,
            output,
            force,
        } => run::<SignCommand>(
            SignArgs {
                file,
                key,
                output,
                force,
            },
            &config,
            json,
        ),
        Commands::Contend {
            threads,
            increments,
            cas,
            islands,
            cores,
            managers,
        } => {
            if let Some(islands) = islands {
                config.fabric.islands = islands;
            }
            if let Some(cores) = cores {
                config.fabric.cores_per_island = cores;
            }
            if let Some(managers) = managers {
                config.fabric.managers = managers;
            }
            run::<ContendCommand>(
                ContendArgs {
                    threads,
                    increments,
                    cas,
                },
                &config,
                json,
            )
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_inspect() {
        let cli = Cli::parse_from(["islet", "inspect", "boot.isle"]);
        assert!(matches!(cli.command, Commands::Inspect { file } if file == PathBuf::from("boot.isle")));
    }

    #[test]
    fn test_cli_parse_load() {
        let cli = Cli::parse_from(["islet", "load", "suite://library", "--read-only"]);
        if let Commands::Load { uri, read_only, hosted, .. } = cli.command {
            assert_eq!(uri, "suite://library");
            assert!(read_only);
            assert!(!hosted);
        } else {
            panic!("Expected Load command");
        }
    }

    #[test]
    fn test_cli_parse_sign() {
        let cli = Cli::parse_from(["islet", "sign", "app.isle", "--key", "k.txt", "-o", "app.suite"]);
        if let Commands::Sign { key, output, force, .. } = cli.command {
            assert_eq!(key, PathBuf::from("k.txt"));
            assert_eq!(output, PathBuf::from("app.suite"));
            assert!(!force);
        } else {
            panic!("Expected Sign command");
        }
    }

    #[test]
    fn test_cli_parse_sign_requires_output() {
        assert!(Cli::try_parse_from(["islet", "sign", "app.isle", "--key", "k"]).is_err());
    }

    #[test]
    fn test_cli_parse_contend() {
        let cli = Cli::parse_from(["islet", "contend", "-t", "3", "-n", "7", "--cas", "--cores", "4"]);
        if let Commands::Contend { threads, increments, cas, cores, .. } = cli.command {
            assert_eq!(threads, Some(3));
            assert_eq!(increments, 7);
            assert!(cas);
            assert_eq!(cores, Some(4));
        } else {
            panic!("Expected Contend command");
        }
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::parse_from(["islet", "-vv", "--json", "hash", "a.isle"]);
        assert_eq!(cli.verbose, 2);
        assert!(cli.json);
    }

    #[test]
    fn test_cli_parse_global_config() {
        let cli = Cli::parse_from(["islet", "--config", "/path/to/islet.toml", "hash", "a"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/islet.toml")));
    }
}
