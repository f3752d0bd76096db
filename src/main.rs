use std::path::PathBuf;
use std::process::ExitCode;

use clap::error::ErrorKind;
use clap::Parser;

use pipeworks::blocks;
use pipeworks::config;
use pipeworks::engine::Manager;
use pipeworks::logger::{self, CliFormat};
use pipeworks::signals;

// Exit codes of the engine binary.
const EXIT_SUCCESS: u8 = 0;
const EXIT_UNHANDLED: u8 = 100;
const EXIT_SYNTAX: u8 = 101;
const EXIT_CONFIG_FAILURE: u8 = 102;
const EXIT_MANAGER_FAILURE: u8 = 103;

/// Run a block graph described by a configuration file.
#[derive(Debug, Parser)]
#[command(
    name = "pipeworks",
    version,
    disable_version_flag = true,
    about = "Configurable in-process dataflow engine"
)]
struct Cli {
    /// Select the format of the CLI output.
    #[arg(long = "cli-format", value_enum, default_value_t = CliFormat::Human)]
    cli_format: CliFormat,

    /// Print version information.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// Configuration file describing the block graph.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(error)
            if matches!(
                error.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = error.print();
            return ExitCode::from(EXIT_SUCCESS);
        }
        Err(error) => {
            let _ = error.print();
            return ExitCode::from(EXIT_SYNTAX);
        }
    };

    logger::init(cli.cli_format);

    // A panic anywhere in the engine must surface as the dedicated exit
    // code, not as a killed runtime.
    let engine = tokio::spawn(run_engine(cli));
    match engine.await {
        Ok(code) => ExitCode::from(code),
        Err(error) => {
            tracing::error!(%error, "unsupported error");
            ExitCode::from(EXIT_UNHANDLED)
        }
    }
}

async fn run_engine(cli: Cli) -> u8 {
    tracing::info!("the engine is starting");

    let config = match config::load_config(&cli.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "failed to read the config file");
            return EXIT_CONFIG_FAILURE;
        }
    };

    let mut manager = Manager::new();
    for module in blocks::builtin_modules() {
        manager.add_module(module);
    }

    if let Err(error) = manager.initialize(&config).await {
        tracing::error!(%error, "failed to initialize the manager");
        return EXIT_MANAGER_FAILURE;
    }

    signals::spawn_shutdown_watcher(manager.shutdown_handle());
    manager.run().await;

    tracing::info!("the engine is stopped");
    EXIT_SUCCESS
}
