//! Demo TCP message server: streams a file to every connected client in
//! fixed-size blocks at a configured cadence. Useful for feeding a
//! `tcp-client` source without real hardware.

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::error::ErrorKind;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pipeworks::logger::{self, CliFormat};
use pipeworks::signals;

const EXIT_SUCCESS: u8 = 0;
const EXIT_SYNTAX: u8 = 101;
const EXIT_FAILURE: u8 = 102;

/// Stream a file to connected TCP clients block by block.
#[derive(Debug, Parser)]
#[command(
    name = "pipeworks-msg-server",
    version,
    disable_version_flag = true,
    about = "Demo TCP message server"
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1")]
    address: IpAddr,

    /// Port to listen on.
    #[arg(long, default_value_t = 4000)]
    port: u16,

    /// Seconds between two blocks.
    #[arg(long, default_value_t = 1.0)]
    delay: f64,

    /// Bytes sent per block.
    #[arg(long = "block-size", default_value_t = 32)]
    block_size: usize,

    /// Reopen the file once the end is reached.
    #[arg(
        long = "loop",
        default_value_t = false,
        action = clap::ArgAction::Set,
        num_args = 1
    )]
    replay: bool,

    /// Select the format of the CLI output.
    #[arg(long = "cli-format", value_enum, default_value_t = CliFormat::Human)]
    cli_format: CliFormat,

    /// Print version information.
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,

    /// File streamed to the clients.
    file: PathBuf,
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

    match serve(cli).await {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(error) => {
            tracing::error!(%error, "server failed");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

async fn serve(cli: Cli) -> std::io::Result<()> {
    if cli.block_size == 0 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "block size shall be at least 1",
        ));
    }

    let listener = TcpListener::bind((cli.address, cli.port)).await?;
    let local = listener.local_addr()?;
    tracing::info!("listening on {}:{}", local.ip(), local.port());

    let mut file = tokio::fs::File::open(&cli.file).await?;
    let mut buffer = vec![0u8; cli.block_size];
    let mut clients: Vec<(std::net::SocketAddr, TcpStream)> = Vec::new();

    let delay = Duration::from_secs_f64(cli.delay.max(0.001));
    let mut cadence = tokio::time::interval_at(tokio::time::Instant::now() + delay, delay);
    cadence.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    let shutdown = signals::wait_for_termination();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("termination signal received, shutting down");
                return Ok(());
            }
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                tracing::info!("new connection from {}", peer);
                // The cadence goes unpolled while nobody is connected, so
                // its next deadline may already be in the past. Restart it,
                // or the first client would receive a block immediately
                // instead of one full delay after connecting.
                if clients.is_empty() {
                    cadence.reset();
                }
                clients.push((peer, socket));
            }
            // The cadence only matters while someone is listening.
            _ = cadence.tick(), if !clients.is_empty() => {
                let mut read = file.read(&mut buffer).await?;
                if read == 0 {
                    if cli.replay {
                        tracing::info!("end of file reached, reopening the file");
                        file.rewind().await?;
                        read = file.read(&mut buffer).await?;
                    }
                    if read == 0 {
                        tracing::info!("end of file reached, shutting down the server");
                        return Ok(());
                    }
                }

                let block = &buffer[..read];
                let mut alive = Vec::with_capacity(clients.len());
                for (peer, mut socket) in clients.drain(..) {
                    match socket.write_all(block).await {
                        Ok(()) => alive.push((peer, socket)),
                        Err(error) => {
                            tracing::warn!("dropping client {}: {}", peer, error);
                        }
                    }
                }
                clients = alive;
            }
        }
    }
}
