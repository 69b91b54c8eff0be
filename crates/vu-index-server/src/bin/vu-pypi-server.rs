use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{ArgAction, Parser};
use owo_colors::OwoColorize;
use tokio::net::TcpListener;
use tracing::debug;
use url::Url;

use vu_index_server::{Fallback, IndexServer, PackageIndex};
use vu_logging::{Level, setup_logging};

/// Serve directories of Python package archives as a simple index.
///
/// Accepts the subset of `pypi-server` options used by the venv-update test suite.
#[derive(Parser, Debug)]
#[command(name = "vu-pypi-server", version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// The interface to listen on.
    #[arg(short, long, default_value = "0.0.0.0")]
    interface: IpAddr,

    /// The port to listen on.
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Where to redirect requests for projects that are not available locally.
    #[arg(long, default_value = "https://pypi.org/simple/")]
    fallback_url: Url,

    /// Answer `404 Not Found` for projects that are not available locally.
    #[arg(long)]
    disable_fallback: bool,

    /// Directories containing package archives.
    #[arg(required = true)]
    package_directories: Vec<PathBuf>,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let index = PackageIndex::from_directories(&cli.package_directories)?;
    if index.is_empty() {
        debug!("No archives found, serving an empty index");
    }

    let fallback = if cli.disable_fallback {
        Fallback::Disabled
    } else {
        Fallback::Redirect(cli.fallback_url)
    };

    let listener = TcpListener::bind((cli.interface, cli.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", cli.interface, cli.port))?;

    IndexServer::new(index, fallback)
        .serve(listener, shutdown_signal())
        .await?;
    Ok(())
}

/// Resolves on `SIGTERM` or `Ctrl-C`, whichever comes first.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term_signal) => {
                tokio::select! {
                    _ = term_signal.recv() => {},
                    _ = tokio::signal::ctrl_c() => {},
                }
            }
            Err(err) => {
                debug!("Failed to install SIGTERM handler: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose > 0 {
        Level::Verbose
    } else {
        Level::Default
    };

    let result = setup_logging(level).and_then(|()| {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to initialize the async runtime")?
            .block_on(run(cli))
    });

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let mut causes = err.chain();
            if let Some(error) = causes.next() {
                anstream::eprintln!("{}: {}", "error".red().bold(), error);
            }
            for cause in causes {
                anstream::eprintln!("  {}: {}", "Caused by".red().bold(), cause);
            }
            ExitCode::FAILURE
        }
    }
}
