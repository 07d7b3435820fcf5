//! `signage`: keeps a local media directory in sync with an object store and
//! publishes the playable inventory.

mod cli;
mod logging;

use crate::cli::{Cli, Command};
use clap::Parser;
use miette::{IntoDiagnostic, WrapErr, miette};
use signage_config::{Config, Remote};
use signage_library::{Context, Library, Scheduler, SyncState};
use signage_storage::BackendHandle;
use signage_storage::backend::{LocalBackend, S3Backend};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let config = Config::load(cli.config.as_deref()).map_err(|e| miette!("{e:?}")).wrap_err("loading configuration")?;
    tracing::debug!(
        media_dir = %config.media_dir.display(),
        url_prefix = %config.url_prefix,
        port = config.port,
        interval_minutes = config.sync_interval_minutes,
        "Configuration loaded"
    );
    tokio::fs::create_dir_all(&config.media_dir)
        .await
        .into_diagnostic()
        .wrap_err_with(|| format!("creating media directory {}", config.media_dir.display()))?;
    let remote = match config.remote() {
        Some(remote) => Some(backend(remote).await?),
        None => {
            tracing::warn!("No remote store configured; sync disabled");
            None
        },
    };
    let library = Arc::new(Library::new(Context::new(&config.media_dir, &config.url_prefix), remote));

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(library, &config).await,
        Command::Scan => {
            let inventory = library.rescan_local().await.map_err(|e| miette!("{e:?}"))?;
            let json = serde_json::to_string_pretty(&inventory.to_response()).into_diagnostic()?;
            println!("{json}");
            Ok(())
        },
        Command::Sync => {
            if let Err(err) = library.adopt_baseline().await {
                tracing::warn!(error = ?err, "Initial scan failed; no local files will be deleted");
            }
            let report = library.sync_now().await.map_err(|e| miette!("{e:?}"))?;
            let json = serde_json::to_string_pretty(&report).into_diagnostic()?;
            println!("{json}");
            Ok(())
        },
    }
}

async fn run(library: Arc<Library>, config: &Config) -> miette::Result<()> {
    if let Err(err) = library.adopt_baseline().await {
        tracing::warn!(error = ?err, "Initial scan failed");
    }
    let shutdown = CancellationToken::new();
    let scheduler = library.has_remote().then(|| {
        let scheduler = Scheduler::new(library.clone(), config.sync_interval());
        let state = scheduler.subscribe();
        (state, tokio::spawn(scheduler.run(shutdown.clone())))
    });

    tokio::signal::ctrl_c().await.into_diagnostic().wrap_err("waiting for shutdown signal")?;
    tracing::info!("Shutting down");
    shutdown.cancel();
    if let Some((state, task)) = scheduler {
        if *state.borrow() == SyncState::Cycling {
            tracing::info!("Waiting for the running sync cycle to finish");
        }
        task.await.into_diagnostic()?;
    }
    Ok(())
}

async fn backend(remote: Remote) -> miette::Result<BackendHandle> {
    let handle: BackendHandle = match remote {
        Remote::S3 {
            bucket,
            region,
            prefix,
            endpoint,
            key_id,
            key_secret,
        } => {
            tracing::info!(bucket = %bucket, region = %region, "Using S3 remote");
            let backend = S3Backend::new("s3", bucket, prefix, region, endpoint, key_id, key_secret)
                .await
                .map_err(|e| miette!("{e:?}"))?;
            Arc::new(backend)
        },
        Remote::Directory(dir) => {
            tracing::info!(path = %dir.display(), "Using directory remote");
            Arc::new(LocalBackend::new("mirror", &dir).map_err(|e| miette!("{e:?}"))?)
        },
    };
    Ok(handle)
}
