use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use whitespace::server::{ServerState, router};
use whitespace::store::{DocumentStore, LocalFsDocumentStore, MemoryDocumentStore};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct StoreArgs {
    #[arg(long, default_value = "127.0.0.1:8787")]
    addr: SocketAddr,

    /// Directory holding the JSON documents.
    #[arg(long, default_value = "whitespace-data")]
    data_dir: PathBuf,

    /// Keep documents in memory only; `--data-dir` is ignored.
    #[arg(long)]
    memory: bool,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    if let Err(err) = try_main().await {
        eprintln!("{err:#}");
        return std::process::ExitCode::FAILURE;
    }
    std::process::ExitCode::SUCCESS
}

async fn try_main() -> anyhow::Result<()> {
    whitespace::logging::init("info")?;

    let args = StoreArgs::parse();
    tracing::info!(?args, "starting whitespace-store");

    let store: Arc<dyn DocumentStore> = if args.memory {
        tracing::info!("using in-memory document store");
        Arc::new(MemoryDocumentStore::new())
    } else {
        tracing::info!(data_dir = %args.data_dir.display(), "using local filesystem document store");
        Arc::new(LocalFsDocumentStore::new(args.data_dir.clone()))
    };
    let app = router(ServerState::new(store));

    let listener = tokio::net::TcpListener::bind(args.addr)
        .await
        .map_err(|err| anyhow::anyhow!("bind {}: {err}", args.addr))?;
    tracing::info!(addr = %args.addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(?err, "listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
