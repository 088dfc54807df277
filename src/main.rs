//! Entry point: load configuration, initialise tracing, construct the chain client, run the
//! orchestrator's startup sequence, and block on SIGINT for graceful shutdown (§4.8, §6).
//! Same shape as the teacher's `proof-service` binary: tracing init -> construct services ->
//! serve -> block.

use std::process::ExitCode;
use std::sync::Arc;

use ethers::signers::{LocalWallet, Signer};
use tracing::{error, info};

use script_gamemaster::chain::EthersChainClient;
use script_gamemaster::config::Config;
use script_gamemaster::orchestrator::Orchestrator;
use script_gamemaster::store::ArtifactStore;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "fatal initialisation error");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!(contract = %config.contract_address, chain_id = config.chain_id, "starting gamemaster");

    let wallet: LocalWallet = config
        .privkey
        .parse::<LocalWallet>()
        .map_err(|e| anyhow::anyhow!("invalid PRIVKEY: {e}"))?
        .with_chain_id(config.chain_id);
    let gamemaster_address = wallet.address();

    let chain = Arc::new(EthersChainClient::new(
        &config.rpc_url,
        config.contract_address,
        &config.privkey,
        config.chain_id,
    )?);
    let store = Arc::new(ArtifactStore::new("./gamemaster-data")?);
    let config = Arc::new(config);

    let orchestrator = Orchestrator::new(chain, store, config);
    orchestrator.discover_existing_games(gamemaster_address).await?;
    info!("startup sequence complete, entering main loop");

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(()).await;
        }
    });

    orchestrator.run(shutdown_rx).await;
    info!("shutdown complete");
    Ok(())
}
