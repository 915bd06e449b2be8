use std::{sync::Arc, time::Duration};

use storagedapp::{
    config::AppConfig,
    error::{AppError, AppResult},
    implementations::{
        gateway::ContractGateway, network::NetworkGuard, tracker::TransactionTracker,
    },
    layers::{
        rpc::{Outbound, RpcServer},
        session::SessionController,
    },
    wallet::{LocalKeyConnector, WalletSession},
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("fatal error: {err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> AppResult<()> {
    init_tracing();

    info!("loading configuration");
    let config = AppConfig::load()?;

    let (outbound, outbound_rx) = Outbound::channel();
    let guard = NetworkGuard::new(config.network.clone(), Arc::new(outbound.clone()));

    let connector_config = config.clone();
    let session = WalletSession::new(
        move || LocalKeyConnector::from_config(&connector_config),
        guard,
    );

    let gateway = ContractGateway::from_config(&config)?;
    info!(contract = %gateway.address(), network = %config.network, "contract gateway ready");

    let tracker = TransactionTracker::new(Duration::from_millis(config.poll_interval_ms));
    let controller = Arc::new(SessionController::new(
        session,
        gateway,
        tracker,
        config.initial_sentence.clone(),
    ));

    info!("connecting wallet");
    controller.bootstrap().await;

    info!("starting JSON-RPC stdio server");
    let server = RpcServer::new(controller, outbound, outbound_rx);
    tokio::select! {
        result = server.run_stdio() => result,
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| AppError::Io(format!("failed to listen for ctrl-c: {err}")))?;
            info!("interrupted, shutting down");
            Ok(())
        }
    }
}

// stdout carries the JSON-RPC stream, so logs go to stderr.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_line_number(true)
        .init();
}
