//! Ferry Bridge Service
//!
//! Runs two things in one process:
//! - the relay, which watches `TransferInitiated` on each chain and submits
//!   `fulfill` on the other
//! - the attestation API, which signs verified transfer claims for the
//!   receipt NFT
//!
//! A malformed RPC URL or relayer key keeps the relay from starting but the
//! API still serves whichever chains could be set up.

use std::sync::Arc;

use alloy::primitives::Address;
use eyre::{Result, WrapErr};
use tokio::sync::{mpsc, RwLock};
use tracing::{error, info, warn};

use ferry::api::{self, AppState};
use ferry::attestation::{AttestationSigner, AttestationVerifier, VerifierSettings};
use ferry::clock::TokioClock;
use ferry::config::{ChainConfig, Config};
use ferry::db::{MemoryReplayGuard, PgReplayGuard, ReplayGuard};
use ferry::ledger::{ChainEndpoint, EvmLedger, EvmSubmitter, FulfillmentSubmitter};
use ferry::metrics::Metrics;
use ferry::relay::{RelaySettings, Relayer, RetryPolicy, Route, SharedRelayStats};
use ferry::tracker::DeliveryTracker;

fn main() -> Result<()> {
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    init_logging();

    info!("Starting Ferry Bridge service");

    let config = Config::load()?;
    info!(
        chain_a = config.chain_a.chain_id,
        chain_b = config.chain_b.chain_id,
        scheme = %config.message_id_scheme,
        relay_enabled = config.relay.enabled,
        "Configuration loaded"
    );

    let metrics = Arc::new(Metrics::new());

    let guard: Arc<dyn ReplayGuard> = match &config.database {
        Some(db) => {
            let pg = PgReplayGuard::connect(&db.url).await?;
            info!("Replay guard: postgres");
            Arc::new(pg)
        }
        None => {
            warn!("DATABASE_URL not set; replay guard is in-memory and does not survive restarts");
            Arc::new(MemoryReplayGuard::new())
        }
    };

    let endpoint_a = build_endpoint(&config.chain_a);
    let endpoint_b = build_endpoint(&config.chain_b);

    let verifier = build_verifier(&config, &endpoint_a, &endpoint_b, guard)?;

    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

    let mut relay_stats: Option<SharedRelayStats> = None;
    let mut relay_task = None;
    match (&endpoint_a, &endpoint_b) {
        _ if !config.relay.enabled => info!("Relay disabled by RELAY_ENABLED"),
        (Some(a), Some(b)) => {
            match build_relayer(&config, a.clone(), b.clone(), Arc::clone(&metrics)) {
                Ok(relayer) => {
                    let stats: SharedRelayStats = Arc::new(RwLock::new(Default::default()));
                    let mut relayer = relayer.with_stats(Arc::clone(&stats));
                    relay_stats = Some(stats);
                    relay_task =
                        Some(tokio::spawn(async move { relayer.run(shutdown_rx).await }));
                }
                Err(e) => error!(error = %format!("{:#}", e), "Relay not started"),
            }
        }
        _ => error!("Relay not started: a chain endpoint could not be initialized"),
    }

    let state = AppState::new(Arc::new(verifier), Arc::clone(&metrics), relay_stats);
    let bind_address = config.api.bind_address.clone();
    let port = config.api.port;

    tokio::select! {
        result = api::start_server(&bind_address, port, state) => {
            if let Err(e) = result {
                error!(error = %e, "API server error");
            }
        }
        _ = wait_for_shutdown_signal() => {}
    }

    let _ = shutdown_tx.send(()).await;
    if let Some(task) = relay_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Relay error"),
            Err(e) => error!(error = %e, "Relay task panicked"),
        }
    }

    info!("Ferry Bridge service stopped");
    Ok(())
}

/// `None` when the RPC URL or contract address is unusable; logged here.
fn build_endpoint(chain: &ChainConfig) -> Option<ChainEndpoint> {
    let contract: Address = match chain.ferry_address.parse() {
        Ok(addr) => addr,
        Err(e) => {
            error!(chain = chain.chain_id, error = %e, "Invalid Ferry address");
            return None;
        }
    };

    match EvmLedger::new(&chain.rpc_url) {
        Ok(ledger) => Some(ChainEndpoint {
            chain_id: chain.chain_id,
            contract,
            ledger: Arc::new(ledger),
        }),
        Err(e) => {
            error!(chain = chain.chain_id, error = %e, "Failed to initialize chain ledger");
            None
        }
    }
}

fn build_verifier(
    config: &Config,
    endpoint_a: &Option<ChainEndpoint>,
    endpoint_b: &Option<ChainEndpoint>,
    guard: Arc<dyn ReplayGuard>,
) -> Result<AttestationVerifier> {
    let settings = VerifierSettings {
        scheme: config.message_id_scheme,
        timestamp_tolerance_secs: config.attestation.timestamp_tolerance_secs,
    };
    let mut verifier = AttestationVerifier::new(settings, guard);

    verifier = match (endpoint_a, endpoint_b) {
        (Some(a), Some(b)) => verifier.with_pair(a.clone(), b.clone()),
        (Some(a), None) => verifier.with_source(a.clone(), config.chain_b.chain_id),
        (None, Some(b)) => verifier.with_source(b.clone(), config.chain_a.chain_id),
        (None, None) => verifier,
    };

    match (
        &config.attestation.private_key,
        &config.attestation.nft_contract_address,
    ) {
        (Some(key), Some(nft)) => {
            let nft: Address = nft.parse().wrap_err("Invalid NFT_CONTRACT_ADDRESS")?;
            let signer = AttestationSigner::new(key, config.attestation.nft_chain_id, nft)?;
            info!(
                signer = %signer.address(),
                nft_contract = %nft,
                nft_chain_id = config.attestation.nft_chain_id,
                "Attestation signing enabled"
            );
            verifier = verifier.with_signer(signer);
        }
        (None, _) => warn!("ATTESTATION_PRIVATE_KEY not set; /attest will answer 503"),
        (_, None) => warn!("NFT_CONTRACT_ADDRESS not set; /attest will answer 503"),
    }

    Ok(verifier)
}

fn build_relayer(
    config: &Config,
    a: ChainEndpoint,
    b: ChainEndpoint,
    metrics: Arc<Metrics>,
) -> Result<Relayer> {
    let submitter_for = |chain: &ChainConfig| -> Result<Option<Arc<dyn FulfillmentSubmitter>>> {
        match &config.relay.private_key {
            Some(key) => {
                let submitter = EvmSubmitter::new(&chain.rpc_url, key)
                    .wrap_err_with(|| format!("Failed to set up submitter for chain {}", chain.chain_id))?;
                Ok(Some(Arc::new(submitter)))
            }
            None => Ok(None),
        }
    };

    let routes = vec![
        Route {
            source: a.clone(),
            destination: b.clone(),
            submitter: submitter_for(&config.chain_b)?,
        },
        Route {
            source: b,
            destination: a,
            submitter: submitter_for(&config.chain_a)?,
        },
    ];

    let settings = RelaySettings {
        scheme: config.message_id_scheme,
        window: config.relay.lookback_blocks,
        poll_interval: config.relay.poll_interval(),
        retry: RetryPolicy::default(),
    };

    Ok(Relayer::new(
        routes,
        settings,
        DeliveryTracker::new(),
        metrics,
        Arc::new(TokioClock::new()),
    ))
}

/// Initialize tracing/logging with structured output.
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,ferry=debug,ferry_bridge=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
