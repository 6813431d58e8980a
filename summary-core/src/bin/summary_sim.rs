//! Summary election simulation
//!
//! Attaches several clients to one in-process quorum, then removes the
//! elected client one at a time and watches the summarizer role move.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use summary_core::coordinator::{
    ClientDetails, ClientId, LocalQuorum, SummaryManager, SummaryManagerConfig, SummaryManagerEvent,
    SummaryManagerHandle, SummaryManagerState,
};
use summary_core::worker::MockSummarizerFactory;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

struct SimClient {
    client_id: ClientId,
    handle: SummaryManagerHandle,
    factory: Arc<MockSummarizerFactory>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting summary election simulation");

    // Load configuration from environment
    let num_clients: usize = env_or("SIM_CLIENTS", 3);
    let spawn_failures: usize = env_or("SIM_SPAWN_FAILURES", 0);
    let config = SummaryManagerConfig {
        summaries_enabled: env_or("SUMMARIES_ENABLED", true),
        initial_delay: Duration::from_millis(env_or(
            "SUMMARY_INITIAL_DELAY_MS",
            summary_core::DEFAULT_INITIAL_DELAY_MS,
        )),
        ops_to_bypass_initial_delay: env_or(
            "SUMMARY_OPS_TO_BYPASS_DELAY",
            summary_core::DEFAULT_OPS_TO_BYPASS_INITIAL_DELAY,
        ),
        ..Default::default()
    };
    let metrics_addr: SocketAddr = std::env::var("METRICS_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:9100".into())
        .parse()?;

    // Start Metrics API Server
    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(|| async { summary_core::metrics::gather_system_metrics() }))
            .layer(CorsLayer::permissive());

        info!("Metrics API listening on {}", metrics_addr);
        match tokio::net::TcpListener::bind(metrics_addr).await {
            Ok(listener) => {
                if let Err(e) = axum::serve(listener, app).await {
                    warn!("Metrics server error: {}", e);
                }
            }
            Err(e) => warn!("Failed to bind metrics server: {}", e),
        }
    });

    let quorum = Arc::new(LocalQuorum::new(0));
    let mut clients = Vec::with_capacity(num_clients);

    for _ in 0..num_clients {
        let client_id = ClientId::new(uuid::Uuid::new_v4().to_string());
        let factory = Arc::new(MockSummarizerFactory::new());
        factory.fail_next(spawn_failures);

        let handle = SummaryManager::spawn(config.clone(), quorum.clone(), quorum.clone(), factory.clone());
        let mut events = handle.subscribe();
        let label = client_id.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    SummaryManagerEvent::ElectedClientChanged(elected) => {
                        info!("[{}] elected summarizer client: {:?}", label, elected)
                    }
                    SummaryManagerEvent::Warning(warning) => {
                        warn!("[{}] {}", label, warning.message)
                    }
                }
            }
        });

        quorum.join(client_id.clone(), ClientDetails::interactive());
        handle.set_connected(client_id.clone())?;
        clients.push(SimClient {
            client_id,
            handle,
            factory,
        });
    }

    while !clients.is_empty() {
        let Some(leader) = clients.first() else { break };
        let status = tokio::time::timeout(
            config.initial_delay + Duration::from_secs(30),
            leader.handle.wait_for(|s| s.state == SummaryManagerState::Running),
        )
        .await;

        match status {
            Ok(Ok(status)) => info!(
                "{} is summarizing ({} clients, {} spawn attempts)",
                leader.client_id,
                status.tracked_clients,
                leader.factory.spawn_count()
            ),
            Ok(Err(e)) => error!("Manager for {} stopped: {}", leader.client_id, e),
            Err(_) => warn!("{} did not start a summarizer in time", leader.client_id),
        }

        let leader = clients.remove(0);
        info!("Client {} leaving", leader.client_id);
        leader.handle.set_disconnected()?;
        quorum.remove_member(&leader.client_id);
        leader.handle.dispose()?;
    }

    info!("Simulation complete");
    Ok(())
}
