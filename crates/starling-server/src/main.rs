//! starlingd entry point
//!
//! Wires the fabric to its collaborators: environment configuration, the
//! mesh connector (optionally with an embedded broker), TLS, the WebSocket
//! listener, the probe endpoint, and the signal-driven lifecycle.

mod config;
mod probe;
mod tls;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, info};

use starling_core::echo_auth_hook;
use starling_fabric::{DEFAULT_CONNS_LOG, FabricConfig, RealmRegistry, dump_connection_counts, dump_state};
use starling_mesh::{MeshBroker, MeshConnector, TcpMeshConnector};

use crate::config::ServerConfig;

const PID_FILE: &str = "./starlingd.pid";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::path::Path::new(".env").exists() {
        dotenvy::from_filename(".env").context("loading .env")?;
    }

    let config = ServerConfig::from_env()?;
    init_tracing(config.debug);
    if config.debug {
        debug!("verbose logging enabled");
    }

    // The embedded broker binds first so this node's own links (and any
    // peer node pointed at us) find it listening.
    if config.with_mesh_broker {
        let credential = Some(config.mesh_credential.clone()).filter(|c| !c.is_empty());
        let broker = MeshBroker::new(credential);
        broker
            .bind(&config.mesh_broker)
            .await
            .context("starting embedded mesh broker")?;
    } else {
        debug!("skipping embedded mesh broker");
    }

    let connector: Arc<dyn MeshConnector> =
        Arc::new(TcpMeshConnector::new(config.mesh_broker.clone()));
    let fabric = FabricConfig::new(config.mesh_id.clone())
        .with_link_prefixes(&config.mesh_sender_prefix, &config.mesh_receiver_prefix);
    let registry = Arc::new(RealmRegistry::new(fabric, connector));

    let tls = Arc::new(tls::load_tls(&config.cert_file, &config.key_file)?);

    let auth = echo_auth_hook(config.mesh_credential.clone());
    let listener = ws::listen_and_serve(config.listen_addr(), tls, registry.clone(), auth);
    tokio::spawn(async move {
        if let Err(e) = listener.await {
            error!(error = %e, "client listener failed");
        }
    });
    tokio::spawn(async {
        if let Err(e) = probe::serve(probe::PROBE_PORT).await {
            error!(error = %e, "probe server failed");
        }
    });

    std::fs::write(PID_FILE, std::process::id().to_string()).context("writing pid file")?;
    info!(
        pid = std::process::id(),
        domain = %config.domain,
        port = config.port,
        mesh_id = %config.mesh_id,
        "starlingd running"
    );

    run_signal_loop(&registry).await;
    info!("shutting down");
    Ok(())
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Block until shutdown is requested. SIGUSR1 triggers the diagnostics
/// dump without disturbing traffic.
#[cfg(unix)]
async fn run_signal_loop(registry: &RealmRegistry) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut usr1 = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "installing SIGUSR1 handler failed");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    let mut term = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "installing SIGTERM handler failed");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = term.recv() => break,
            _ = usr1.recv() => {
                dump_state(registry);
                if let Err(e) = dump_connection_counts(registry, DEFAULT_CONNS_LOG).await {
                    error!(error = %e, "writing connection counts failed");
                }
            }
        }
    }
}

#[cfg(not(unix))]
async fn run_signal_loop(_registry: &RealmRegistry) {
    let _ = tokio::signal::ctrl_c().await;
}
