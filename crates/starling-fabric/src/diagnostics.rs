//! Read-only diagnostics over the realm registry
//!
//! Both operations traverse snapshots of the indices, so they are safe to
//! run while traffic flows. The server triggers them from its signal
//! handler.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::info;

use starling_core::split_scoped_name;

use crate::registry::RealmRegistry;

/// Default location of the connection counter log
pub const DEFAULT_CONNS_LOG: &str = "/tmp/conns.log";

/// One line of the connection counter log
#[derive(Debug, Serialize)]
struct ConnsRecord<'a> {
    timestamp: i64,
    conns: usize,
    app_id: &'a str,
    mesh_id: &'a str,
}

/// Log the full realm → channel → peer tree at info level
pub fn dump_state(registry: &RealmRegistry) {
    info!("state dump start --------");
    for realm in registry.realms() {
        info!(realm = %realm.id(), peers = realm.peer_count(), "realm");
        for channel in realm.channels() {
            info!(channel = %channel.name(), peers = channel.len(), "channel");
            for peer in channel.peers() {
                info!(sid = %peer.sid(), cid = %peer.cid(), "peer");
            }
        }
    }
    info!("state dump done --------");
}

/// Count connections per application and append one JSON line per nonzero
/// application to `path`.
///
/// The counter sums channel memberships, attributing each channel to the
/// application on the left of its scoped name. A peer joined to several
/// channels is counted once per channel.
pub async fn dump_connection_counts(
    registry: &RealmRegistry,
    path: impl AsRef<Path>,
) -> io::Result<()> {
    let mut counter: BTreeMap<String, usize> = BTreeMap::new();
    for realm in registry.realms() {
        for channel in realm.channels() {
            let (app_id, _) = split_scoped_name(channel.name());
            *counter.entry(app_id.to_string()).or_default() += channel.len();
        }
    }

    let timestamp = Utc::now().timestamp();
    let mut lines = String::new();
    for (app_id, conns) in &counter {
        if *conns == 0 {
            continue;
        }
        info!(app_id = %app_id, conns, "connection count");
        let record = ConnsRecord {
            timestamp,
            conns: *conns,
            app_id: app_id.as_str(),
            mesh_id: registry.mesh_id(),
        };
        lines.push_str(&serde_json::to_string(&record)?);
        lines.push('\n');
    }

    if lines.is_empty() {
        return Ok(());
    }

    let mut file = tokio::fs::OpenOptions::new()
        .append(true)
        .create(true)
        .open(path)
        .await?;
    file.write_all(lines.as_bytes()).await?;
    Ok(())
}
