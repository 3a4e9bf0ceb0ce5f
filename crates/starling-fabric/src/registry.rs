//! Process-wide realm registry

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;

use starling_mesh::{MeshConnector, MeshOptions};

use crate::error::FabricResult;
use crate::realm::Realm;

/// Identity and naming the registry needs when linking realms to the mesh
#[derive(Debug, Clone)]
pub struct FabricConfig {
    /// This node's identity in the mesh
    pub mesh_id: String,
    /// Prefix for the publishing identity of each realm's link
    pub sender_prefix: String,
    /// Prefix for the inbound identity of each realm's link
    pub receiver_prefix: String,
}

impl FabricConfig {
    /// Config with the default link identity prefixes
    pub fn new(mesh_id: impl Into<String>) -> Self {
        Self {
            mesh_id: mesh_id.into(),
            sender_prefix: "starling-sndr".into(),
            receiver_prefix: "starling-rcvr".into(),
        }
    }

    /// Override the link identity prefixes
    pub fn with_link_prefixes(
        mut self,
        sender_prefix: impl Into<String>,
        receiver_prefix: impl Into<String>,
    ) -> Self {
        self.sender_prefix = sender_prefix.into();
        self.receiver_prefix = receiver_prefix.into();
        self
    }
}

/// Process-wide index of realms by application id.
///
/// Realms are created lazily on first use and retained for the life of
/// the process. Creation links the new realm to the mesh exactly once;
/// concurrent callers for the same application all receive the same realm.
pub struct RealmRegistry {
    config: FabricConfig,
    connector: Arc<dyn MeshConnector>,
    realms: DashMap<String, Arc<Realm>>,
    create_lock: TokioMutex<()>,
}

impl RealmRegistry {
    /// Create an empty registry over a mesh connector
    pub fn new(config: FabricConfig, connector: Arc<dyn MeshConnector>) -> Self {
        Self {
            config,
            connector,
            realms: DashMap::new(),
            create_lock: TokioMutex::new(()),
        }
    }

    /// This node's mesh identity
    pub fn mesh_id(&self) -> &str {
        &self.config.mesh_id
    }

    /// Look up a realm without creating it
    pub fn find(&self, app_id: &str) -> Option<Arc<Realm>> {
        self.realms.get(app_id).map(|e| e.value().clone())
    }

    /// Snapshot of the current realms
    pub fn realms(&self) -> Vec<Arc<Realm>> {
        self.realms.iter().map(|e| e.value().clone()).collect()
    }

    /// Resolve or create the realm for an application.
    ///
    /// The credential is opaque to the fabric; it is handed to the mesh
    /// connector when the realm's link is established. A connect failure
    /// fails the creation and leaves no realm behind. Creations serialize
    /// behind one lock; the resolve fast path stays lock-free.
    pub async fn get_or_create(&self, app_id: &str, credential: &str) -> FabricResult<Arc<Realm>> {
        if let Some(realm) = self.find(app_id) {
            return Ok(realm);
        }

        let _guard = self.create_lock.lock().await;
        if let Some(realm) = self.find(app_id) {
            return Ok(realm);
        }

        let realm = Realm::new(app_id, &self.config.mesh_id);
        let opts = MeshOptions::new(
            format!("{}-{}", self.config.sender_prefix, app_id),
            format!("{}-{}", self.config.receiver_prefix, app_id),
            credential,
        );
        realm.connect_to_mesh(self.connector.as_ref(), opts).await?;

        self.realms.insert(app_id.to_string(), realm.clone());
        info!(realm = %app_id, mesh_id = %self.config.mesh_id, "realm created");
        Ok(realm)
    }
}
