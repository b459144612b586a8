//! Frontend notification
//!
//! Pushes snapshot advancement outward to query frontends. Registered as a
//! persistent snapshot listener, so every published advancement (and the
//! current value at registration) fans out to every frontend on its own
//! dispatch thread. The new schema rides along whenever the ddl snapshot
//! moved past what a frontend last saw.

use crate::schema::SchemaManager;
use dashmap::DashMap;
use lattice_core::contract::FrontendClient;
use lattice_core::{FrontendId, SnapshotInfo};
use lattice_snapshot::{fire_and_forget, SnapshotListener};
use std::sync::Arc;
use tracing::{debug, warn};

/// Pushes snapshot-advanced and schema-changed events to every frontend,
/// tracking per-frontend acknowledgement.
pub struct FrontendNotifier {
    frontends: Vec<Arc<dyn FrontendClient>>,
    schema: Arc<SchemaManager>,
    /// Last snapshot id each frontend acknowledged receiving.
    acked: Arc<DashMap<FrontendId, u64>>,
    /// Last ddl snapshot id whose schema was delivered per frontend.
    schema_sent: Arc<DashMap<FrontendId, u64>>,
}

impl FrontendNotifier {
    /// Create a notifier over the given frontend clients.
    pub fn new(frontends: Vec<Arc<dyn FrontendClient>>, schema: Arc<SchemaManager>) -> Self {
        FrontendNotifier {
            frontends,
            schema,
            acked: Arc::new(DashMap::new()),
            schema_sent: Arc::new(DashMap::new()),
        }
    }

    /// The last snapshot id `frontend_id` acknowledged, if it ever has.
    pub fn acknowledged(&self, frontend_id: FrontendId) -> Option<u64> {
        self.acked.get(&frontend_id).map(|entry| *entry.value())
    }
}

impl SnapshotListener for FrontendNotifier {
    fn on_snapshot_advanced(&self, info: SnapshotInfo) {
        for (index, client) in self.frontends.iter().enumerate() {
            let frontend_id = index as FrontendId;
            let delivered_ddl = self
                .schema_sent
                .get(&frontend_id)
                .map(|entry| *entry.value())
                .unwrap_or(0);
            let schema = if info.ddl_snapshot_id > delivered_ddl {
                Some(self.schema.graph_def())
            } else {
                None
            };

            let client = Arc::clone(client);
            let acked = Arc::clone(&self.acked);
            let schema_sent = Arc::clone(&self.schema_sent);
            fire_and_forget(&format!("frontend-{}", frontend_id), move || {
                match client.advance_query_snapshot(info, schema.as_deref()) {
                    Ok(previous) => {
                        debug!(frontend = frontend_id, snapshot = %info, previous, "frontend advanced");
                        acked.insert(frontend_id, info.snapshot_id);
                        if schema.is_some() {
                            schema_sent.insert(frontend_id, info.ddl_snapshot_id);
                        }
                    }
                    Err(e) => {
                        warn!(frontend = frontend_id, snapshot = %info, error = %e, "frontend advance failed")
                    }
                }
            });
        }
    }
}
