use serde::Serialize;

use crate::config::PublicAppConfig;
use crate::service::ServiceStatus;
use crate::store::StoreSnapshot;

#[derive(Debug, Clone, Serialize)]
pub struct AppHealth {
    pub version: &'static str,
    pub service: ServiceStatus,
    pub config: PublicAppConfig,
    pub store: StoreSnapshot,
    pub map_ready: bool,
    pub marker_count: usize,
}

impl AppHealth {
    pub fn new(
        service: ServiceStatus,
        config: PublicAppConfig,
        store: StoreSnapshot,
        map_ready: bool,
        marker_count: usize,
    ) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION"),
            service,
            config,
            store,
            map_ready,
            marker_count,
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "maps={} ready={} corrupted={} history={} markers={}",
            self.service.state,
            self.service.is_ready,
            self.service.corrupted,
            self.store.history,
            self.marker_count
        )
    }
}
