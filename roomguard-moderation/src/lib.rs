pub mod admin;
pub mod chat;
pub mod clock;
pub mod config;
pub mod display;
pub mod gate;
pub mod identity;
pub mod markers;
pub mod models;
pub mod moderation;
pub mod relay;
pub mod routes;
pub mod session;
pub mod store;

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use admin::AdminControl;
use chat::ChatService;
use clock::Clock;
use config::AppConfig;
use markers::SendMarkers;
use session::SessionGuard;
use store::DocumentStore;

pub struct AppState {
    pub config: AppConfig,
    pub docs: Arc<dyn DocumentStore>,
    pub chat: ChatService,
    pub admin: AdminControl,
    pub sessions: SessionGuard,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        docs: Arc<dyn DocumentStore>,
        markers: Arc<dyn SendMarkers>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            chat: ChatService::new(docs.clone(), markers, clock.clone()),
            admin: AdminControl::new(docs.clone(), clock),
            sessions: SessionGuard::new(docs.clone()),
            docs,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}
