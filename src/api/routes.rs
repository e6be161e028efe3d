//! HTTP route table for the data source subsystem's external interface
//! (spec §6.3): `/datasource/...` for source CRUD/inspection and
//! `/phy/...` for scan-report injection.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};

pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/datasource/all_sources", get(handlers::all_sources))
        .route("/datasource/probe_source", post(handlers::probe_source))
        .route("/datasource/add_source", post(handlers::add_source))
        .route("/datasource/list_interfaces", get(handlers::list_interfaces))
        .route("/datasource/by-uuid/{uuid}/source.json", get(handlers::get_source))
        .route("/datasource/by-uuid/{uuid}/source.rrd", get(handlers::get_source_rrd))
        .route("/datasource/by-uuid/{uuid}/set_channel", post(handlers::set_channel))
        .route("/datasource/by-uuid/{uuid}/set_hop", post(handlers::set_hop))
        .route("/datasource/by-uuid/{uuid}/close", post(handlers::close_source))
        .route("/datasource/by-uuid/{uuid}/pause", post(handlers::pause_source))
        .route("/datasource/by-uuid/{uuid}/resume", post(handlers::resume_source))
        .route("/phy/phy80211/scan/scan_report", post(handlers::scan_report))
        .route("/phy/phybluetooth/scan/scan_report", post(handlers::scan_report))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::DriverRegistry;
    use crate::hop::HopScheduler;
    use crate::packetchain::BoundedPacketChain;
    use crate::tracker::SourceTracker;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn init_test_config() {
        let _ = crate::config::init(crate::config::DatasourceConfig::default());
    }

    fn test_state() -> ApiState {
        let drivers = Arc::new(DriverRegistry::with_builtin_drivers());
        let hop = Arc::new(HopScheduler::new());
        let (chain, _rx) = BoundedPacketChain::new();
        let chain: Arc<dyn crate::packetchain::PacketChain> = Arc::new(chain);
        let tracker = Arc::new(SourceTracker::new(drivers, hop, Arc::clone(&chain)));
        ApiState { tracker, chain }
    }

    #[tokio::test]
    async fn all_sources_starts_empty() {
        init_test_config();
        let app = api_routes(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/datasource/all_sources")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn add_source_returns_uuid() {
        init_test_config();
        let app = api_routes(test_state());
        let body = serde_json::to_vec(&serde_json::json!({ "definition": "scan0" })).unwrap();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/datasource/add_source")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_source_returns_404() {
        init_test_config();
        let app = api_routes(test_state());
        let uuid = uuid::Uuid::new_v4();
        let response = app
            .oneshot(
                Request::builder()
                    .uri(format!("/datasource/by-uuid/{uuid}/source.json"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
