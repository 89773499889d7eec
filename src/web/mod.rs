//! Web server module.
//!
//! Public status endpoints plus the admin CRUD surface. Admin routes are
//! assumed to be auth-gated upstream of this process.

mod handlers;

pub use handlers::*;

use crate::config::Config;
use crate::db::Store;
use crate::notify::Notifier;

use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post, put},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub notifier: Arc<Notifier>,
}

/// Web server for Uptimer.
pub struct Server {
    state: AppState,
}

impl Server {
    pub fn new(config: Config, store: Store, notifier: Arc<Notifier>) -> Self {
        Self {
            state: AppState {
                config,
                store,
                notifier,
            },
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any);

        Router::new()
            // Public status surface
            .route("/status", get(handlers::handle_status))
            .route("/monitors/{id}/latency", get(handlers::handle_monitor_latency))
            .route("/monitors/{id}/uptime", get(handlers::handle_monitor_uptime))
            .route("/monitors/{id}/outages", get(handlers::handle_monitor_outages))
            .route("/analytics/uptime", get(handlers::handle_analytics_uptime))
            .route("/incidents", get(handlers::handle_list_incidents))
            .route("/maintenance-windows", get(handlers::handle_list_windows))
            // Admin: monitors
            .route("/api/monitors", get(handlers::handle_admin_list_monitors))
            .route("/api/monitors", post(handlers::handle_create_monitor))
            .route("/api/monitors/{id}", get(handlers::handle_get_monitor))
            .route("/api/monitors/{id}", put(handlers::handle_update_monitor))
            .route("/api/monitors/{id}/pause", post(handlers::handle_pause_monitor))
            .route("/api/monitors/{id}/resume", post(handlers::handle_resume_monitor))
            // Admin: notification channels
            .route("/api/channels", get(handlers::handle_list_channels))
            .route("/api/channels", post(handlers::handle_create_channel))
            .route("/api/channels/{id}", put(handlers::handle_update_channel))
            .route("/api/channels/{id}", delete(handlers::handle_delete_channel))
            .route("/api/channels/{id}/test", post(handlers::handle_test_channel))
            // Admin: incidents
            .route("/api/incidents", post(handlers::handle_create_incident))
            .route("/api/incidents/{id}", get(handlers::handle_get_incident))
            .route("/api/incidents/{id}", put(handlers::handle_update_incident))
            .route(
                "/api/incidents/{id}/updates",
                post(handlers::handle_add_incident_update),
            )
            // Admin: maintenance windows
            .route("/api/maintenance-windows", post(handlers::handle_create_window))
            .route("/api/maintenance-windows/{id}", put(handlers::handle_update_window))
            .route(
                "/api/maintenance-windows/{id}",
                delete(handlers::handle_delete_window),
            )
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.routes();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).await?;

        Ok(())
    }
}
