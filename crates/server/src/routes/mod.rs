// crates/server/src/routes/mod.rs
//! API route handlers.

pub mod deployments;
pub mod health;
pub mod logs;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined API router.
///
/// Routes:
/// - `GET  /health`                  - Health check
/// - `POST /deployments`             - Create a deployment job
/// - `GET  /deployments/:id`         - Job snapshot
/// - `POST /deployments/:id/cancel`  - Cancel a job
/// - `GET  /deployments/:id/logs`    - SSE stream of masked job output
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(deployments::router())
        .merge(logs::router())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn api_routes_creation() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(Config::local(dir.path())).unwrap();
        let _router = api_routes(state);
    }
}
