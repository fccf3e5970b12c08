//! In-process stand-in for the operations dashboard the executor and poller talk to.
//!
//! Health reads `degraded` until any service is rolled back, then `healthy`,
//! which gives the demo a deterministic recovery.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use mend_core::context::Deployment;
use mend_core::recovery::HEALTHY;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub const DEGRADED: &str = "degraded";

#[derive(Clone, Debug, Serialize)]
pub struct Service {
    pub id: &'static str,
    pub name: &'static str,
}

pub const SERVICES: [Service; 2] = [
    Service {
        id: "checkout",
        name: "Checkout",
    },
    Service {
        id: "payments",
        name: "Payments",
    },
];

#[derive(Debug, Deserialize)]
pub struct RollbackRequest {
    pub to_version: String,
}

/// Shared demo state. Cloning shares it.
#[derive(Clone, Default)]
pub struct DemoState {
    rolled_back: Arc<Mutex<Option<String>>>,
}

impl DemoState {
    pub fn health(&self) -> &'static str {
        match self.rolled_back.lock() {
            Ok(guard) if guard.is_some() => HEALTHY,
            _ => DEGRADED,
        }
    }

    fn rollback(&self, to_version: &str) {
        if let Ok(mut guard) = self.rolled_back.lock() {
            *guard = Some(to_version.to_string());
        }
    }

    pub fn reset(&self) {
        if let Ok(mut guard) = self.rolled_back.lock() {
            *guard = None;
        }
    }
}

pub fn deployments(service_id: &str) -> Option<Vec<Deployment>> {
    let entry = |version: &str, timestamp: &str| Deployment {
        version: version.into(),
        timestamp: timestamp.into(),
        status: "deployed".into(),
    };
    match service_id {
        "checkout" => Some(vec![
            entry("v1.4.2", "2025-02-11T10:00:00Z"),
            entry("v1.4.1", "2025-02-11T09:30:00Z"),
        ]),
        "payments" => Some(vec![entry("v2.0.1", "2025-02-11T09:00:00Z")]),
        _ => None,
    }
}

pub fn dashboard_router(state: DemoState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/services", get(list_services))
        .route("/api/services/:id", get(service_detail))
        .route("/api/services/:id/deployments", get(service_deployments))
        .route("/api/services/:id/rollback", post(rollback))
        .route("/api/demo/reset", post(reset))
        .with_state(state)
}

async fn health(State(state): State<DemoState>) -> Json<Value> {
    Json(json!({ "status": state.health() }))
}

async fn list_services() -> Json<Value> {
    Json(json!({ "services": SERVICES }))
}

async fn service_detail(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let service = SERVICES
        .iter()
        .find(|s| s.id == id)
        .ok_or(StatusCode::NOT_FOUND)?;
    let deployments = deployments(&id).unwrap_or_default();
    Ok(Json(json!({
        "id": service.id,
        "name": service.name,
        "deployments": deployments,
    })))
}

async fn service_deployments(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    let deployments = deployments(&id).ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(json!({ "deployments": deployments })))
}

async fn rollback(
    State(state): State<DemoState>,
    Path(id): Path<String>,
    Json(req): Json<RollbackRequest>,
) -> Result<Json<Value>, StatusCode> {
    if !SERVICES.iter().any(|s| s.id == id) {
        return Err(StatusCode::NOT_FOUND);
    }
    state.rollback(&req.to_version);
    tracing::info!(service = %id, to_version = %req.to_version, "rollback executed");
    Ok(Json(json!({ "ok": true, "rolled_back_to": req.to_version })))
}

async fn reset(State(state): State<DemoState>) -> StatusCode {
    state.reset();
    StatusCode::NO_CONTENT
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    async fn call(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.expect("response");
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).expect("request")
    }

    fn rollback_req(service: &str) -> Request<Body> {
        Request::post(format!("/api/services/{service}/rollback"))
            .header("content-type", "application/json")
            .body(Body::from(r#"{"to_version":"v1.4.1"}"#))
            .expect("request")
    }

    #[tokio::test]
    async fn health_degraded_until_rollback() {
        let app = dashboard_router(DemoState::default());

        let (status, body) = call(&app, get_req("/api/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], DEGRADED);

        let (status, body) = call(&app, rollback_req("checkout")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rolled_back_to"], "v1.4.1");

        let (_, body) = call(&app, get_req("/api/health")).await;
        assert_eq!(body["status"], HEALTHY);

        let reset = Request::post("/api/demo/reset").body(Body::empty()).expect("request");
        let (status, _) = call(&app, reset).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (_, body) = call(&app, get_req("/api/health")).await;
        assert_eq!(body["status"], DEGRADED);
    }

    #[tokio::test]
    async fn services_and_deployments() {
        let app = dashboard_router(DemoState::default());

        let (_, body) = call(&app, get_req("/api/services")).await;
        let ids: Vec<&str> = body["services"]
            .as_array()
            .expect("services")
            .iter()
            .filter_map(|s| s["id"].as_str())
            .collect();
        assert_eq!(ids, vec!["checkout", "payments"]);

        let (status, body) = call(&app, get_req("/api/services/checkout")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Checkout");
        assert_eq!(body["deployments"][0]["version"], "v1.4.2");

        let (_, body) = call(&app, get_req("/api/services/payments/deployments")).await;
        assert_eq!(body["deployments"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn unknown_service_is_not_found() {
        let app = dashboard_router(DemoState::default());
        let (status, _) = call(&app, get_req("/api/services/ledger")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, get_req("/api/services/ledger/deployments")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, rollback_req("ledger")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, body) = call(&app, get_req("/api/health")).await;
        assert_eq!(body["status"], DEGRADED);
    }
}
