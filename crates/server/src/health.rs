use std::sync::Arc;

use agentdesk_agent::ToolRuntime;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

#[derive(Clone)]
pub struct HealthState {
    tools: Arc<ToolRuntime>,
    projects: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub tools: HealthCheck,
    pub checked_at: String,
}

pub fn router(tools: Arc<ToolRuntime>, projects: usize) -> Router {
    Router::new().route("/health", get(health)).with_state(HealthState { tools, projects })
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let tools = tools_check(&state.tools);
    let ready = tools.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: format!("agentdesk-server serving {} project(s)", state.projects),
        },
        tools,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

fn tools_check(tools: &ToolRuntime) -> HealthCheck {
    match tools.registry().len() {
        0 => HealthCheck { status: "degraded", detail: "no tools registered".to_string() },
        count => HealthCheck { status: "ready", detail: format!("{count} tool(s) registered") },
    }
}
