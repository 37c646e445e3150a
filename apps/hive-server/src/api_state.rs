//! Read-side snapshot routes: projections served as JSON, no event reads.

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use hive_kernel::BeadFilter;

use crate::app_state::AppState;
use crate::error_response;

pub(crate) async fn healthz(State(state): State<AppState>) -> Response {
    match state.kernel().latest_sequence(None) {
        Ok(seq) => Json(json!({
            "ok": true,
            "version": env!("CARGO_PKG_VERSION"),
            "latest_sequence": seq,
        }))
        .into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn state_agents(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Response {
    match state.kernel().list_agents(&project) {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn state_reservations(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Response {
    match state.kernel().active_reservations(&project) {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BeadQuery {
    status: Option<String>,
    #[serde(default)]
    include_deleted: bool,
}

pub(crate) async fn state_beads(
    State(state): State<AppState>,
    Path(project): Path<String>,
    Query(query): Query<BeadQuery>,
) -> Response {
    let status = match query.status.as_deref() {
        Some(raw) => match hive_kernel::BeadStatus::parse(raw) {
            Ok(status) => Some(status),
            Err(err) => return error_response(err),
        },
        None => None,
    };
    let filter = BeadFilter {
        status,
        include_deleted: query.include_deleted,
        ..Default::default()
    };
    match state.kernel().query_beads(&project, &filter) {
        Ok(items) => Json(json!({ "items": items })).into_response(),
        Err(err) => error_response(err),
    }
}

pub(crate) async fn state_stats(
    State(state): State<AppState>,
    Path(project): Path<String>,
) -> Response {
    let kernel = state.kernel();
    let events = match kernel.event_count(Some(&project)) {
        Ok(n) => n,
        Err(err) => return error_response(err),
    };
    let latest = match kernel.latest_sequence(Some(&project)) {
        Ok(n) => n,
        Err(err) => return error_response(err),
    };
    let memory = match kernel.memory_stats(&project) {
        Ok(stats) => stats,
        Err(err) => return error_response(err),
    };
    Json(json!({
        "events": events,
        "latest_sequence": latest,
        "memory": memory,
        "bus": kernel.bus().stats(),
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_state;
    use axum::http::StatusCode;
    use hive_kernel::{AgentSpec, CreateBeadOptions, ReserveOptions};

    async fn body_json(response: Response) -> serde_json::Value {
        let body = http_body_util::BodyExt::collect(response.into_body())
            .await
            .unwrap()
            .to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn healthz_reports_sequence() {
        let (state, _shutdown) = test_state();
        state.kernel().register_agent("p", "A", AgentSpec::default()).unwrap();
        let response = healthz(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["ok"], true);
        assert_eq!(json["latest_sequence"], 1);
    }

    #[tokio::test]
    async fn agent_snapshot_reflects_projection() {
        let (state, _shutdown) = test_state();
        state
            .kernel()
            .register_agent(
                "p",
                "W1",
                AgentSpec {
                    model: Some("opus".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        let response = state_agents(State(state), Path("p".into())).await;
        let json = body_json(response).await;
        assert_eq!(json["items"][0]["name"], "W1");
        assert_eq!(json["items"][0]["model"], "opus");
    }

    #[tokio::test]
    async fn reservation_snapshot_lists_active_claims() {
        let (state, _shutdown) = test_state();
        state
            .kernel()
            .reserve_files("p", "W", &["src/**".to_string()], ReserveOptions::default())
            .unwrap();
        let response = state_reservations(State(state), Path("p".into())).await;
        let json = body_json(response).await;
        assert_eq!(json["items"].as_array().unwrap().len(), 1);
        assert_eq!(json["items"][0]["path_pattern"], "src/**");
    }

    #[tokio::test]
    async fn bead_snapshot_filters_by_status() {
        let (state, _shutdown) = test_state();
        let kernel = state.kernel();
        kernel.create_bead("p", "open one", CreateBeadOptions::default()).unwrap();
        let closing = kernel
            .create_bead("p", "closed one", CreateBeadOptions::default())
            .unwrap();
        kernel.close_bead("p", &closing.id, None).unwrap();

        let response = state_beads(
            State(state),
            Path("p".into()),
            Query(BeadQuery {
                status: Some("open".into()),
                include_deleted: false,
            }),
        )
        .await;
        let json = body_json(response).await;
        let items = json["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["title"], "open one");
    }

    #[tokio::test]
    async fn unknown_status_is_a_400() {
        let (state, _shutdown) = test_state();
        let response = state_beads(
            State(state),
            Path("p".into()),
            Query(BeadQuery {
                status: Some("nonsense".into()),
                include_deleted: false,
            }),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
