use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;

use hygrostat_common::{
    HumidifierAttributes, HumidifierService, HygrostatError, HygrostatStatus, OperationMode,
    Preset,
};

use crate::host::{AppState, Hygrostat};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize)]
pub struct HygrostatView {
    #[serde(flatten)]
    status: HygrostatStatus,
    attributes: HumidifierAttributes,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/hygrostats", get(handle_list))
        .route("/api/hygrostats/{name}", get(handle_get))
        .route(
            "/api/hygrostats/{name}/services/{service}",
            post(handle_service),
        )
        .route("/api/hygrostats/{name}/humidity", post(handle_set_humidity))
        .route("/api/hygrostats/{name}/mode", post(handle_set_mode))
        .route("/api/hygrostats/{name}/preset", post(handle_set_preset))
        .with_state(state)
}

pub async fn view(hygrostat: &Hygrostat) -> HygrostatView {
    HygrostatView {
        status: hygrostat.status().await,
        attributes: hygrostat.attributes().await,
    }
}

async fn handle_list(State(state): State<AppState>) -> impl IntoResponse {
    let mut views = Vec::new();
    for hygrostat in state.hygrostats() {
        views.push(view(hygrostat).await);
    }
    Json(views)
}

async fn handle_get(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.hygrostat(&name) {
        Some(hygrostat) => Json(view(hygrostat).await).into_response(),
        None => not_found(&name),
    }
}

async fn handle_service(
    State(state): State<AppState>,
    Path((name, service)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    let Some(hygrostat) = state.hygrostat(&name) else {
        return not_found(&name);
    };

    let data = if body.iter().all(u8::is_ascii_whitespace) {
        Value::Object(Default::default())
    } else {
        match serde_json::from_slice::<Value>(&body) {
            Ok(data) => data,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body"),
        }
    };

    let result = match HumidifierService::from_call(&service, &data) {
        Ok(call) => hygrostat.dispatch(call).await,
        Err(err) => Err(err),
    };
    respond(&state, hygrostat, result).await
}

async fn handle_set_humidity(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(hygrostat) = state.hygrostat(&name) else {
        return not_found(&name);
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };
    let Ok(humidity) = value.trim().parse::<f32>() else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid humidity value");
    };

    let result = hygrostat.set_target_humidity(humidity).await;
    respond(&state, hygrostat, result).await
}

async fn handle_set_mode(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(hygrostat) = state.hygrostat(&name) else {
        return not_found(&name);
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let result = match value.parse::<OperationMode>() {
        Ok(mode) => hygrostat.set_mode(mode).await,
        Err(err) => Err(err),
    };
    respond(&state, hygrostat, result).await
}

async fn handle_set_preset(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let Some(hygrostat) = state.hygrostat(&name) else {
        return not_found(&name);
    };
    let Some(value) = params.get("value") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'value' parameter");
    };

    let result = match value.parse::<Preset>() {
        Ok(preset) => hygrostat.set_preset(preset).await,
        Err(err) => Err(err),
    };
    respond(&state, hygrostat, result).await
}

async fn respond(
    state: &AppState,
    hygrostat: &Hygrostat,
    result: Result<(), HygrostatError>,
) -> Response {
    match result {
        Ok(()) => {
            state.commit(hygrostat).await;
            Json(view(hygrostat).await).into_response()
        }
        Err(err) => error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

fn not_found(name: &str) -> Response {
    error_response(
        StatusCode::NOT_FOUND,
        &format!("Unknown hygrostat '{name}'"),
    )
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use hygrostat_common::HygrostatConfig;

    use super::*;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn test_state(test: &str) -> AppState {
        let config = HygrostatConfig {
            away_humidity: Some(35.0),
            initial_mode: Some(OperationMode::Humidify),
            ..HygrostatConfig::new("bathroom", "fan", "bathroom")
        };
        AppState::for_tests(test, vec![config])
    }

    #[tokio::test]
    async fn unknown_hygrostat_is_not_found() {
        let state = test_state("http-unknown");

        let response = handle_get(State(state), Path("attic".to_string())).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({ "error": "Unknown hygrostat 'attic'" })
        );
    }

    #[tokio::test]
    async fn set_humidity_validates_the_value() {
        let state = test_state("http-humidity");
        let query = |value: &str| Query(HashMap::from([("value".to_string(), value.to_string())]));

        let response = handle_set_humidity(
            State(state.clone()),
            Path("bathroom".to_string()),
            query("damp"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            handle_set_humidity(State(state), Path("bathroom".to_string()), query("45")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["targetHumidity"], serde_json::json!(45.0));
        assert_eq!(body["attributes"]["humidity"], serde_json::json!(45.0));
    }

    #[tokio::test]
    async fn foreign_mode_is_a_bad_request() {
        let state = test_state("http-mode");

        let response = handle_set_mode(
            State(state),
            Path("bathroom".to_string()),
            Query(HashMap::from([("value".to_string(), "dry".to_string())])),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["error"],
            serde_json::json!("operation mode dry is not supported by this device")
        );
    }

    #[tokio::test]
    async fn service_calls_are_validated_before_dispatch() {
        let state = test_state("http-service");
        let path = || Path(("bathroom".to_string(), "set_humidity".to_string()));

        let response =
            handle_service(State(state.clone()), path(), Bytes::from_static(b"{}")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response =
            handle_service(State(state.clone()), path(), Bytes::from_static(b"not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = handle_service(
            State(state),
            Path(("bathroom".to_string(), "set_preset_mode".to_string())),
            Bytes::from_static(br#"{"preset_mode":"away"}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["preset"], serde_json::json!("away"));
        assert_eq!(body["targetHumidity"], serde_json::json!(35.0));
    }

    #[tokio::test]
    async fn list_includes_every_hygrostat() {
        let state = test_state("http-list");

        let response = handle_list(State(state)).await.into_response();
        let body = body_json(response).await;
        assert_eq!(body.as_array().map(Vec::len), Some(1));
        assert_eq!(body[0]["name"], serde_json::json!("bathroom"));
        assert_eq!(body[0]["operationModes"], serde_json::json!(["humidify", "off"]));
    }
}
