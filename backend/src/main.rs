use std::env;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use bar_core::RawBar;
use chart_service::{ChartError, ChartOptions, ChartResponse, ChartService, IndicatorRequest};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

const BIND_ADDR_ENV: &str = "CHART_ENGINE_ADDR";

#[derive(Debug, Deserialize)]
struct ChartRequestBody {
    bars: Vec<RawBar>,
    #[serde(default)]
    indicators: Vec<IndicatorRequest>,
    #[serde(flatten)]
    options: ChartOptions,
}

#[derive(Clone)]
struct ServerState {
    service: ChartService,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let state = ServerState {
        service: ChartService::new(),
    };

    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/chart", post(chart_handler))
        .with_state(state);

    let addr = env::var(BIND_ADDR_ENV).unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("bind chart engine listener");
    tracing::info!(%addr, "chart engine listening");
    axum::serve(listener, app).await.expect("server failed");
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn chart_handler(
    State(state): State<ServerState>,
    Json(body): Json<ChartRequestBody>,
) -> Result<Json<ChartResponse>, (StatusCode, Json<serde_json::Value>)> {
    match state
        .service
        .build(&body.bars, &body.indicators, &body.options)
    {
        Ok(response) => Ok(Json(response)),
        Err(ChartError::Data(err)) => Err((
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": err.to_string() })),
        )),
        Err(err) => {
            // Internal faults get a generic message; details stay in the logs.
            error!(%err, "chart build failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_parses_with_inline_options() {
        let body: ChartRequestBody = serde_json::from_str(
            r#"{
                "bars": [
                    {"ts": 1700000000, "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5, "volume": 10.0}
                ],
                "indicators": [{"name": "sma", "params": {"period": 5}}],
                "width": 800,
                "height": 600,
                "chart_type": "line",
                "volume": false
            }"#,
        )
        .unwrap();
        assert_eq!(body.bars.len(), 1);
        assert_eq!(body.indicators[0].name, "sma");
        assert_eq!(body.options.width, 800);
        assert!(!body.options.volume);
        assert_eq!(body.options.chart_type.as_deref(), Some("line"));
    }

    #[test]
    fn request_body_parses_with_defaults() {
        let body: ChartRequestBody = serde_json::from_str(
            r#"{"bars": [{"ts": "2024-03-01", "open": 1.0, "high": 2.0, "low": 0.5, "close": 1.5}]}"#,
        )
        .unwrap();
        assert!(body.indicators.is_empty());
        assert_eq!(body.options.width, 1200);
        assert!(body.options.volume);
        assert!(body.options.chart_type.is_none());
    }
}
