use anyhow::{Context, Result};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::{
    parse_switch_state, EspRequest, EspResponse, FanResponse, HumidityEntry, MoistureEntry,
    PumpResponse, SetPointResponse, TemperatureEntry,
};
use crate::duration::parse_duration;
use crate::error::ApiError;
use crate::pid::Gains;
use crate::service::SharedService;
use crate::state::StatusResponse;

// ---------------------------------------------------------------------------
// Query strings
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct PumpQuery {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FanQuery {
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SetPointQuery {
    sp_value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChartQuery {
    interval: Option<String>,
    sampling: Option<String>,
}

impl ChartQuery {
    fn parse(&self) -> Result<(time::Duration, time::Duration), ApiError> {
        let interval = required("interval", &self.interval)?;
        let sampling = required("sampling", &self.sampling)?;
        let interval = parse_duration(interval)
            .map_err(|e| ApiError::invalid(format!("invalid interval: {e}")))?;
        let sampling = parse_duration(sampling)
            .map_err(|e| ApiError::invalid(format!("invalid sampling: {e}")))?;
        Ok((interval, sampling))
    }
}

fn required<'a>(name: &str, value: &'a Option<String>) -> Result<&'a str, ApiError> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::invalid(format!("{name} is required")))
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(service: SharedService) -> Router {
    Router::new()
        .route("/api/esp", post(api_esp))
        .route("/api/pump-water", get(api_pump_water))
        .route("/api/fan-control", get(api_fan_control))
        .route("/api/temp-control-sp", get(api_set_temp_sp))
        .route("/api/temp-sp", get(api_temp_sp))
        .route("/api/temp-coef", get(api_get_temp_coef).post(api_set_temp_coef))
        .route("/api/temp-data", get(api_temp_data))
        .route("/api/humidity-data", get(api_humidity_data))
        .route("/api/moisture-data", get(api_moisture_data))
        .route("/api/status", get(api_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

async fn api_esp(
    State(service): State<SharedService>,
    body: Result<Json<EspRequest>, JsonRejection>,
) -> Result<Json<EspResponse>, ApiError> {
    let Json(req) = body?;
    Ok(Json(service.ingest(req).await?))
}

async fn api_pump_water(
    State(service): State<SharedService>,
    Query(q): Query<PumpQuery>,
) -> Result<Json<PumpResponse>, ApiError> {
    Ok(Json(service.activate_pump(q.duration.as_deref()).await?))
}

async fn api_fan_control(
    State(service): State<SharedService>,
    Query(q): Query<FanQuery>,
) -> Result<Json<FanResponse>, ApiError> {
    let on = parse_switch_state(required("state", &q.state)?).map_err(ApiError::InvalidInput)?;
    Ok(Json(service.set_fan(on).await))
}

async fn api_set_temp_sp(
    State(service): State<SharedService>,
    Query(q): Query<SetPointQuery>,
) -> Result<Json<SetPointResponse>, ApiError> {
    let raw = required("sp_value", &q.sp_value)?;
    let value: f64 = raw
        .parse()
        .map_err(|_| ApiError::invalid(format!("sp_value '{raw}' is not a number")))?;
    Ok(Json(service.set_set_point(value).await?))
}

async fn api_temp_sp(State(service): State<SharedService>) -> Json<SetPointResponse> {
    Json(service.set_point().await)
}

async fn api_get_temp_coef(State(service): State<SharedService>) -> Json<Gains> {
    Json(service.gains().await)
}

async fn api_set_temp_coef(
    State(service): State<SharedService>,
    body: Result<Json<Gains>, JsonRejection>,
) -> Result<Json<Gains>, ApiError> {
    let Json(gains) = body?;
    Ok(Json(service.set_gains(gains).await?))
}

async fn api_temp_data(
    State(service): State<SharedService>,
    Query(q): Query<ChartQuery>,
) -> Result<Json<Vec<TemperatureEntry>>, ApiError> {
    let (interval, sampling) = q.parse()?;
    Ok(Json(service.temperature_chart(interval, sampling).await?))
}

async fn api_humidity_data(
    State(service): State<SharedService>,
    Query(q): Query<ChartQuery>,
) -> Result<Json<Vec<HumidityEntry>>, ApiError> {
    let (interval, sampling) = q.parse()?;
    Ok(Json(service.humidity_chart(interval, sampling).await?))
}

async fn api_moisture_data(
    State(service): State<SharedService>,
    Query(q): Query<ChartQuery>,
) -> Result<Json<Vec<MoistureEntry>>, ApiError> {
    let (interval, sampling) = q.parse()?;
    Ok(Json(service.moisture_chart(interval, sampling).await?))
}

async fn api_status(State(service): State<SharedService>) -> Json<StatusResponse> {
    Json(service.status().await)
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Serve until Ctrl-C, then switch every actuator off.
pub async fn serve(service: SharedService, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    info!(%addr, "http api listening");

    axum::serve(listener, router(Arc::clone(&service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("web server error")?;

    service.shutdown().await;
    info!("http api stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PumpSettings;
    use crate::db::{now_ms, Db};
    use crate::pid::IntegralTerm;
    use crate::service::ControlService;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn app() -> (Router, SharedService) {
        let (app, service, _) = app_with_db().await;
        (app, service)
    }

    async fn app_with_db() -> (Router, SharedService, Db) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        let service = Arc::new(ControlService::new(
            db.clone(),
            PumpSettings {
                default_on: Duration::from_millis(200),
                max_on: Duration::from_secs(5),
            },
            IntegralTerm::PreviousError,
        ));
        (router(Arc::clone(&service)), service, db)
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, serde_json::Value) {
        send(app, Request::get(uri).body(Body::empty()).unwrap()).await
    }

    async fn post_json(app: &Router, uri: &str, body: &str) -> (StatusCode, serde_json::Value) {
        let req = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        send(app, req).await
    }

    // -- Ingestion ----------------------------------------------------------

    #[tokio::test]
    async fn esp_returns_control_payload() {
        let (app, _) = app().await;
        get_json(&app, "/api/temp-control-sp?sp_value=10").await;
        post_json(&app, "/api/temp-coef", r#"{"temp_kp":1,"temp_ki":0,"temp_kd":0}"#).await;

        let (status, body) = post_json(
            &app,
            "/api/esp",
            r#"{"temp_pv":0,"moist_pv":0.3,"humidity_pv":50}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temp_sp"], 10.0);
        assert_eq!(body["temp_co"], 10.0);
        assert_eq!(body["temp_kp"], 1.0);
        assert_eq!(body["fan_control"], 0);
        assert_eq!(body["water_pump_control"], 0);
    }

    #[tokio::test]
    async fn esp_malformed_body_is_400() {
        let (app, service) = app().await;
        let (status, body) = post_json(&app, "/api/esp", r#"{"temp_pv":"hot"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
        let process = service.status().await.process;
        assert_eq!(process.get(crate::state::ProcessVar::TemperaturePv), 0.0);
    }

    #[tokio::test]
    async fn esp_storage_failure_is_500_with_generic_body() {
        let (app, service, db) = app_with_db().await;
        sqlx::query("DROP TABLE humidity")
            .execute(db.pool())
            .await
            .unwrap();

        let (status, body) = post_json(
            &app,
            "/api/esp",
            r#"{"temp_pv":21,"moist_pv":0.3,"humidity_pv":55}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, serde_json::json!({"error": "storage failure"}));

        let process = service.status().await.process;
        assert_eq!(process.get(crate::state::ProcessVar::TemperaturePv), 21.0);
    }

    #[tokio::test]
    async fn esp_rejects_get() {
        let (app, _) = app().await;
        let (status, _) = get_json(&app, "/api/esp").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    }

    // -- Actuators ----------------------------------------------------------

    #[tokio::test]
    async fn fan_control_toggles() {
        let (app, _) = app().await;
        let (status, body) = get_json(&app, "/api/fan-control?state=on").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["fan_control"], 1);

        let (_, status_body) = get_json(&app, "/api/status").await;
        assert_eq!(status_body["actuators"]["fan_control"], true);

        let (_, body) = get_json(&app, "/api/fan-control?state=off").await;
        assert_eq!(body["fan_control"], 0);
    }

    #[tokio::test]
    async fn fan_control_bad_state_is_400() {
        let (app, _) = app().await;
        let (status, _) = get_json(&app, "/api/fan-control?state=maybe").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/api/fan-control").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn pump_uses_requested_or_default_duration() {
        let (app, service) = app().await;
        let (status, body) = get_json(&app, "/api/pump-water?duration=1s").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["water_pump_control"], 1);
        assert_eq!(body["duration_ms"], 1000);

        let (_, body) = get_json(&app, "/api/pump-water?duration=nonsense").await;
        assert_eq!(body["duration_ms"], 200);

        let (_, body) = get_json(&app, "/api/pump-water").await;
        assert_eq!(body["duration_ms"], 200);

        let (_, status_body) = get_json(&app, "/api/status").await;
        assert_eq!(status_body["actuators"]["pump_water"], true);
        assert_eq!(status_body["pump_timer_pending"], true);

        service.shutdown().await;
    }

    // -- Set-point + tuning -------------------------------------------------

    #[tokio::test]
    async fn set_point_round_trip() {
        let (app, _) = app().await;
        let (status, body) = get_json(&app, "/api/temp-control-sp?sp_value=23.75").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["temp_sp"], 23.75);

        let (_, body) = get_json(&app, "/api/temp-sp").await;
        assert_eq!(body["temp_sp"], 23.75);
    }

    #[tokio::test]
    async fn set_point_invalid_is_400_and_keeps_value() {
        let (app, _) = app().await;
        get_json(&app, "/api/temp-control-sp?sp_value=20").await;

        let (status, body) = get_json(&app, "/api/temp-control-sp?sp_value=warm").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sp_value"));

        let (status, _) = get_json(&app, "/api/temp-control-sp").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = get_json(&app, "/api/temp-sp").await;
        assert_eq!(body["temp_sp"], 20.0);
    }

    #[tokio::test]
    async fn gains_round_trip_exactly() {
        let (app, _) = app().await;
        let (_, body) = get_json(&app, "/api/temp-coef").await;
        assert_eq!(body["temp_kp"], 0.0);

        let payload = r#"{"temp_kp":0.30000000000000004,"temp_ki":1e-12,"temp_kd":-123456.789}"#;
        let (status, echoed) = post_json(&app, "/api/temp-coef", payload).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = get_json(&app, "/api/temp-coef").await;
        assert_eq!(body, echoed);
        assert_eq!(body["temp_kp"].as_f64().unwrap(), 0.1 + 0.2);
        assert_eq!(body["temp_ki"].as_f64().unwrap(), 1e-12);
        assert_eq!(body["temp_kd"].as_f64().unwrap(), -123456.789);
    }

    #[tokio::test]
    async fn gains_missing_field_is_400() {
        let (app, _) = app().await;
        let (status, _) = post_json(&app, "/api/temp-coef", r#"{"temp_kp":1}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- Charts -------------------------------------------------------------

    #[tokio::test]
    async fn temp_data_returns_thinned_entries() {
        let (app, _) = app().await;
        for _ in 0..3 {
            post_json(
                &app,
                "/api/esp",
                r#"{"temp_pv":21,"moist_pv":0.3,"humidity_pv":50}"#,
            )
            .await;
        }

        // Three samples within a few ms collapse to one at 1s spacing.
        let (status, body) = get_json(&app, "/api/temp-data?interval=1m&sampling=1s").await;
        assert_eq!(status, StatusCode::OK);
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["temp_pv"], 21.0);
        assert_eq!(entries[0]["time"].as_str().unwrap().len(), 8);
        assert!(entries[0]["ts"].as_i64().unwrap() <= now_ms());
    }

    #[tokio::test]
    async fn humidity_and_moisture_data() {
        let (app, _) = app().await;
        post_json(
            &app,
            "/api/esp",
            r#"{"temp_pv":21,"moist_pv":0.3,"humidity_pv":50}"#,
        )
        .await;

        let (_, body) = get_json(&app, "/api/humidity-data?interval=1h&sampling=1m").await;
        assert_eq!(body[0]["humidity"], 50.0);

        let (_, body) = get_json(&app, "/api/moisture-data?interval=1h&sampling=1m").await;
        assert_eq!(body[0]["moisture"], 0.3);
    }

    #[tokio::test]
    async fn chart_without_data_is_404() {
        let (app, _) = app().await;
        let (status, body) = get_json(&app, "/api/moisture-data?interval=1h&sampling=1m").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn chart_bad_parameters_are_400() {
        let (app, _) = app().await;
        for uri in [
            "/api/temp-data?interval=1h&sampling=0",
            "/api/temp-data?interval=1h&sampling=-1s",
            "/api/temp-data?interval=1h&sampling=fast",
            "/api/temp-data?interval=0&sampling=1s",
            "/api/temp-data?sampling=1s",
            "/api/temp-data?interval=1h",
        ] {
            let (status, _) = get_json(&app, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        }
    }

    // -- Status + CORS ------------------------------------------------------

    #[tokio::test]
    async fn status_lists_every_register_key() {
        let (app, _) = app().await;
        let (status, body) = get_json(&app, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["process"].as_object().unwrap().len(), 5);
        assert_eq!(body["tuning"].as_object().unwrap().len(), 3);
        assert_eq!(body["actuators"]["pump_water"], false);
        assert_eq!(body["pump_timer_pending"], false);
    }

    #[tokio::test]
    async fn cors_headers_are_present() {
        let (app, _) = app().await;
        let req = Request::get("/api/temp-sp")
            .header("origin", "http://dashboard.local")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert!(resp
            .headers()
            .contains_key("access-control-allow-origin"));
    }
}
