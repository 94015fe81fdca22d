use anyhow::Context;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use terrarium_io::{relay_mask, HardwareError};
use time::Date;
use tokio::net::TcpListener;

use crate::clock;
use crate::config::SystemConfig;
use crate::daily_log::DailyLog;
use crate::db::Db;
use crate::ephem::EphemError;
use crate::hardware::Hardware;
use crate::report;
use crate::settings::Settings;
use crate::state::SharedState;
use crate::summary;

const INDEX_HTML: &str = include_str!("ui/index.html");

/// Days shown by the summary table and charts when the page does not say.
const DEFAULT_WINDOW_DAYS: u32 = 7;
/// Lines returned by the daily-log endpoints when the page does not say.
const DEFAULT_LOG_LINES: usize = 5;
/// Input lines 1-5 are light sensors; 6-8 are the battery voltage relays.
const LIGHT_SENSORS: usize = 5;

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub shared: SharedState,
    pub hardware: Hardware,
    pub system: Arc<SystemConfig>,
    pub daily_log: Arc<DailyLog>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    Hardware(HardwareError),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Internal(e)
    }
}

impl From<HardwareError> for AppError {
    fn from(e: HardwareError) -> Self {
        AppError::Hardware(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(e: JsonRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(e: QueryRejection) -> Self {
        AppError::BadRequest(e.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Hardware(e) => {
                tracing::error!(error = %e, "hardware error");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
            AppError::Internal(e) => {
                tracing::error!(error = %format!("{e:#}"), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}"))
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, AppError>;

fn parse_date_field(field: &str, raw: &str) -> Result<Date, AppError> {
    clock::parse_date(raw.trim()).map_err(|e| {
        AppError::BadRequest(format!("{field}: expected YYYY/MM/DD, got {raw:?} ({e})"))
    })
}

// ---------------------------------------------------------------------------
// Requests / responses
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct EventRequest {
    table: String,
    value: i64,
}

#[derive(Debug, Default, Deserialize)]
struct RangeQuery {
    date: Option<String>,
    days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct DateQuery {
    date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TryRequest {
    #[serde(rename = "try", default)]
    try_mode: bool,
}

#[derive(Debug, Deserialize)]
struct LedRequest {
    on: bool,
    #[serde(rename = "try", default)]
    try_mode: bool,
}

#[derive(Debug, Deserialize)]
struct InputsRequest {
    #[serde(rename = "try", default)]
    try_mode: bool,
    #[serde(default)]
    count_light: bool,
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    date: String,
}

#[derive(Debug, Deserialize)]
struct ClockRequest {
    set_time: String,
}

#[derive(Debug, Default, Deserialize)]
struct LogQuery {
    n: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LogRequest {
    minutes: i64,
}

#[derive(Serialize)]
struct SummaryTableResponse {
    cumsum_date: String,
    rows: std::collections::BTreeMap<String, summary::SummaryEntry>,
}

#[derive(Serialize)]
struct ClimateResponse {
    temp: f64,
    humi: f64,
    img_b64: Option<String>,
}

#[derive(Serialize)]
struct LedResponse {
    img_b64: String,
}

/// Charge state signalled by the two battery voltage relays.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Battery {
    /// Relay 2 closed; blue indicator.
    High,
    /// Only relay 1 closed; green indicator.
    Low,
    /// Neither; yellow indicator.
    Critical,
}

impl Battery {
    pub fn from_relays(relay1: bool, relay2: bool) -> Self {
        if relay2 {
            Battery::High
        } else if relay1 {
            Battery::Low
        } else {
            Battery::Critical
        }
    }
}

#[derive(Serialize)]
struct InputsResponse {
    light_sum: u32,
    log: String,
    light_cnt: u32,
    volt: Battery,
}

#[derive(Serialize)]
struct LogResponse {
    lines: Vec<String>,
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/events", post(post_event))
        .route("/api/summary/table", get(summary_table))
        .route("/api/summary/graph", get(summary_graph))
        .route("/api/daily/graph", get(daily_graph))
        .route("/api/ephem", post(post_ephem))
        .route("/api/climate", post(post_climate))
        .route("/api/led", post(post_led))
        .route("/api/inputs", post(post_inputs))
        .route("/api/config", get(get_config).put(put_config))
        .route("/api/delete", post(post_delete))
        .route("/api/clock", post(post_clock))
        .route("/api/daily-log", get(get_daily_log).post(post_daily_log))
        .with_state(state)
}

async fn index() -> impl IntoResponse {
    ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], INDEX_HTML)
}

async fn api_status(State(state): State<AppState>) -> impl IntoResponse {
    let st = state.shared.read().await;
    Json(st.to_status())
}

/// Persist an observation without touching hardware.  Only the grow-light
/// table is accepted.
async fn post_event(
    State(state): State<AppState>,
    body: Result<Json<EventRequest>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(req) = body?;
    if req.table != "LED" {
        return Err(AppError::BadRequest(format!("unknown table {:?}", req.table)));
    }
    let on = match req.value {
        0 => false,
        1 => true,
        v => return Err(AppError::BadRequest(format!("LED value must be 0 or 1, got {v}"))),
    };
    report::record_light(&state.db, on, clock::local_now_minute()).await?;
    Ok(Json(json!({ "result": "OK" })))
}

// -- Summaries -------------------------------------------------------------

async fn resolve_range(state: &AppState, q: RangeQuery) -> Result<(Date, Date, u32), AppError> {
    let to = match q.date.as_deref() {
        Some(raw) => parse_date_field("date", raw)?,
        None => clock::local_now().date(),
    };
    let days = q.days.unwrap_or(DEFAULT_WINDOW_DAYS);
    if days == 0 {
        return Err(AppError::BadRequest("days must be at least 1".into()));
    }
    if clock::window_start(to, days).is_none() {
        return Err(AppError::BadRequest(format!("days {days} reaches before year -9999")));
    }
    let cumsum_date = state
        .db
        .load_settings()
        .await?
        .cumsum_date()
        .context("cumsum_date setting")?;
    Ok((cumsum_date, to, days))
}

async fn summary_table(
    State(state): State<AppState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<SummaryTableResponse> {
    let Query(q) = query?;
    let (cumsum_date, to, days) = resolve_range(&state, q).await?;
    let rows = summary::summary_table(&state.db, cumsum_date, to, days).await?;
    Ok(Json(SummaryTableResponse {
        cumsum_date: clock::format_date(cumsum_date),
        rows,
    }))
}

async fn summary_graph(
    State(state): State<AppState>,
    query: Result<Query<RangeQuery>, QueryRejection>,
) -> ApiResult<report::SummaryCharts> {
    let Query(q) = query?;
    let (cumsum_date, to, days) = resolve_range(&state, q).await?;
    Ok(Json(report::summary_charts(&state.db, cumsum_date, to, days).await?))
}

async fn daily_graph(
    State(state): State<AppState>,
    query: Result<Query<DateQuery>, QueryRejection>,
) -> ApiResult<report::DailyCharts> {
    let Query(q) = query?;
    let now = clock::local_now_minute();
    let date = match q.date.as_deref() {
        Some(raw) => parse_date_field("date", raw)?,
        None => now.date(),
    };
    Ok(Json(report::daily_charts(&state.db, date, now).await?))
}

// -- Ephemeris --------------------------------------------------------------

/// Astronomy failures, including unusable site settings, come back as a
/// 200 with `{error}`; only store failures are 500s.
async fn post_ephem(State(state): State<AppState>) -> ApiResult<serde_json::Value> {
    let settings = state.db.load_settings().await?;
    let today = clock::local_now().date();

    let outcome = match settings.site() {
        Ok(site) => report::record_ephemeris(&state.db, &site, today).await?,
        Err(e) => Err(EphemError::from(e)),
    };

    match outcome {
        Ok(eph) => Ok(Json(serde_json::to_value(eph).context("serialise ephemeris")?)),
        Err(e) => {
            tracing::warn!(error = %e, "ephemeris unavailable");
            state.shared.write().await.record_error(format!("ephemeris: {e}"));
            Ok(Json(json!({ "error": e.to_string() })))
        }
    }
}

// -- Hardware ---------------------------------------------------------------

fn one_decimal(v: f32) -> f64 {
    (f64::from(v) * 10.0).round() / 10.0
}

async fn post_climate(
    State(state): State<AppState>,
    body: Result<Json<TryRequest>, JsonRejection>,
) -> ApiResult<ClimateResponse> {
    let Json(req) = body?;
    let reading = state.hardware.read_climate(req.try_mode).await;

    if !reading.valid {
        state
            .shared
            .write()
            .await
            .record_error("climate sensor gave no valid reading".into());
        return Ok(Json(ClimateResponse {
            temp: -1.0,
            humi: -1.0,
            img_b64: None,
        }));
    }

    let (temp, humi) = (one_decimal(reading.temperature), one_decimal(reading.humidity));
    let chart = report::record_climate(&state.db, temp, humi, clock::local_now_minute()).await?;
    state
        .shared
        .write()
        .await
        .record_climate(reading.temperature, reading.humidity);

    Ok(Json(ClimateResponse {
        temp,
        humi,
        img_b64: Some(chart),
    }))
}

async fn post_led(
    State(state): State<AppState>,
    body: Result<Json<LedRequest>, JsonRejection>,
) -> ApiResult<LedResponse> {
    let Json(req) = body?;
    let relays = state.shared.read().await.session.relays;
    let mask = if req.on { relay_mask(&relays) } else { 0 };

    // Relays first: a failed write must not leave a light event behind.
    if !req.try_mode {
        if let Err(e) = state.hardware.write_outputs(mask).await {
            state
                .shared
                .write()
                .await
                .record_error(format!("relay write failed: {e}"));
            return Err(e.into());
        }
    }
    let img_b64 = report::record_light(&state.db, req.on, clock::local_now_minute()).await?;

    tracing::info!(on = req.on, mask, try_mode = req.try_mode, "grow light switched");
    state
        .shared
        .write()
        .await
        .record_relay(req.on, mask, req.try_mode);

    Ok(Json(LedResponse { img_b64 }))
}

/// One poll of the digital inputs.  With `count_light` the poll takes part
/// in the light-counting cycle kept in the session.
async fn post_inputs(
    State(state): State<AppState>,
    body: Result<Json<InputsRequest>, JsonRejection>,
) -> ApiResult<InputsResponse> {
    let Json(req) = body?;

    if req.count_light {
        state.shared.write().await.session.advance();
    }

    let inputs = match state.hardware.read_inputs(req.try_mode).await {
        Ok(inputs) if inputs.len() == 8 => inputs,
        Ok(inputs) => {
            return Err(AppError::Internal(anyhow::anyhow!(
                "expected 8 input lines, got {}",
                inputs.len()
            )))
        }
        Err(e) => {
            state
                .shared
                .write()
                .await
                .record_error(format!("input read failed: {e}"));
            return Err(e.into());
        }
    };

    let log: String = inputs.iter().map(|&on| if on { '○' } else { '−' }).collect();
    let lit = inputs[..LIGHT_SENSORS].iter().filter(|&&on| on).count() as u32;
    let volt = Battery::from_relays(inputs[LIGHT_SENSORS], inputs[LIGHT_SENSORS + 1]);

    let mut st = state.shared.write().await;
    if req.count_light {
        st.session.accumulate(lit);
    }
    st.record_inputs(&log);

    Ok(Json(InputsResponse {
        light_sum: st.session.light_sum,
        log,
        light_cnt: st.session.light_cnt,
        volt,
    }))
}

// -- Settings ---------------------------------------------------------------

/// Reading the settings also refreshes the session's cycle length and
/// relay map.
async fn get_config(State(state): State<AppState>) -> ApiResult<Settings> {
    let settings = state.db.load_settings().await?;
    match (settings.sensing_count(), settings.relays()) {
        (Ok(count), Ok(relays)) => state.shared.write().await.session.configure(count, relays),
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "stored settings not applied to session");
        }
    }
    Ok(Json(settings))
}

async fn put_config(
    State(state): State<AppState>,
    body: Result<Json<Settings>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(settings) = body?;

    let errors = settings.validate();
    if !errors.is_empty() {
        let joined = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        return Err(AppError::BadRequest(joined));
    }

    let count = settings.sensing_count().context("sensing_count setting")?;
    let relays = settings.relays().context("output settings")?;
    state.db.save_settings(&settings).await?;

    tracing::info!(keys = settings.len(), "settings saved");
    let mut st = state.shared.write().await;
    st.session.configure(count, relays);
    st.session.restart();
    st.record_config(format!("settings saved ({} keys)", settings.len()));

    Ok(Json(json!({ "response": "done" })))
}

// -- Maintenance ------------------------------------------------------------

/// Remove every dated row on or before `date`.  Settings stay.
async fn post_delete(
    State(state): State<AppState>,
    body: Result<Json<DeleteRequest>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(req) = body?;
    let cutoff = clock::format_date(parse_date_field("date", &req.date)?);
    let deleted = state.db.delete_through(&cutoff).await?;

    tracing::info!(cutoff = %cutoff, deleted, "history deleted");
    state
        .shared
        .write()
        .await
        .record_system(format!("deleted {deleted} rows through {cutoff}"));

    Ok(Json(json!({ "result": "OK" })))
}

/// Set the host clock.  The command is started and left to run.
async fn post_clock(
    State(state): State<AppState>,
    body: Result<Json<ClockRequest>, JsonRejection>,
) -> ApiResult<serde_json::Value> {
    let Json(req) = body?;
    let words: Vec<&str> = req.set_time.split_whitespace().collect();
    if words.is_empty() {
        return Err(AppError::BadRequest("set_time must not be empty".into()));
    }

    let (program, fixed) = state
        .system
        .clock_command
        .split_first()
        .context("clock_command is empty")?;

    tokio::process::Command::new(program)
        .args(fixed)
        .args(&words)
        .spawn()
        .with_context(|| format!("failed to start {program}"))?;

    tracing::info!(program = %program, set_time = %req.set_time, "clock set requested");
    state
        .shared
        .write()
        .await
        .record_system(format!("clock set to {}", req.set_time));

    Ok(Json(json!({ "response": "done" })))
}

// -- Daily log --------------------------------------------------------------

async fn tail_log(log: Arc<DailyLog>, n: usize) -> Result<Vec<String>, AppError> {
    let lines = tokio::task::spawn_blocking(move || log.last_n(n))
        .await
        .context("daily log task failed")??;
    Ok(lines)
}

async fn get_daily_log(
    State(state): State<AppState>,
    query: Result<Query<LogQuery>, QueryRejection>,
) -> ApiResult<LogResponse> {
    let Query(q) = query?;
    let n = q.n.unwrap_or(DEFAULT_LOG_LINES);
    Ok(Json(LogResponse {
        lines: tail_log(Arc::clone(&state.daily_log), n).await?,
    }))
}

async fn post_daily_log(
    State(state): State<AppState>,
    body: Result<Json<LogRequest>, JsonRejection>,
) -> ApiResult<LogResponse> {
    let Json(req) = body?;
    let today = clock::local_now().date();

    let log = Arc::clone(&state.daily_log);
    tokio::task::spawn_blocking(move || log.refresh_last(req.minutes, today))
        .await
        .context("daily log task failed")??;

    Ok(Json(LogResponse {
        lines: tail_log(Arc::clone(&state.daily_log), DEFAULT_LOG_LINES).await?,
    }))
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind web port {port}"))?;

    tracing::info!(%addr, "web ui listening");

    axum::serve(listener, router(state))
        .await
        .context("web server error")
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HardwareMode;
    use crate::state::{SensingSession, SystemState};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    struct TestApp {
        state: AppState,
        _dir: tempfile::TempDir,
    }

    async fn test_app() -> TestApp {
        test_app_with(Settings::defaults(clock::local_now().date())).await
    }

    async fn test_app_with(settings: Settings) -> TestApp {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        db.save_settings(&settings).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let system = SystemConfig {
            clock_command: vec!["true".into()],
            daily_log_path: dir.path().join("daily.txt").display().to_string(),
        };
        let session = SensingSession::new(2, [true; 4]);
        let shared = SystemState::new(HardwareMode::Sim, session).shared();

        TestApp {
            state: AppState {
                db,
                shared,
                hardware: Hardware::simulated(),
                daily_log: Arc::new(DailyLog::new(&system.daily_log_path)),
                system: Arc::new(system),
            },
            _dir: dir,
        }
    }

    async fn call(
        app: &TestApp,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router(app.state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn get_json(app: &TestApp, uri: &str) -> (StatusCode, serde_json::Value) {
        call(app, Method::GET, uri, None).await
    }

    async fn post_json(
        app: &TestApp,
        uri: &str,
        body: serde_json::Value,
    ) -> (StatusCode, serde_json::Value) {
        call(app, Method::POST, uri, Some(body)).await
    }

    // -- Page and status ----------------------------------------------------

    #[tokio::test]
    async fn index_serves_html() {
        let app = test_app().await;
        let response = router(app.state.clone())
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ct = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(ct.starts_with("text/html"));
    }

    #[tokio::test]
    async fn status_reports_session() {
        let app = test_app().await;
        let (status, json) = get_json(&app, "/api/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["hardware"], "sim");
        assert_eq!(json["session"]["sensing_count"], 2);
    }

    // -- Events ---------------------------------------------------------------

    #[tokio::test]
    async fn led_event_is_stored() {
        let app = test_app().await;
        let (status, json) = call(
            &app,
            Method::POST,
            "/api/events",
            Some(json!({ "table": "LED", "value": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["result"], "OK");

        let today = clock::format_date(clock::local_now().date());
        let events = app.state.db.light_events_on(&today).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, 1);
    }

    #[tokio::test]
    async fn unknown_table_is_bad_request() {
        let app = test_app().await;
        let (status, json) = call(
            &app,
            Method::POST,
            "/api/events",
            Some(json!({ "table": "nope", "value": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].as_str().unwrap().contains("unknown table"));
    }

    #[tokio::test]
    async fn missing_field_is_bad_request() {
        let app = test_app().await;
        let (status, json) = post_json(&app, "/api/events", json!({ "table": "LED" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    // -- Summaries ------------------------------------------------------------

    #[tokio::test]
    async fn summary_table_joins_cumulative_totals() {
        let mut settings = Settings::defaults(clock::local_now().date());
        settings.insert("cumsum_date", "2024/06/01");
        let app = test_app_with(settings).await;

        let db = &app.state.db;
        db.upsert_lighting_minutes("2024/06/01", 100).await.unwrap();
        db.upsert_lighting_minutes("2024/06/19", 30).await.unwrap();
        db.upsert_lighting_minutes("2024/06/21", 45).await.unwrap();

        let (status, json) = call(
            &app,
            Method::GET,
            "/api/summary/table?date=2024/06/21&days=3",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["cumsum_date"], "2024/06/01");
        let rows = json["rows"].as_object().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows["2024/06/19"]["lighting_minutes_sum"], 130);
        assert_eq!(rows["2024/06/21"]["lighting_minutes_sum"], 175);
    }

    #[tokio::test]
    async fn summary_rejects_bad_date_and_zero_days() {
        let app = test_app().await;
        let (status, _) = get_json(&app, "/api/summary/table?date=21-06-2024").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/api/summary/graph?days=0").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = get_json(&app, "/api/summary/graph?days=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn summary_rejects_window_past_calendar() {
        let app = test_app().await;
        for path in ["/api/summary/table", "/api/summary/graph"] {
            let uri = format!("{path}?date=2024/06/21&days=4000000000");
            let (status, json) = get_json(&app, &uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(json["error"].as_str().unwrap().contains("days"));
        }
    }

    #[tokio::test]
    async fn summary_graph_returns_two_charts() {
        let app = test_app().await;
        let (status, json) = get_json(&app, "/api/summary/graph").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["light_b64"].as_str().unwrap().starts_with("data:image/png;base64,"));
        assert!(json["temp_b64"].as_str().unwrap().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn daily_graph_for_past_day() {
        let app = test_app().await;
        let db = &app.state.db;
        db.insert_light("2024/06/21", "2024/06/21 08:00", true).await.unwrap();

        let (status, json) = get_json(&app, "/api/daily/graph?date=2024/06/21").await;
        assert_eq!(status, StatusCode::OK);
        // A past day left on closes at 23:59.
        assert_eq!(json["lighting_minutes"], 959);
        assert!(json["mean_temp"].is_null());
    }

    #[tokio::test]
    async fn viewing_daily_graph_leaves_summary_alone() {
        let app = test_app().await;
        let table = "/api/summary/table?date=2024/06/21&days=7";
        let (_, before) = get_json(&app, table).await;
        assert!(before["rows"].as_object().unwrap().is_empty());

        let (status, _) = get_json(&app, "/api/daily/graph?date=2024/06/18").await;
        assert_eq!(status, StatusCode::OK);

        let (_, after) = get_json(&app, table).await;
        assert_eq!(before, after);
    }

    // -- Ephemeris ------------------------------------------------------------

    #[tokio::test]
    async fn ephem_is_computed_and_stored() {
        let app = test_app().await;
        let (status, json) = call(&app, Method::POST, "/api/ephem", None).await;
        assert_eq!(status, StatusCode::OK);
        let rise = json["sunrise_time"].as_str().unwrap();
        let set = json["sunset_time"].as_str().unwrap();
        assert!(rise < set);
        assert!(json["moon_image"].as_str().unwrap().starts_with("data:image/png;base64,"));

        let today = clock::format_date(clock::local_now().date());
        let row = app.state.db.get_summary(&today).await.unwrap().unwrap();
        assert_eq!(row.sunrise_time.as_deref(), Some(rise));
    }

    #[tokio::test]
    async fn ephem_bad_site_is_error_payload() {
        let mut settings = Settings::defaults(clock::local_now().date());
        settings.insert("lat", "north");
        let app = test_app_with(settings).await;

        let (status, json) = call(&app, Method::POST, "/api/ephem", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["error"].as_str().unwrap().contains("lat"));
    }

    // -- Hardware -------------------------------------------------------------

    #[tokio::test]
    async fn climate_try_mode_stores_sample() {
        let app = test_app().await;
        let (status, json) = post_json(&app, "/api/climate", json!({ "try": true })).await;
        assert_eq!(status, StatusCode::OK);
        let temp = json["temp"].as_f64().unwrap();
        assert!((30.0..=60.0).contains(&temp));
        assert!(json["img_b64"].is_string());

        let today = clock::format_date(clock::local_now().date());
        let row = app.state.db.get_summary(&today).await.unwrap().unwrap();
        assert_eq!(row.max_temp, Some(temp));
    }

    #[tokio::test]
    async fn led_try_mode_skips_relays() {
        let app = test_app().await;
        let (status, json) = call(
            &app,
            Method::POST,
            "/api/led",
            Some(json!({ "on": true, "try": true })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["img_b64"].is_string());

        let st = app.state.shared.read().await;
        assert!(st.relay.on);
        assert_eq!(st.events.back().unwrap().detail, "grow light ON (try)");
    }

    #[tokio::test]
    async fn led_writes_enabled_relays() {
        let app = test_app().await;
        app.state.shared.write().await.session.relays = [true, false, true, false];
        let (status, _) = post_json(&app, "/api/led", json!({ "on": true })).await;
        assert_eq!(status, StatusCode::OK);

        let st = app.state.shared.read().await;
        assert_eq!(st.events.back().unwrap().detail, "grow light ON mask=0xa0");
    }

    /// Board whose relay port is unplugged.
    struct NoRelays;

    impl terrarium_io::SensorSource for NoRelays {
        fn read_inputs(&mut self) -> Result<Vec<bool>, HardwareError> {
            Ok(vec![false; 8])
        }

        fn read_climate(&mut self) -> terrarium_io::ClimateReading {
            terrarium_io::ClimateReading::invalid()
        }
    }

    impl terrarium_io::RelayOutput for NoRelays {
        fn write_outputs(&mut self, _mask: u8) -> Result<(), HardwareError> {
            Err(HardwareError::Unavailable("relay port".into()))
        }
    }

    #[tokio::test]
    async fn led_relay_failure_records_nothing() {
        let mut app = test_app().await;
        app.state.hardware = Hardware::with_live(NoRelays);
        let (status, json) = post_json(&app, "/api/led", json!({ "on": true })).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(json["error"].as_str().unwrap().contains("relay port"));

        let today = clock::format_date(clock::local_now().date());
        assert!(app.state.db.light_events_on(&today).await.unwrap().is_empty());
        assert!(!app.state.shared.read().await.relay.on);
    }

    #[tokio::test]
    async fn inputs_cycle_wraps_and_resets_sum() {
        let app = test_app().await;
        let body = json!({ "try": true, "count_light": true });

        let (status, first) = call(&app, Method::POST, "/api/inputs", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["light_cnt"], 1);
        assert_eq!(first["log"].as_str().unwrap().chars().count(), 8);
        assert!(["high", "low", "critical"].contains(&first["volt"].as_str().unwrap()));

        let (_, second) = call(&app, Method::POST, "/api/inputs", Some(body)).await;
        assert_eq!(second["light_cnt"], 0);
        let lit = second["log"].as_str().unwrap().chars().take(5).filter(|&c| c == '○').count();
        assert_eq!(second["light_sum"], lit as u64);
    }

    #[tokio::test]
    async fn inputs_without_counting_leave_cycle() {
        let app = test_app().await;
        let (_, json) = post_json(&app, "/api/inputs", json!({ "try": true })).await;
        assert_eq!(json["light_cnt"], 0);
        assert_eq!(json["light_sum"], 0);
    }

    #[test]
    fn battery_from_relays() {
        assert_eq!(Battery::from_relays(true, true), Battery::High);
        assert_eq!(Battery::from_relays(false, true), Battery::High);
        assert_eq!(Battery::from_relays(true, false), Battery::Low);
        assert_eq!(Battery::from_relays(false, false), Battery::Critical);
    }

    // -- Settings -------------------------------------------------------------

    #[tokio::test]
    async fn config_round_trip_and_session_refresh() {
        let app = test_app().await;
        let (_, mut settings) = get_json(&app, "/api/config").await;
        settings["sensing_count"] = json!("5");
        settings["output2"] = json!("0");
        settings["extra_note"] = json!("kept");

        app.state.shared.write().await.session.advance();
        let (status, json) = call(&app, Method::PUT, "/api/config", Some(settings.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response"], "done");

        {
            let st = app.state.shared.read().await;
            assert_eq!(st.session.sensing_count, 5);
            assert_eq!(st.session.light_cnt, 0);
            assert_eq!(st.session.relays, [true, false, true, true]);
        }

        let (_, back) = get_json(&app, "/api/config").await;
        assert_eq!(back, settings);
    }

    #[tokio::test]
    async fn config_rejects_every_bad_value() {
        let app = test_app().await;
        let (_, mut settings) = get_json(&app, "/api/config").await;
        settings["lat"] = json!("123");
        settings["output1"] = json!("yes");
        settings.as_object_mut().unwrap().remove("place");

        let (status, json) = call(&app, Method::PUT, "/api/config", Some(settings)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let msg = json["error"].as_str().unwrap();
        assert!(msg.contains("lat"), "{msg}");
        assert!(msg.contains("output1"), "{msg}");
        assert!(msg.contains("place"), "{msg}");
    }

    // -- Maintenance ----------------------------------------------------------

    #[tokio::test]
    async fn delete_spares_later_days() {
        let app = test_app().await;
        let db = &app.state.db;
        db.insert_light("2024/06/20", "2024/06/20 08:00", true).await.unwrap();
        db.insert_light("2024/06/22", "2024/06/22 08:00", true).await.unwrap();

        let (status, _) = post_json(&app, "/api/delete", json!({ "date": "2024/06/21" })).await;
        assert_eq!(status, StatusCode::OK);
        assert!(db.light_events_on("2024/06/20").await.unwrap().is_empty());
        assert_eq!(db.light_events_on("2024/06/22").await.unwrap().len(), 1);
        assert!(!db.load_settings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_needs_valid_date() {
        let app = test_app().await;
        let (status, _) = post_json(&app, "/api/delete", json!({ "date": "yesterday" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn clock_spawns_command() {
        let app = test_app().await;
        let (status, json) = call(
            &app,
            Method::POST,
            "/api/clock",
            Some(json!({ "set_time": "-s 2024-06-21T12:00" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["response"], "done");
    }

    #[tokio::test]
    async fn clock_rejects_blank_time() {
        let app = test_app().await;
        let (status, _) = post_json(&app, "/api/clock", json!({ "set_time": "   " })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // -- Daily log ------------------------------------------------------------

    #[tokio::test]
    async fn daily_log_accumulates() {
        let app = test_app().await;
        let (_, empty) = get_json(&app, "/api/daily-log").await;
        assert_eq!(empty["lines"], json!([]));

        post_json(&app, "/api/daily-log", json!({ "minutes": 20 })).await;
        let (status, json) = post_json(&app, "/api/daily-log", json!({ "minutes": 5 })).await;
        assert_eq!(status, StatusCode::OK);
        let lines = json["lines"].as_array().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].as_str().unwrap().ends_with("一日の実績:25分, 累計:25分"));
    }
}
