//! In-memory stand-in for the Hoverfly control plane and proxy port
//!
//! The admin router stores whatever it is given and reports it back. The
//! proxy router journals every request and answers from the stored pairs by
//! exact path and method. Nothing here reimplements real matching.

use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use hoverfly_common::{
    DestinationView, DiffReport, FieldMatcher, InstanceInfo, Journal, JournalEntry, JournalRequest, ModeView,
    RequestMatcher, Response as SimulatedResponse, ResponseDiff, Simulation, SimulationMode, StateView,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::net::TcpListener;
use tracing::{debug, error};

pub const STUB_VERSION: &str = "v1.10.0-stub";

#[derive(Debug, Clone, Default)]
pub struct StubOptions {
    /// Health endpoint always answers 503
    pub never_healthy: bool,
    /// Reject admin calls without `Authorization: Bearer <token>`
    pub auth_token: Option<String>,
}

#[derive(Debug)]
struct StubData {
    simulation: Simulation,
    mode: ModeView,
    destination: String,
    journal: Vec<JournalEntry>,
    state: BTreeMap<String, String>,
    diff: DiffReport,
    seen_authorization: Vec<Option<String>>,
}

impl Default for StubData {
    fn default() -> Self {
        Self {
            simulation: Simulation::empty(),
            mode: ModeView::new(SimulationMode::Simulate, None),
            destination: ".".to_string(),
            journal: Vec::new(),
            state: BTreeMap::new(),
            diff: DiffReport::default(),
            seen_authorization: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StubState {
    data: Arc<Mutex<StubData>>,
    options: Arc<StubOptions>,
}

impl StubState {
    pub fn new(options: StubOptions) -> Self {
        Self {
            data: Arc::new(Mutex::new(StubData::default())),
            options: Arc::new(options),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StubData> {
        self.data.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn simulation(&self) -> Simulation {
        self.lock().simulation.clone()
    }

    pub fn mode(&self) -> ModeView {
        self.lock().mode.clone()
    }

    pub fn record(&self, entry: JournalEntry) {
        self.lock().journal.push(entry);
    }

    pub fn journal_len(&self) -> usize {
        self.lock().journal.len()
    }

    pub fn push_diff(&self, diff: ResponseDiff) {
        self.lock().diff.diff.push(diff);
    }

    /// `Authorization` header of every admin call, in arrival order.
    pub fn seen_authorization(&self) -> Vec<Option<String>> {
        self.lock().seen_authorization.clone()
    }
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

async fn authorize(State(state): State<StubState>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let is_health = request.uri().path() == "/api/health";
    state.lock().seen_authorization.push(header.clone());

    if let Some(token) = &state.options.auth_token {
        if !is_health && header.as_deref() != Some(format!("Bearer {}", token).as_str()) {
            return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
        }
    }
    next.run(request).await
}

pub fn admin_router(state: StubState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/v2/simulation",
            get(get_simulation)
                .put(put_simulation)
                .post(post_simulation)
                .delete(delete_simulation),
        )
        .route("/api/v2/hoverfly", get(get_info))
        .route("/api/v2/hoverfly/mode", get(get_mode).put(put_mode))
        .route(
            "/api/v2/hoverfly/destination",
            get(get_destination).put(put_destination),
        )
        .route(
            "/api/v2/journal",
            get(get_journal).post(search_journal).delete(delete_journal),
        )
        .route("/api/v2/diff", get(get_diff).delete(delete_diff))
        .route("/api/v2/state", get(get_state).put(put_state).delete(delete_state))
        .layer(middleware::from_fn_with_state(state.clone(), authorize))
        .with_state(state)
}

pub fn proxy_router(state: StubState) -> Router {
    Router::new().fallback(proxy).with_state(state)
}

/// Serve the admin router on an ephemeral local port.
pub async fn spawn_admin(options: StubOptions) -> std::io::Result<(SocketAddr, StubState)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let state = StubState::new(options);
    let router = admin_router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            error!("Stub admin server failed: {}", e);
        }
    });
    Ok((addr, state))
}

async fn health(State(state): State<StubState>) -> Response {
    if state.options.never_healthy {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "Hoverfly is not ready")
    } else {
        Json(json!({ "message": "Hoverfly is healthy" })).into_response()
    }
}

async fn get_simulation(State(state): State<StubState>) -> Json<Simulation> {
    Json(state.simulation())
}

async fn put_simulation(State(state): State<StubState>, Json(simulation): Json<Simulation>) -> Response {
    if simulation.meta.schema_version.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid simulation: schema version is missing");
    }
    state.lock().simulation = simulation.clone();
    Json(simulation).into_response()
}

async fn post_simulation(State(state): State<StubState>, Json(simulation): Json<Simulation>) -> Response {
    if simulation.meta.schema_version.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Invalid simulation: schema version is missing");
    }
    let mut data = state.lock();
    let stored = &mut data.simulation.data;
    stored.pairs.extend(simulation.data.pairs);
    stored
        .global_actions
        .delays
        .extend(simulation.data.global_actions.delays);
    Json(data.simulation.clone()).into_response()
}

async fn delete_simulation(State(state): State<StubState>) -> StatusCode {
    state.lock().simulation = Simulation::empty();
    StatusCode::OK
}

async fn get_info(State(state): State<StubState>) -> Json<InstanceInfo> {
    let data = state.lock();
    Json(InstanceInfo {
        destination: data.destination.clone(),
        mode: data.mode.mode,
        arguments: data.mode.arguments.clone(),
        version: STUB_VERSION.to_string(),
        upstream_proxy: String::new(),
        is_webserver: false,
        middleware: Value::Null,
        usage: Value::Null,
    })
}

async fn get_mode(State(state): State<StubState>) -> Json<ModeView> {
    Json(state.mode())
}

async fn put_mode(State(state): State<StubState>, Json(view): Json<ModeView>) -> Json<ModeView> {
    debug!(mode = %view.mode, "Stub mode changed");
    state.lock().mode = view.clone();
    Json(view)
}

async fn get_destination(State(state): State<StubState>) -> Json<DestinationView> {
    Json(DestinationView {
        destination: state.lock().destination.clone(),
    })
}

async fn put_destination(State(state): State<StubState>, Json(view): Json<DestinationView>) -> Response {
    if view.destination.trim().is_empty() {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "Destination must not be empty");
    }
    state.lock().destination = view.destination.clone();
    Json(view).into_response()
}

#[derive(Debug, Deserialize)]
struct JournalParams {
    offset: Option<usize>,
    limit: Option<usize>,
}

async fn get_journal(State(state): State<StubState>, Query(params): Query<JournalParams>) -> Json<Journal> {
    let data = state.lock();
    let offset = params.offset.unwrap_or(0);
    let limit = params.limit.unwrap_or(25);
    let entries: Vec<JournalEntry> = data.journal.iter().skip(offset).take(limit).cloned().collect();
    Json(Journal {
        journal: entries,
        offset: offset as u32,
        limit: limit as u32,
        total: data.journal.len() as u32,
    })
}

async fn search_journal(State(state): State<StubState>, Json(body): Json<Value>) -> Response {
    let matcher: RequestMatcher = match serde_json::from_value(body.get("request").cloned().unwrap_or_default()) {
        Ok(matcher) => matcher,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, &e.to_string()),
    };
    let data = state.lock();
    let entries: Vec<JournalEntry> = data
        .journal
        .iter()
        .filter(|entry| request_matches(&matcher, &entry.request))
        .cloned()
        .collect();
    let total = entries.len() as u32;
    Json(Journal {
        journal: entries,
        offset: 0,
        limit: total,
        total,
    })
    .into_response()
}

async fn delete_journal(State(state): State<StubState>) -> StatusCode {
    state.lock().journal.clear();
    StatusCode::OK
}

async fn get_diff(State(state): State<StubState>) -> Json<DiffReport> {
    Json(state.lock().diff.clone())
}

async fn delete_diff(State(state): State<StubState>) -> StatusCode {
    state.lock().diff = DiffReport::default();
    StatusCode::OK
}

async fn get_state(State(state): State<StubState>) -> Json<StateView> {
    Json(StateView {
        state: state.lock().state.clone(),
    })
}

async fn put_state(State(state): State<StubState>, Json(view): Json<StateView>) -> StatusCode {
    state.lock().state = view.state;
    StatusCode::OK
}

async fn delete_state(State(state): State<StubState>) -> StatusCode {
    state.lock().state.clear();
    StatusCode::OK
}

async fn proxy(State(state): State<StubState>, method: Method, uri: Uri, headers: HeaderMap, body: String) -> Response {
    let destination = uri
        .host()
        .map(str::to_string)
        .or_else(|| headers.get("host").and_then(|h| h.to_str().ok()).map(str::to_string))
        .unwrap_or_default();

    let mut header_map: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in &headers {
        if let Ok(value) = value.to_str() {
            header_map.entry(name.to_string()).or_default().push(value.to_string());
        }
    }

    let request = JournalRequest {
        path: uri.path().to_string(),
        method: method.to_string(),
        destination,
        scheme: uri.scheme_str().unwrap_or("http").to_string(),
        query: uri.query().unwrap_or_default().to_string(),
        body,
        headers: header_map,
    };

    let mut data = state.lock();
    let matched = data
        .simulation
        .pairs()
        .iter()
        .find(|pair| request_matches(&pair.request, &request))
        .map(|pair| pair.response.clone());

    let response = matched.unwrap_or_else(|| {
        SimulatedResponse::ok("Hoverfly Error! There was an error when matching").with_status(502)
    });
    let mode = data.mode.mode.to_string();
    data.journal.push(JournalEntry {
        id: Some(uuid::Uuid::new_v4().to_string()),
        request,
        response: response.clone(),
        mode,
        time_started: Some(chrono::Utc::now()),
        latency: 0.0,
    });
    drop(data);

    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    (status, response.body).into_response()
}

/// Exact matchers are compared; any other matcher type is accepted.
pub fn request_matches(matcher: &RequestMatcher, request: &JournalRequest) -> bool {
    field_matches(&matcher.path, &request.path)
        && field_matches(&matcher.method, &request.method)
        && field_matches(&matcher.destination, &request.destination)
        && field_matches(&matcher.scheme, &request.scheme)
}

fn field_matches(matchers: &Option<Vec<FieldMatcher>>, actual: &str) -> bool {
    let Some(matchers) = matchers else {
        return true;
    };
    matchers.iter().all(|m| match m.matcher.as_str() {
        "exact" => m.value.as_str() == Some(actual),
        _ => true,
    })
}

/// Command line accepted by the stub binary. Unknown flags are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubArgs {
    pub admin_port: u16,
    pub proxy_port: u16,
    pub never_healthy: bool,
}

impl StubArgs {
    pub fn from_args<I>(args: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = StubArgs {
            admin_port: 8888,
            proxy_port: 8500,
            never_healthy: false,
        };
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-ap" => parsed.admin_port = port_value(&arg, args.next())?,
                "-pp" => parsed.proxy_port = port_value(&arg, args.next())?,
                "-never-healthy" => parsed.never_healthy = true,
                _ => {}
            }
        }
        Ok(parsed)
    }

    pub fn options(&self) -> StubOptions {
        StubOptions {
            never_healthy: self.never_healthy,
            auth_token: None,
        }
    }
}

fn port_value(flag: &str, value: Option<String>) -> Result<u16, String> {
    value
        .ok_or_else(|| format!("{} requires a value", flag))?
        .parse()
        .map_err(|e| format!("Invalid value for {}: {}", flag, e))
}
