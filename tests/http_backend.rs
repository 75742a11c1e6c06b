//! HTTP backend integration tests
//!
//! Runs [`HttpBackend`] against an in-process axum server that mimics the
//! simulation backend's REST routes, including its plain-text error bodies.

use axum::extract::{Path, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use lpwan_sync::config::{RunMethod, ValuesRoute};
use lpwan_sync::{
    HttpBackend, SimulationBackend, SimulationController, SimulationId, SimulationParameters,
    SimulationPhase, SimulationRegistry, SyncConfig, SyncError,
};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone, Default)]
struct MockBackend {
    requests: Arc<Mutex<Vec<String>>>,
    bodies: Arc<Mutex<Vec<Value>>>,
    fetches: Arc<AtomicUsize>,
}

impl MockBackend {
    fn log(&self, entry: impl Into<String>) {
        self.requests.lock().unwrap().push(entry.into());
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

fn snapshot(running: bool) -> Value {
    json!({
        "simulationRunning": running,
        "input": {"simulationMessagePerSecond": 3, "MiotyModelRun": false,
                  "SigfoxModelRun": true, "LoRaWanModelRun": false},
        "MiotyFrames": [],
        "SigfoxFrames": [{
            "channel": 868130000, "group": 2, "usStart": 0, "usEnd": 2080000,
            "collision": true, "lost": false, "first": true,
            "next": {"channel": 868134000, "group": 2, "usStart": 2100000, "usEnd": 4180000,
                     "collision": false, "lost": false, "first": false, "next": null}
        }],
        "LoRaWanFrames": []
    })
}

async fn create(State(mock): State<MockBackend>, Json(body): Json<Value>) -> Json<Value> {
    mock.log("POST new");
    mock.bodies.lock().unwrap().push(body);
    Json(json!({"id": 7}))
}

async fn run(State(mock): State<MockBackend>, method: Method, Path(id): Path<String>) -> Response {
    mock.log(format!("{method} run/{id}"));
    match id.parse::<i64>() {
        Ok(n) => Json(json!({"id": n})).into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, "Invalid simulation id").into_response(),
    }
}

async fn values(State(mock): State<MockBackend>, Path(id): Path<String>) -> Response {
    mock.log(format!("GET values/{id}"));
    match id.as_str() {
        "7" => {
            let fetch = mock.fetches.fetch_add(1, Ordering::SeqCst);
            Json(snapshot(fetch < 2)).into_response()
        }
        "slow" => {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(snapshot(false)).into_response()
        }
        "garbled" => Json(json!({"simulationRunning": "maybe"})).into_response(),
        _ => (StatusCode::NOT_FOUND, "No simulation with this id").into_response(),
    }
}

async fn ids(State(mock): State<MockBackend>) -> Json<Value> {
    mock.log("GET get_ids");
    Json(json!([{"id": 7}, {"id": 8}]))
}

async fn set_parameters(
    State(mock): State<MockBackend>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> StatusCode {
    mock.log(format!("POST set_parameters/{id}"));
    mock.bodies.lock().unwrap().push(body);
    StatusCode::OK
}

async fn delete(State(mock): State<MockBackend>, Path(id): Path<String>) -> Response {
    mock.log(format!("POST delete/{id}"));
    (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({"message": "database locked"}))).into_response()
}

async fn ping(State(mock): State<MockBackend>) -> &'static str {
    mock.log("GET ping");
    "{}"
}

async fn spawn_backend() -> (String, MockBackend) {
    let mock = MockBackend::default();
    let app = Router::new()
        .route("/api/new", post(create))
        .route("/api/run/:id", post(run).get(run))
        .route("/api/get_values/:id", get(values))
        .route("/api/values/:id", get(values))
        .route("/api/get_ids", get(ids))
        .route("/api/set_parameters/:id", post(set_parameters))
        .route("/api/delete/:id", post(delete))
        .route("/api/ping", get(ping))
        .with_state(mock.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), mock)
}

fn backend(base_url: &str) -> HttpBackend {
    HttpBackend::new(&SyncConfig::new(base_url)).unwrap()
}

#[tokio::test]
async fn create_posts_parameters_and_returns_id() {
    let (url, mock) = spawn_backend().await;
    let parameters = SimulationParameters::new(3.0).with_model(lpwan_sync::ModelKind::LoRaWan, true);

    let id = backend(&url).create(&parameters).await.unwrap();

    assert_eq!(id, SimulationId::Number(7));
    let body = mock.bodies.lock().unwrap()[0].clone();
    assert_eq!(body["simulationMessagePerSecond"], json!(3.0));
    assert_eq!(body["LoRaWanModelRun"], json!(true));
    assert_eq!(body["MiotyModelRun"], json!(true));
}

#[tokio::test]
async fn run_and_values_use_configured_routes() {
    let (url, mock) = spawn_backend().await;
    let id = SimulationId::Number(7);

    let ack = backend(&url).run(&id).await.unwrap();
    assert_eq!(ack, json!({"id": 7}));

    let config = SyncConfig {
        values_route: ValuesRoute::Values,
        run_method: RunMethod::Get,
        ..SyncConfig::new(&url)
    };
    let alternate = HttpBackend::new(&config).unwrap();
    alternate.run(&id).await.unwrap();
    let model = alternate.values(&id).await.unwrap();

    assert!(model.sigfox.enabled);
    assert_eq!(model.sigfox.frames.len(), 2);
    assert_eq!(model.messages_per_second, 3.0);
    assert_eq!(mock.requests(), ["POST run/7", "GET run/7", "GET values/7"]);
}

#[tokio::test]
async fn plain_text_error_bodies_have_no_details() {
    let (url, _mock) = spawn_backend().await;

    let err = backend(&url).values(&SimulationId::Number(99)).await.unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert_eq!(err.to_string(), "fetch values: 404 Not Found - details unavailable");
}

#[tokio::test]
async fn json_error_bodies_contribute_their_message() {
    let (url, _mock) = spawn_backend().await;

    let err = backend(&url).delete(&SimulationId::Number(7)).await.unwrap_err();

    assert_eq!(err.status(), Some(500));
    assert!(err.is_retryable());
    assert_eq!(err.to_string(), "delete simulation: 500 Internal Server Error - database locked");
}

#[tokio::test]
async fn string_ids_are_percent_encoded() {
    let (url, mock) = spawn_backend().await;

    let err = backend(&url).run(&SimulationId::from("night run")).await.unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(mock.requests(), ["POST run/night run"]);
}

#[tokio::test]
async fn ids_accept_wrapped_elements() {
    let (url, _mock) = spawn_backend().await;

    let ids = backend(&url).ids().await.unwrap();

    assert_eq!(ids, vec![SimulationId::Number(7), SimulationId::Number(8)]);
}

#[tokio::test]
async fn empty_acknowledgements_are_null() {
    let (url, mock) = spawn_backend().await;

    let ack = backend(&url)
        .set_parameters(&SimulationId::Number(7), &SimulationParameters::new(1.5))
        .await
        .unwrap();

    assert_eq!(ack, Value::Null);
    assert_eq!(mock.bodies.lock().unwrap()[0]["simulationMessagePerSecond"], json!(1.5));
}

#[tokio::test]
async fn malformed_snapshots_are_protocol_errors() {
    let (url, _mock) = spawn_backend().await;

    let err = backend(&url).values(&SimulationId::from("garbled")).await.unwrap_err();

    assert!(matches!(err, SyncError::Protocol { .. }), "{err:?}");
}

#[tokio::test]
async fn slow_responses_time_out_as_408() {
    let (url, _mock) = spawn_backend().await;
    let config = SyncConfig { request_timeout_ms: 200, ..SyncConfig::new(&url) };

    let err = HttpBackend::new(&config)
        .unwrap()
        .values(&SimulationId::from("slow"))
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(408));
    assert!(err.to_string().starts_with("fetch values:"), "{err}");
}

#[tokio::test]
async fn ping_reports_reachability() {
    let (url, _mock) = spawn_backend().await;
    backend(&url).ping().await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let closed = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let err = backend(&closed).ping().await.unwrap_err();
    assert!(matches!(err, SyncError::Network { .. }), "{err:?}");
}

#[tokio::test]
async fn controller_runs_a_simulation_to_completion() {
    let _ = tracing_subscriber::fmt::try_init();
    let (url, mock) = spawn_backend().await;
    let registry = SimulationRegistry::new();
    let controller = SimulationController::new(
        Arc::new(backend(&url)),
        registry.clone(),
        Duration::from_millis(50),
    )
    .unwrap();

    let id = controller.create(&SimulationParameters::default()).await.unwrap();
    controller.run(&id).await.unwrap();

    let mut states = registry.subscribe();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| state.phase(&id) == Some(SimulationPhase::Completed)),
    )
    .await
    .expect("poller finished in time")
    .unwrap();

    assert!(!registry.get(&id).unwrap().running);
    assert_eq!(mock.fetches.load(Ordering::SeqCst), 3);
    assert!(!controller.is_polling(&id));
}
