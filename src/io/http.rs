//! HTTP and WebSocket surface
//!
//! - `GET /zones` - current geometry as a JSON array of three `{x1,y1,x2,y2}`
//! - `POST /updateZones` - partial geometry update
//! - `GET /ws` - WebSocket upgrade; streams `{"id","x","y"}` telemetry
//!
//! JSON responses allow any origin; the dashboard talks to the device directly.

use crate::io::telemetry::{run_subscriber, TelemetryPublisher};
use crate::services::zone_config::ZoneConfigService;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{
    HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY,
    UPGRADE,
};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Larger `updateZones` bodies are rejected as invalid JSON
pub const MAX_UPDATE_BODY: usize = 4 * 1024;

/// Everything a request handler needs
pub struct HttpState {
    zones: ZoneConfigService,
    telemetry: Arc<TelemetryPublisher>,
    shutdown: watch::Receiver<bool>,
}

impl HttpState {
    pub fn new(
        zones: ZoneConfigService,
        telemetry: Arc<TelemetryPublisher>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { zones, telemetry, shutdown }
    }
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

#[derive(Serialize)]
struct StatusBody<'a> {
    status: &'a str,
    message: &'a str,
}

fn status_response(status: StatusCode, outcome: &str, message: &str) -> Response<Full<Bytes>> {
    match serde_json::to_vec(&StatusBody { status: outcome, message }) {
        Ok(body) => json_response(status, body),
        Err(_) => plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
    }
}

fn preflight_response(methods: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::OK)
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*")
        .header(ACCESS_CONTROL_ALLOW_METHODS, methods)
        .header(ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type")
        .body(Full::new(Bytes::new()))
        .expect("static response should not fail")
}

fn plain_response(status: StatusCode, text: &'static str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::from(text)))
        .expect("static response should not fail")
}

fn get_zones(state: &HttpState) -> Response<Full<Bytes>> {
    match serde_json::to_vec(&state.zones.get_zones()) {
        Ok(body) => json_response(StatusCode::OK, body),
        Err(e) => {
            error!(error = %e, "zones_serialize_failed");
            plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error")
        }
    }
}

async fn update_zones<B>(req: Request<B>, state: &HttpState) -> Response<Full<Bytes>>
where
    B: Body,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    let body = match Limited::new(req.into_body(), MAX_UPDATE_BODY).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "update_zones_body_rejected");
            return status_response(StatusCode::BAD_REQUEST, "error", "Invalid JSON");
        }
    };

    match state.zones.update_zones(&body) {
        Ok(_) => status_response(StatusCode::OK, "success", "Zones updated"),
        Err(e) => status_response(StatusCode::BAD_REQUEST, "error", &e.to_string()),
    }
}

fn header_contains(req: &Request<impl Sized>, name: hyper::header::HeaderName, token: &str) -> bool {
    req.headers()
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .any(|part| part.trim().eq_ignore_ascii_case(token))
}

/// Answer the upgrade and hand the connection to a telemetry session
fn upgrade_websocket<B: Send + 'static>(mut req: Request<B>, state: &HttpState) -> Response<Full<Bytes>> {
    let key = match req.headers().get(SEC_WEBSOCKET_KEY) {
        Some(key) if header_contains(&req, UPGRADE, "websocket") => key.clone(),
        _ => return plain_response(StatusCode::BAD_REQUEST, "Expected WebSocket upgrade"),
    };
    let accept = derive_accept_key(key.as_bytes());

    let on_upgrade = hyper::upgrade::on(&mut req);
    let telemetry = state.telemetry.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => {
                let socket =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                run_subscriber(socket, telemetry, shutdown).await;
            }
            Err(e) => debug!(error = %e, "websocket_upgrade_failed"),
        }
    });

    let mut response = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(CONNECTION, "Upgrade")
        .header(UPGRADE, "websocket")
        .body(Full::new(Bytes::new()))
        .expect("static response should not fail");
    if let Ok(value) = HeaderValue::from_str(&accept) {
        response.headers_mut().insert(SEC_WEBSOCKET_ACCEPT, value);
    }
    response
}

/// Route one request
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<HttpState>,
) -> Result<Response<Full<Bytes>>, Infallible>
where
    B: Body + Send + 'static,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    debug!(method = %req.method(), path = %req.uri().path(), "http_request");

    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/zones") => get_zones(&state),
        (&Method::POST, "/updateZones") => update_zones(req, &state).await,
        (&Method::GET, "/ws") => upgrade_websocket(req, &state),
        (&Method::OPTIONS, "/zones") => preflight_response("GET, OPTIONS"),
        (&Method::OPTIONS, "/updateZones") => preflight_response("POST, OPTIONS"),
        _ => plain_response(StatusCode::NOT_FOUND, "Not Found"),
    };
    Ok(response)
}

/// Bind and serve until shutdown
pub async fn start_http_server(
    addr: SocketAddr,
    state: HttpState,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server on {addr}"))?;
    serve(listener, Arc::new(state), shutdown).await
}

pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, peer)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .with_upgrades()
                                .await
                            {
                                debug!(peer = %peer, error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{TelemetryRecord, Zone, DEFAULT_ZONES};
    use crate::infra::metrics::Metrics;
    use crate::services::zone_store::ZoneStore;
    use futures_util::StreamExt;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Fixture {
        state: Arc<HttpState>,
        store: ZoneStore,
        telemetry: Arc<TelemetryPublisher>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn fixture() -> Fixture {
        let metrics = Arc::new(Metrics::new());
        let store = ZoneStore::default();
        let telemetry = Arc::new(TelemetryPublisher::new(16, metrics.clone()));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let state = Arc::new(HttpState::new(
            ZoneConfigService::new(store.clone(), metrics),
            telemetry.clone(),
            shutdown_rx,
        ));
        Fixture { state, store, telemetry, shutdown_tx }
    }

    fn request(method: Method, path: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
        Request::builder().method(method).uri(path).body(Full::new(body.into())).unwrap()
    }

    async fn body_string(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_get_zones() {
        let f = fixture();

        let response = handle_request(request(Method::GET, "/zones", ""), f.state).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        let zones: Vec<Zone> = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(zones, DEFAULT_ZONES);
    }

    #[tokio::test]
    async fn test_update_zones_partial() {
        let f = fixture();

        let response =
            handle_request(request(Method::POST, "/updateZones", r#"[{"x2":5000}]"#), f.state)
                .await
                .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, r#"{"status":"success","message":"Zones updated"}"#);
        assert_eq!(f.store.snapshot()[0], Zone::new(1, 1, 5000, 4000));
        assert_eq!(&f.store.snapshot()[1..], &DEFAULT_ZONES[1..]);
    }

    #[tokio::test]
    async fn test_update_zones_malformed() {
        let f = fixture();

        let response =
            handle_request(request(Method::POST, "/updateZones", "[{"), f.state).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body, json!({"status": "error", "message": "Invalid JSON"}));
        assert_eq!(f.store.snapshot(), DEFAULT_ZONES);
    }

    #[tokio::test]
    async fn test_update_zones_too_many() {
        let f = fixture();
        let body = r#"[{"x1":1},{"x1":2},{"x1":3},{"x1":4}]"#;

        let response =
            handle_request(request(Method::POST, "/updateZones", body), f.state).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["message"], "Too many zones");
        assert_eq!(f.store.snapshot(), DEFAULT_ZONES);
    }

    #[tokio::test]
    async fn test_update_zones_oversized_body() {
        let f = fixture();
        let padding = " ".repeat(MAX_UPDATE_BODY);
        let body = format!(r#"[{{"x1":7}}{padding}]"#);

        let response =
            handle_request(request(Method::POST, "/updateZones", body), f.state).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(body_string(response).await.contains("Invalid JSON"));
        assert_eq!(f.store.snapshot(), DEFAULT_ZONES);
    }

    #[tokio::test]
    async fn test_preflight_and_not_found() {
        let f = fixture();

        let response = handle_request(request(Method::OPTIONS, "/updateZones", ""), f.state.clone())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");

        let response =
            handle_request(request(Method::GET, "/metrics", ""), f.state.clone()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response =
            handle_request(request(Method::GET, "/updateZones", ""), f.state).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ws_upgrade_headers() {
        let f = fixture();
        let req = Request::builder()
            .method(Method::GET)
            .uri("/ws")
            .header(CONNECTION, "keep-alive, Upgrade")
            .header(UPGRADE, "websocket")
            .header(SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .header("Sec-WebSocket-Version", "13")
            .body(Full::new(Bytes::new()))
            .unwrap();

        let response = handle_request(req, f.state).await.unwrap();

        assert_eq!(response.status(), StatusCode::SWITCHING_PROTOCOLS);
        assert_eq!(response.headers()[SEC_WEBSOCKET_ACCEPT], "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[tokio::test]
    async fn test_ws_without_upgrade_is_rejected() {
        let f = fixture();

        let response = handle_request(request(Method::GET, "/ws", ""), f.state).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_server_round_trip_over_tcp() {
        let f = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, f.state.clone(), f.shutdown_tx.subscribe()));

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /zones HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        stream.read_to_string(&mut raw).await.unwrap();

        assert!(raw.starts_with("HTTP/1.1 200 OK"));
        assert!(raw.contains(r#"{"x1":1,"y1":1,"x2":4000,"y2":4000}"#));

        f.shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_websocket_streams_telemetry() {
        let f = fixture();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(listener, f.state.clone(), f.shutdown_tx.subscribe()));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
        for _ in 0..200 {
            if f.telemetry.subscriber_count() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(f.telemetry.subscriber_count(), 1);

        f.telemetry.publish(&TelemetryRecord { id: 2, x: -150, y: 900 });
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(message.to_text().unwrap(), r#"{"id":2,"x":-150,"y":900}"#);

        f.shutdown_tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
