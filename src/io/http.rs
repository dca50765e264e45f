//! HTTP adapter
//!
//! Thin hyper http1 front end over `CurfewMonitor` and `SubjectDirectory`.
//! Requests are validated here; malformed ids, bodies and positions are
//! answered with 400 and never reach the monitor.
//!
//! Routes:
//! - `PUT|GET|DELETE /parolees/{id}/curfew`
//! - `POST /parolees/{id}/movements`, `GET /parolees/{id}/movements/latest`
//! - `GET /parolees/{id}/violations` - long-poll for the next violation
//! - `GET /movements/stream?ids=1,2` - NDJSON movement stream
//! - `PUT /movements/streams/{streamId}/interest`
//! - `PUT /parolees-test/reset`
//! - `GET /health`, `GET /metrics`

use crate::domain::types::{Curfew, Movement, MovementNotification, SubjectId};
use crate::infra::config::Config;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::directory::SubjectDirectory;
use crate::services::monitor::CurfewMonitor;
use crate::services::subscription::{Resolution, StreamId, StreamReceiver};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full, Limited};
use hyper::body::{Body, Frame, Incoming};
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use url::form_urlencoded;

pub type ResponseBody = BoxBody<Bytes, Infallible>;

/// Header carrying the id of a newly opened movement stream
pub const STREAM_ID_HEADER: &str = "x-stream-id";

const MAX_BODY_BYTES: usize = 64 * 1024;

/// Request rejected before reaching the monitor
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn into_response(self) -> Response<ResponseBody> {
        json_response(self.status(), &ErrorBody { error: self.to_string() })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InterestRequest {
    parolee_ids: Vec<SubjectId>,
}

/// Shared state behind every connection
pub struct HttpState {
    monitor: Arc<CurfewMonitor>,
    directory: SubjectDirectory,
    site_id: String,
    long_poll_timeout: Option<Duration>,
}

impl HttpState {
    pub fn new(
        monitor: Arc<CurfewMonitor>,
        site_id: impl Into<String>,
        long_poll_timeout: Option<Duration>,
    ) -> Self {
        Self { monitor, directory: SubjectDirectory::new(), site_id: site_id.into(), long_poll_timeout }
    }

    pub fn from_config(monitor: Arc<CurfewMonitor>, config: &Config) -> Self {
        Self::new(monitor, config.site_id(), config.long_poll_timeout())
    }
}

fn full(bytes: impl Into<Bytes>) -> ResponseBody {
    Full::new(bytes.into()).boxed()
}

fn empty_response(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(Empty::<Bytes>::new().boxed());
    *response.status_mut() = status;
    response
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: String,
) -> Response<ResponseBody> {
    let mut response = Response::new(full(body));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<ResponseBody> {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = Response::new(full(body));
            *response.status_mut() = status;
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => {
            error!(error = %e, "http_response_encode_failed");
            empty_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn parse_subject_id(raw: &str) -> Result<SubjectId, ApiError> {
    raw.parse().map_err(|_| ApiError::BadRequest(format!("invalid parolee id {raw:?}")))
}

/// Parse `ids=1,2,3` from a url-encoded query string; absent or empty means no interest
fn parse_interest_query(query: Option<&str>) -> Result<Vec<SubjectId>, ApiError> {
    let Some(query) = query else {
        return Ok(Vec::new());
    };

    let mut ids = Vec::new();
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key != "ids" {
            continue;
        }
        for raw in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            ids.push(parse_subject_id(raw)?);
        }
    }
    Ok(ids)
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, ApiError> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable body: {e}")))?
        .to_bytes();

    serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("invalid json: {e}")))
}

/// Deregisters a stream when its response body is dropped (client went away)
struct StreamGuard {
    monitor: Arc<CurfewMonitor>,
    id: StreamId,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.monitor.unsubscribe_stream(self.id);
    }
}

/// Response body emitting one JSON `MovementNotification` per line
struct MovementStreamBody {
    rx: StreamReceiver,
    _guard: StreamGuard,
}

impl Body for MovementStreamBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        loop {
            match this.rx.poll_recv(cx) {
                Poll::Ready(Some(notification)) => match encode_line(&notification) {
                    Ok(line) => return Poll::Ready(Some(Ok(Frame::data(line)))),
                    Err(e) => {
                        warn!(stream_id = %this.rx.id(), error = %e, "stream_encode_failed");
                    }
                },
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn encode_line(notification: &MovementNotification) -> serde_json::Result<Bytes> {
    let mut line = serde_json::to_vec(notification)?;
    line.push(b'\n');
    Ok(Bytes::from(line))
}

async fn put_curfew(
    req: Request<Incoming>,
    state: &HttpState,
    subject_id: SubjectId,
) -> Result<Response<ResponseBody>, ApiError> {
    let curfew: Curfew = read_json(req).await?;
    if !curfew.is_valid() {
        return Err(ApiError::BadRequest("invalid confinement location or radius".into()));
    }

    state.directory.set_curfew(subject_id, curfew);
    info!(
        subject_id = %subject_id,
        start = %curfew.start_time,
        end = %curfew.end_time,
        radius_m = %curfew.confinement_radius_meters,
        "curfew_set"
    );
    Ok(empty_response(StatusCode::NO_CONTENT))
}

async fn post_movement(
    req: Request<Incoming>,
    state: &HttpState,
    subject_id: SubjectId,
) -> Result<Response<ResponseBody>, ApiError> {
    let movement: Movement = read_json(req).await?;
    if !movement.position.is_valid() {
        return Err(ApiError::BadRequest(format!("invalid position {}", movement.position)));
    }

    let curfew = state.directory.record_movement(subject_id, movement);
    debug!(
        subject_id = %subject_id,
        timestamp = %movement.timestamp,
        position = %movement.position,
        "movement_recorded"
    );
    state.monitor.on_movement(subject_id, movement, curfew);
    Ok(empty_response(StatusCode::CREATED))
}

async fn await_violation(
    state: &HttpState,
    subject_id: SubjectId,
) -> Result<Response<ResponseBody>, ApiError> {
    let rx = state.monitor.subscribe_one_shot(subject_id);

    let resolution = match state.long_poll_timeout {
        Some(limit) => match tokio::time::timeout(limit, rx).await {
            Ok(resolution) => resolution,
            Err(_) => {
                debug!(subject_id = %subject_id, "violation_poll_timeout");
                return Ok(empty_response(StatusCode::NO_CONTENT));
            }
        },
        None => rx.await,
    };

    debug!(subject_id = %subject_id, resolution = %resolution.as_str(), "violation_poll_completed");
    match resolution {
        Resolution::Violation(event) => Ok(json_response(StatusCode::OK, &event)),
        Resolution::Cancelled => Err(ApiError::Unavailable("subscription cancelled".into())),
    }
}

fn open_stream(state: &HttpState, query: Option<&str>) -> Result<Response<ResponseBody>, ApiError> {
    let interest = parse_interest_query(query)?;

    let (sub, rx) = state.monitor.subscribe_stream();
    sub.set_interest(interest);
    let id = sub.id();
    drop(sub);

    let body = MovementStreamBody {
        rx,
        _guard: StreamGuard { monitor: state.monitor.clone(), id },
    };

    let mut response = Response::new(body.boxed());
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    if let Ok(value) = HeaderValue::try_from(id.to_string()) {
        response.headers_mut().insert(HeaderName::from_static(STREAM_ID_HEADER), value);
    }
    Ok(response)
}

async fn put_interest(
    req: Request<Incoming>,
    state: &HttpState,
    raw_id: &str,
) -> Result<Response<ResponseBody>, ApiError> {
    let id: StreamId = raw_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid stream id {raw_id:?}")))?;
    let request: InterestRequest = read_json(req).await?;

    let sub = state
        .monitor
        .find_stream(id)
        .ok_or_else(|| ApiError::NotFound(format!("stream {id}")))?;
    sub.set_interest(request.parolee_ids);
    debug!(stream_id = %id, interest = ?sub.interest(), "stream_interest_updated");
    Ok(empty_response(StatusCode::NO_CONTENT))
}

fn reset(state: &HttpState) -> Response<ResponseBody> {
    let subjects = state.directory.clear();
    let cancelled = state.monitor.reset_all();
    info!(subjects = %subjects, cancelled = %cancelled, "test_state_reset");
    empty_response(StatusCode::NO_CONTENT)
}

fn require(method: &Method, allowed: Method) -> Result<(), ApiError> {
    if *method == allowed {
        Ok(())
    } else {
        Err(ApiError::MethodNotAllowed(method.clone()))
    }
}

async fn route(req: Request<Incoming>, state: &HttpState) -> Result<Response<ResponseBody>, ApiError> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match segments.as_slice() {
        ["health"] => {
            require(&method, Method::GET)?;
            Ok(text_response(StatusCode::OK, "text/plain", "ok".to_string()))
        }
        ["metrics"] => {
            require(&method, Method::GET)?;
            state.monitor.sample_gauges();
            let body = format_prometheus_metrics(state.monitor.metrics(), &state.site_id);
            Ok(text_response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body))
        }
        ["parolees", id, "curfew"] => {
            let subject_id = parse_subject_id(id)?;
            match method {
                Method::PUT => put_curfew(req, state, subject_id).await,
                Method::GET => state
                    .directory
                    .curfew(subject_id)
                    .map(|curfew| json_response(StatusCode::OK, &curfew))
                    .ok_or_else(|| ApiError::NotFound(format!("curfew for parolee {subject_id}"))),
                Method::DELETE => {
                    state.directory.remove_curfew(subject_id);
                    info!(subject_id = %subject_id, "curfew_removed");
                    Ok(empty_response(StatusCode::NO_CONTENT))
                }
                other => Err(ApiError::MethodNotAllowed(other)),
            }
        }
        ["parolees", id, "movements"] => {
            require(&method, Method::POST)?;
            post_movement(req, state, parse_subject_id(id)?).await
        }
        ["parolees", id, "movements", "latest"] => {
            require(&method, Method::GET)?;
            let subject_id = parse_subject_id(id)?;
            state
                .directory
                .latest_movement(subject_id)
                .map(|movement| json_response(StatusCode::OK, &movement))
                .ok_or_else(|| ApiError::NotFound(format!("movements for parolee {subject_id}")))
        }
        ["parolees", id, "violations"] => {
            require(&method, Method::GET)?;
            await_violation(state, parse_subject_id(id)?).await
        }
        ["movements", "stream"] => {
            require(&method, Method::GET)?;
            open_stream(state, query.as_deref())
        }
        ["movements", "streams", id, "interest"] => {
            require(&method, Method::PUT)?;
            put_interest(req, state, id).await
        }
        ["parolees-test", "reset"] => {
            require(&method, Method::PUT)?;
            Ok(reset(state))
        }
        _ => Err(ApiError::NotFound(format!("no route for {path}"))),
    }
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<HttpState>,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match route(req, &state).await {
        Ok(response) => Ok(response),
        Err(e) => {
            debug!(method = %method, path = %path, error = %e, "http_request_rejected");
            Ok(e.into_response())
        }
    }
}

/// Bind to the configured address and serve until shutdown
pub async fn start_http_server(
    config: &Config,
    state: Arc<HttpState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = format!("{}:{}", config.http_bind_address(), config.http_port());
    let listener = TcpListener::bind(&addr).await?;
    serve(listener, state, shutdown).await
}

/// Serve connections from an already bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    state: Arc<HttpState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(error = %e, "http_connection_error");
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
    use crate::domain::types::GeoPosition;
    use crate::infra::metrics::Metrics;
    use crate::services::executor::InlineExecutor;
    use chrono::NaiveDate;

    fn inline_monitor() -> Arc<CurfewMonitor> {
        Arc::new(CurfewMonitor::with_executor(Arc::new(InlineExecutor), 8, Arc::new(Metrics::new())))
    }

    #[test]
    fn test_parse_interest_query() {
        assert!(parse_interest_query(None).unwrap().is_empty());
        assert!(parse_interest_query(Some("ids=")).unwrap().is_empty());
        assert_eq!(
            parse_interest_query(Some("ids=1,2")).unwrap(),
            vec![SubjectId(1), SubjectId(2)]
        );
        assert_eq!(
            parse_interest_query(Some("x=y&ids=3%2C4")).unwrap(),
            vec![SubjectId(3), SubjectId(4)]
        );
        assert!(parse_interest_query(Some("ids=1,abc")).is_err());
    }

    #[test]
    fn test_parse_interest_query_decodes_percent_escapes() {
        assert_eq!(
            parse_interest_query(Some("ids=1%2C%202&ids=%33")).unwrap(),
            vec![SubjectId(1), SubjectId(2), SubjectId(3)]
        );
        assert_eq!(parse_interest_query(Some("ids=5+,+6")).unwrap(), vec![SubjectId(5), SubjectId(6)]);
        assert!(parse_interest_query(Some("ids=%2D")).is_err());
    }

    #[test]
    fn test_api_error_status() {
        assert_eq!(ApiError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            ApiError::MethodNotAllowed(Method::PATCH).status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(ApiError::Unavailable("x".into()).status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_parse_subject_id() {
        assert_eq!(parse_subject_id("42").unwrap(), SubjectId(42));
        assert!(matches!(parse_subject_id("forty-two"), Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_stream_body_emits_ndjson_and_deregisters_on_drop() {
        let monitor = inline_monitor();
        let state = HttpState::new(monitor.clone(), "test", None);

        let response = open_stream(&state, Some("ids=1")).unwrap();
        assert!(response.headers().contains_key(STREAM_ID_HEADER));
        assert_eq!(monitor.registry().stream_count(), 1);

        let ts = NaiveDate::from_ymd_opt(2021, 8, 15).unwrap().and_hms_opt(12, 0, 0).unwrap();
        let movement = Movement::new(ts, GeoPosition::new(-36.8, 174.8));
        monitor.on_movement(SubjectId(1), movement, None);

        let mut body = response.into_body();
        let frame = body.frame().await.unwrap().unwrap();
        let line = frame.into_data().unwrap();
        assert_eq!(line.last(), Some(&b'\n'));

        let decoded: MovementNotification = serde_json::from_slice(&line).unwrap();
        assert_eq!(decoded, MovementNotification { subject_id: SubjectId(1), movement });

        drop(body);
        assert_eq!(monitor.registry().stream_count(), 0);
    }

    #[test]
    fn test_encode_line_uses_parolee_id() {
        let ts = NaiveDate::from_ymd_opt(2021, 8, 15).unwrap().and_hms_opt(22, 0, 0).unwrap();
        let line = encode_line(&MovementNotification {
            subject_id: SubjectId(7),
            movement: Movement::new(ts, GeoPosition::new(1.0, 2.0)),
        })
        .unwrap();
        let text = std::str::from_utf8(&line).unwrap();

        assert!(text.starts_with(r#"{"paroleeId":7,"movement":{"timestamp":"2021-08-15T22:00:00""#));
        assert!(text.ends_with('\n'));
    }
}
