use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::HttpBody;
use hyper::header::{HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::hub::HubService;
use crate::tasks;
use crate::{Error, Result};

/// Largest event delivery accepted, in bytes.
pub const MAX_DELIVERY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    message: String,
}

/// HTTP status for a delivery that failed with `err`.
pub fn status_of(err: &Error) -> StatusCode {
    match err {
        Error::Unauthorized => StatusCode::UNAUTHORIZED,
        Error::InvalidPayload(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Body> {
    let mut response = Response::new(Body::from(serde_json::to_vec(body).unwrap_or_default()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn error_response(err: &Error) -> Response<Body> {
    json_response(
        status_of(err),
        &ErrorBody {
            kind: err.kind(),
            message: err.to_string(),
        },
    )
}

fn too_large(limit: usize) -> Error {
    Error::InvalidPayload(format!("delivery exceeds {} bytes", limit))
}

/// Collect `body`, failing as soon as it grows past `limit` bytes.
async fn read_body(mut body: Body, limit: usize) -> Result<Vec<u8>> {
    if body.size_hint().lower() > limit as u64 {
        return Err(too_large(limit));
    }
    let mut bytes = Vec::new();
    while let Some(chunk) = body.data().await {
        let chunk = chunk
            .map_err(|err| Error::InvalidPayload(format!("failed to read body: {}", err)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(too_large(limit));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn handle(service: Arc<HubService>, req: Request<Body>) -> Response<Body> {
    if req.method() != Method::POST {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::METHOD_NOT_ALLOWED;
        return response;
    }
    let authorization = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    if let Err(err) = service.reconciler().authenticate(authorization.as_deref()) {
        warn!("Rejected event delivery without valid credentials");
        return error_response(&err);
    }
    let declared = req
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared.is_some_and(|len| len > MAX_DELIVERY_BYTES as u64) {
        warn!("Rejected event delivery of {:?} bytes", declared);
        return error_response(&too_large(MAX_DELIVERY_BYTES));
    }
    let body = match read_body(req.into_body(), MAX_DELIVERY_BYTES).await {
        Ok(body) => body,
        Err(err) => {
            warn!("Failed to read event delivery: {}", err);
            return error_response(&err);
        }
    };
    debug!("Received event delivery of {} bytes", body.len());
    match service
        .apply_event_delivery(authorization.as_deref(), &body)
        .await
    {
        Ok(report) => json_response(StatusCode::OK, &report),
        Err(err) => {
            error!("Failed to apply event delivery: {}", err);
            error_response(&err)
        }
    }
}

/// Serve settlement event deliveries on `addr` until `token` is cancelled.
pub async fn start_webhook(
    addr: &str,
    service: Arc<HubService>,
    token: CancellationToken,
) -> Result<SocketAddr> {
    let addr: SocketAddr = addr.parse().map_err(|err| {
        Error::InvalidParameter(format!("invalid webhook address {}: {}", addr, err))
    })?;
    let make_service = make_service_fn(move |_conn| {
        let service = service.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let service = service.clone();
                async move { Ok::<_, Infallible>(handle(service, req).await) }
            }))
        }
    });
    let server = Server::try_bind(&addr)
        .map_err(std::io::Error::other)?
        .serve(make_service);
    let local_addr = server.local_addr();
    let server = server.with_graceful_shutdown(async move { token.cancelled().await });
    tasks::spawn("webhook server", async move {
        if let Err(err) = server.await {
            error!("Webhook server stopped with error: {}", err);
        }
    });
    info!("Webhook listening on {}", local_addr);
    Ok(local_addr)
}
