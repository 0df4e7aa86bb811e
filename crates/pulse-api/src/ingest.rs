//! Middleware around the ingest routes.
//!
//! [`open_envelope`] runs before the ingest handlers: it enforces the
//! trusted subnet, then decrypts, verifies and decompresses the body so
//! handlers only ever see plain JSON. [`sign_response`] wraps every route
//! and adds a `HashSHA256` header when a shared key is configured.

use std::net::IpAddr;

use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

use pulse_envelope::{Incoming, ENCRYPTED_HEADER, ENCRYPTION_SCHEME, SIGNATURE_HEADER};

use crate::error::ApiError;
use crate::ApiState;

/// Header carrying the agent's own address.
pub const REAL_IP_HEADER: &str = "X-Real-IP";

/// Raw bodies may be larger than the opened payload (RSA blocks expand it).
const RAW_BODY_FACTOR: usize = 4;

/// Check the client subnet and unwrap the request envelope.
pub async fn open_envelope(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(subnet) = &state.trusted_subnet {
        let ip = client_ip(request.headers()).ok_or_else(|| {
            ApiError::Forbidden(format!("missing or invalid {REAL_IP_HEADER} header"))
        })?;
        if !subnet.contains(ip) {
            return Err(ApiError::Forbidden(format!(
                "{ip} is outside the trusted subnet {subnet}"
            )));
        }
    }

    let (mut parts, body) = request.into_parts();
    let limit = state.opener.max_body().saturating_mul(RAW_BODY_FACTOR);
    let raw = to_bytes(body, limit)
        .await
        .map_err(|e| ApiError::BadRequest(format!("reading request body: {e}")))?;

    let incoming = Incoming {
        gzip: is_gzip(&parts.headers)?,
        signature: parts
            .headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok()),
        encrypted: is_encrypted(&parts.headers)?,
    };
    let opened = state.opener.open(&raw, incoming)?;
    debug!(raw = raw.len(), opened = opened.len(), "request envelope opened");

    // The body is plain from here on.
    parts.headers.remove(CONTENT_ENCODING);
    parts.headers.remove(CONTENT_LENGTH);
    parts.headers.remove(SIGNATURE_HEADER);
    parts.headers.remove(ENCRYPTED_HEADER);

    let request = Request::from_parts(parts, Body::from(opened));
    Ok(next.run(request).await)
}

/// Sign the (uncompressed) response body with the shared key.
pub async fn sign_response(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;
    let Some(signer) = state.opener.signer() else {
        return response;
    };

    let (mut parts, body) = response.into_parts();
    let bytes = match to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "failed to buffer response for signing");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match signer.sign(&bytes) {
        Ok(signature) => {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(SIGNATURE_HEADER.as_bytes()),
                HeaderValue::from_str(&signature),
            ) {
                parts.headers.insert(name, value);
            }
        }
        Err(e) => warn!(error = %e, "failed to sign response"),
    }
    Response::from_parts(parts, Body::from(bytes))
}

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    headers
        .get(REAL_IP_HEADER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

fn is_gzip(headers: &HeaderMap) -> Result<bool, ApiError> {
    let Some(value) = headers.get(CONTENT_ENCODING) else {
        return Ok(false);
    };
    match value.to_str().map(str::trim) {
        Ok(enc) if enc.eq_ignore_ascii_case("gzip") => Ok(true),
        Ok(enc) if enc.is_empty() || enc.eq_ignore_ascii_case("identity") => Ok(false),
        _ => Err(ApiError::BadRequest(format!(
            "unsupported content encoding {value:?}"
        ))),
    }
}

fn is_encrypted(headers: &HeaderMap) -> Result<bool, ApiError> {
    match headers.get(ENCRYPTED_HEADER) {
        None => Ok(false),
        Some(v) if v.as_bytes().eq_ignore_ascii_case(ENCRYPTION_SCHEME.as_bytes()) => Ok(true),
        Some(v) => Err(ApiError::BadRequest(format!(
            "unsupported encryption scheme {v:?}"
        ))),
    }
}
