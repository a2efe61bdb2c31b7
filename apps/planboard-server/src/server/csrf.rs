use axum::{
    extract::{Request, State},
    http::{
        header::{HOST, ORIGIN, REFERER},
        HeaderMap, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};
use url::Url;

use super::{core::AppState, metrics::record_csrf_rejection};

const EXEMPT_PATH_PREFIXES: [&str; 4] = ["/static/", "/assets/", "/_app/", "/favicon.ico"];
const MAX_HOST_HEADER_CHARS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CsrfRejection {
    MissingHost,
    MissingSource,
    MalformedSource,
    Mismatch,
}

impl CsrfRejection {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::MissingHost => "missing_host",
            Self::MissingSource => "missing_origin",
            Self::MalformedSource => "malformed_origin",
            Self::Mismatch => "origin_mismatch",
        }
    }
}

/// Host the server answers for, with the port only when one was given explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TrustedHost {
    host: String,
    port: Option<u16>,
}

fn parse_host(value: &str) -> Option<TrustedHost> {
    let value = value.trim();
    if value.is_empty() || value.len() > MAX_HOST_HEADER_CHARS {
        return None;
    }
    let (host, port) = if let Some(rest) = value.strip_prefix('[') {
        let (address, after) = rest.split_once(']')?;
        let port = match after {
            "" => None,
            _ => Some(after.strip_prefix(':')?.parse::<u16>().ok()?),
        };
        (format!("[{address}]"), port)
    } else {
        match value.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => return None,
            Some((host, port)) => (host.to_owned(), Some(port.parse::<u16>().ok()?)),
            None => (value.to_owned(), None),
        }
    };
    if host.is_empty()
        || host
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '/' | '@' | '?' | '#'))
    {
        return None;
    }
    Some(TrustedHost {
        host: host.to_ascii_lowercase(),
        port,
    })
}

fn trusted_host(headers: &HeaderMap, trust_proxy_headers: bool) -> Option<TrustedHost> {
    let forwarded = trust_proxy_headers
        .then(|| headers.get("x-forwarded-host"))
        .flatten()
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next());
    let raw = match forwarded {
        Some(value) => value,
        None => headers.get(HOST)?.to_str().ok()?,
    };
    parse_host(raw)
}

fn source_matches(source: &Url, trusted: &TrustedHost) -> bool {
    if !matches!(source.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = source.host_str() else {
        return false;
    };
    if !host.eq_ignore_ascii_case(&trusted.host) {
        return false;
    }
    match trusted.port {
        Some(port) => source.port_or_known_default() == Some(port),
        None => source.port().is_none(),
    }
}

/// `Origin` wins when present; `Referer` is only consulted without it.
pub(crate) fn check_same_origin(
    headers: &HeaderMap,
    trust_proxy_headers: bool,
) -> Result<(), CsrfRejection> {
    let trusted = trusted_host(headers, trust_proxy_headers).ok_or(CsrfRejection::MissingHost)?;
    let source = headers
        .get(ORIGIN)
        .or_else(|| headers.get(REFERER))
        .ok_or(CsrfRejection::MissingSource)?;
    let source = source
        .to_str()
        .ok()
        .and_then(|value| Url::parse(value).ok())
        .ok_or(CsrfRejection::MalformedSource)?;
    if source_matches(&source, &trusted) {
        Ok(())
    } else {
        Err(CsrfRejection::Mismatch)
    }
}

fn is_exempt(method: &Method, path: &str) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
        || EXEMPT_PATH_PREFIXES
            .iter()
            .any(|prefix| path.starts_with(prefix))
}

pub(crate) async fn csrf_guard(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if is_exempt(request.method(), request.uri().path()) {
        return next.run(request).await;
    }
    if let Err(rejection) = check_same_origin(request.headers(), state.runtime.trust_proxy_headers)
    {
        record_csrf_rejection(rejection.as_str());
        tracing::warn!(
            event = "csrf.reject",
            reason = rejection.as_str(),
            method = %request.method(),
            path = request.uri().path()
        );
        return StatusCode::FORBIDDEN.into_response();
    }
    next.run(request).await
}
