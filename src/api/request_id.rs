//! Request-id tagging.
//!
//! Every response carries a short `X-Request-ID`, and the handler runs
//! inside a tracing span carrying the same id so log lines correlate.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Short id: the first 8 hex chars of a v4 UUID.
pub fn generate_request_id() -> String {
    let id = uuid::Uuid::new_v4().to_string();
    id.chars().take(8).collect()
}

pub async fn request_id_middleware(request: Request, next: Next) -> Response {
    let request_id = generate_request_id();
    let span = tracing::info_span!("http_request", %request_id);
    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_ids_are_short_hex() {
        let id = generate_request_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn request_ids_are_unique() {
        assert_ne!(generate_request_id(), generate_request_id());
    }
}
