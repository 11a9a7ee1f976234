use std::io::Cursor;

use serde::Serialize;
use tiny_http::{Header, Method, Request, Response, StatusCode};
use tracing::debug;

use crate::handlers;
use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Response helpers
// ---------------------------------------------------------------------------

pub type Reply = Response<Cursor<Vec<u8>>>;

fn header(name: &'static str, value: &'static str) -> Header {
    Header::from_bytes(name, value).expect("static ASCII header")
}

pub fn bytes_response(status: u16, content_type: &'static str, body: Vec<u8>) -> Reply {
    let len = body.len();
    Response::new(
        StatusCode(status),
        vec![header("Content-Type", content_type), header("Cache-Control", "no-cache")],
        Cursor::new(body),
        Some(len),
        None,
    )
}

pub fn json_response<T: Serialize>(status: u16, value: &T) -> Reply {
    match serde_json::to_vec(value) {
        Ok(body) => bytes_response(status, "application/json", body),
        Err(e) => error_response(500, &e.to_string()),
    }
}

/// `{"error": "..."}` with the given status.
pub fn error_response(status: u16, message: &str) -> Reply {
    let body = serde_json::json!({ "error": message }).to_string().into_bytes();
    bytes_response(status, "application/json", body)
}

pub fn not_found() -> Reply {
    error_response(404, "not found")
}

// ---------------------------------------------------------------------------
// Request dispatcher
// ---------------------------------------------------------------------------

/// Dispatches incoming requests to the appropriate handler.
///
/// The SSE handler takes ownership of the request to stream on the raw
/// connection; everything else returns a buffered response.
pub fn dispatch(request: Request, state: SharedState) {
    let method = request.method().clone();
    let url = request.url().to_owned();
    let (path, query) = match url.find('?') {
        Some(pos) => (&url[..pos], &url[pos + 1..]),
        None => (url.as_str(), ""),
    };
    debug!(%method, path, "Request");

    if method == Method::Get && path == "/train/events" {
        handlers::events::handle(request, state);
        return;
    }

    let response = match (method, path) {
        (Method::Post, "/start_training") => handlers::training::handle_start(&state),
        (Method::Post, "/stop_training") => handlers::training::handle_stop(&state),
        (Method::Get, "/get_metrics") => handlers::training::handle_metrics(&state),
        (Method::Get, "/get_random_predictions") => handlers::predictions::handle_random(&state),
        (Method::Get, "/sample_image") => handlers::predictions::handle_image(query, &state),
        (Method::Get, "/health") => json_response(200, &serde_json::json!({ "status": "ok" })),
        _ => not_found(),
    };

    let _ = request.respond(response);
}
