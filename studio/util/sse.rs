use std::io::Write;

use ferrite_trainer::train::ProgressEvent;

// ---------------------------------------------------------------------------
// SSE framing helpers
// ---------------------------------------------------------------------------

/// Status line and headers written before the first frame. tiny_http has no
/// streaming body, so the handler writes these on the raw connection.
pub const SSE_PREAMBLE: &str = "HTTP/1.1 200 OK\r\n\
                                Content-Type: text/event-stream\r\n\
                                Cache-Control: no-cache\r\n\
                                Connection: keep-alive\r\n\
                                X-Accel-Buffering: no\r\n\
                                \r\n";

/// Formats a named SSE event with a JSON data payload.
///
/// Output format:
/// ```text
/// event: <name>
/// data: <json>
///
/// ```
pub fn format_sse_event(event_name: &str, json_data: &str) -> String {
    format!("event: {}\ndata: {}\n\n", event_name, json_data)
}

/// One progress event as a frame named after its `type`.
pub fn format_progress_event(event: &ProgressEvent) -> serde_json::Result<String> {
    Ok(format_sse_event(event.kind(), &serde_json::to_string(event)?))
}

/// Keep-alive comment. Ignored by `EventSource` clients but stops idle
/// proxies from closing the connection.
pub fn format_sse_keepalive() -> &'static str {
    ": ping\n\n"
}

/// Writes and flushes one message. `false` means the client went away.
pub fn write_sse<W: Write>(writer: &mut W, msg: &str) -> bool {
    writer.write_all(msg.as_bytes()).is_ok() && writer.flush().is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_frame_is_named_after_its_type() {
        let event = ProgressEvent::BatchUpdate { epoch: 1, batch: 4, loss: 0.5, accuracy: 0.75 };
        let frame = format_progress_event(&event).unwrap();
        assert!(frame.starts_with("event: batch_update\ndata: {"));
        assert!(frame.contains("\"batch\":4"));
        assert!(frame.ends_with("\n\n"));
    }

    #[test]
    fn write_reports_success() {
        let mut buf = Vec::new();
        assert!(write_sse(&mut buf, format_sse_keepalive()));
        assert_eq!(buf, b": ping\n\n");
    }
}
