use std::time::Duration;

use tiny_http::Request;
use tracing::{debug, warn};

use ferrite_trainer::train::Recv;

use crate::state::SharedState;
use crate::util::sse::{format_progress_event, format_sse_keepalive, write_sse, SSE_PREAMBLE};

const KEEPALIVE: Duration = Duration::from_millis(500);

/// `GET /train/events` — Server-Sent Events feed of the current run.
///
/// Takes ownership of `request` so the raw connection can be streamed on,
/// then loops:
/// 1. Waits up to 500 ms for the next progress event.
/// 2. On an event, writes an `event: <type>` frame; `training_complete` and
///    `error` end the stream.
/// 3. On timeout, writes a `: ping` keep-alive.
/// 4. When the channel closes (run stopped, or no run yet) the stream ends.
///
/// Opening a second stream detaches this one; a client disconnect drops the
/// subscription and training carries on unobserved.
pub fn handle(request: Request, state: SharedState) {
    let mut writer = request.into_writer();
    if !write_sse(&mut writer, SSE_PREAMBLE) {
        return;
    }

    let events = state.controller.subscribe();
    loop {
        match events.recv_timeout(KEEPALIVE) {
            Recv::Event(event) => {
                let frame = match format_progress_event(&event) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!(error = %e, kind = event.kind(), "Could not serialize progress event");
                        continue;
                    }
                };
                if !write_sse(&mut writer, &frame) {
                    debug!("SSE client disconnected");
                    return;
                }
                if event.is_terminal() {
                    return;
                }
            }
            Recv::Timeout => {
                if !write_sse(&mut writer, format_sse_keepalive()) {
                    debug!("SSE client disconnected");
                    return;
                }
            }
            Recv::Closed => return,
        }
    }
}
