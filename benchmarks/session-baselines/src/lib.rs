//! Benchmark harness crate for measuring session-layer primitive costs.

use driftline_domain::{Endpoint, EndpointPath, HttpMethod};
use serde_json::json;

/// A representative queued mutation for codec measurements.
pub fn sample_send_message(index: usize) -> Endpoint {
    Endpoint::new(
        EndpointPath::SendMessage {
            channel_id: "messaging:benchmark".into(),
            message_id: format!("m{index}").into(),
        },
        HttpMethod::Post,
    )
    .with_body(json!({"text": format!("benchmark message {index}")}))
}
