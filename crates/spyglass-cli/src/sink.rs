//! Terminal rendering of the captured timeline
//!
//! [`TimelineSink`] is the CLI's presentation layer: a listener on both the
//! client (lifecycle) and the store (content) that prints one line per
//! event. It renders from the notification callback directly; a terminal
//! has no UI thread to hop to.

use std::sync::Arc;

use spyglass_core::{CapturedMessage, ClientListener, ControlError, ControlEvent, MessageListener};

/// Stdout timeline renderer with text and JSON-lines modes.
pub struct TimelineSink {
    json_output: bool,
}

impl TimelineSink {
    pub fn new(json_output: bool) -> Self {
        Self { json_output }
    }

    fn status(&self, event: &str, detail: Option<&str>) {
        if self.json_output {
            let payload = serde_json::json!({ "event": event, "detail": detail });
            println!("{payload}");
        } else {
            match detail {
                Some(detail) => println!("* {detail}"),
                None => println!("* {event}"),
            }
        }
    }
}

impl ClientListener for TimelineSink {
    fn on_connected(&self) {
        self.status("connected", Some("Connected"));
    }

    fn on_disconnected(&self) {
        self.status("disconnected", Some("Disconnected"));
    }
}

impl MessageListener for TimelineSink {
    fn on_message(&self, message: Arc<CapturedMessage>) {
        match message.control_event() {
            Some(Ok(ControlEvent::ServerIdentity(identity))) => {
                self.status(
                    "server-identity",
                    Some(&format!(
                        "Connected to {} ({})",
                        identity.server_name, identity.server_description
                    )),
                );
            }
            Some(Err(ControlError::UnknownCode(code))) => {
                tracing::warn!("unknown control code {}", code);
                self.status(
                    "unknown-control",
                    Some(&format!("Received unknown control message (code {code})")),
                );
            }
            Some(Err(e)) => {
                tracing::warn!("malformed control message: {}", e);
                self.status("malformed-control", Some(&e.to_string()));
            }
            None => {
                if self.json_output {
                    println!("{}", serde_json::to_string(&*message).unwrap_or_default());
                } else {
                    println!("{}", exchange_line(&message));
                }
            }
        }
    }
}

/// One text-mode timeline line for a captured exchange.
fn exchange_line(message: &CapturedMessage) -> String {
    let timestamp = message
        .timestamp
        .map(format_timestamp)
        .unwrap_or_else(|| "--:--:--.---".to_string());

    match (&message.method, message.status_code) {
        (Some(method), _) => format!(
            "[{}] > {} {}",
            timestamp,
            method,
            message.url.as_deref().unwrap_or("-")
        ),
        (None, Some(status)) => format!(
            "[{}] < {} {} ({})",
            timestamp,
            status,
            message.request_id.as_deref().unwrap_or("-"),
            message.body_format
        ),
        (None, None) => format!("[{}] ? {}", timestamp, message.message_id),
    }
}

fn format_timestamp(millis: u64) -> String {
    let secs = millis / 1000;
    let mins = secs / 60;
    let hours = mins / 60;
    format!(
        "{:02}:{:02}:{:02}.{:03}",
        hours % 24,
        mins % 60,
        secs % 60,
        millis % 1000
    )
}
