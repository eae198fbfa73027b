//! Build log aggregation
//!
//! Turns the image build service's event stream into one human-readable
//! `<service>.log` per service. Each file has a permanent, append-only
//! region followed by an ephemeral block showing in-flight transfers.

pub mod processor;
pub mod status;
pub mod store;

pub use processor::{EventProcessor, ListenerRegistry, LogListener};
pub use status::{humanize_bytes, short_id, StatusMultiplexer, StatusOutcome, VertexStatus};
pub use store::LogStore;

use chrono::{DateTime, Local, Utc};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %z";

/// Render a timestamp in local time, as shown inside `[...]` on every log line
pub fn format_timestamp(when: DateTime<Utc>) -> String {
    when.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string()
}

/// Build the `[<timestamp>] <message>` form of a log line, without newline
pub fn format_line(when: DateTime<Utc>, message: &str) -> String {
    format!("[{}] {}", format_timestamp(when), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line_wraps_local_timestamp() {
        let when = Utc::now();
        let line = format_line(when, "[1/3] FROM alpine");
        assert!(line.starts_with('['));
        assert!(line.ends_with("] [1/3] FROM alpine"));
        assert!(line.contains(&when.with_timezone(&Local).format("%Y-%m-%d").to_string()));
    }
}
