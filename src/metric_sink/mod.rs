//! MetricSink - Occupancy Time Series
//!
//! ## Responsibilities
//!
//! - Record `people_count` samples tagged by room
//! - InfluxDB v2 line-protocol writer
//! - Bounded retry of transient write failures (5xx, 429, transport)

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Measurement name for occupancy samples
pub const MEASUREMENT: &str = "people_count";

/// One occupancy sample
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub room: String,
    pub count: u32,
    pub captured_at: DateTime<Utc>,
}

/// Time-series sink capability
#[async_trait]
pub trait MetricSink: Send + Sync {
    async fn record(&self, sample: &Sample) -> Result<()>;
}

/// Escape a tag value (backslashes, commas, equals signs, spaces)
fn escape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' | ',' | '=' | ' ' => {
                out.push('\\');
                out.push(ch);
            }
            '\n' | '\r' => out.push(' '),
            _ => out.push(ch),
        }
    }
    out
}

/// Render a sample as one line of InfluxDB line protocol (ns precision)
pub fn to_line_protocol(sample: &Sample) -> String {
    let ts = sample.captured_at.timestamp_nanos_opt().unwrap_or_default();
    format!(
        "{},room={} count={}i {}",
        MEASUREMENT,
        escape_tag(&sample.room),
        sample.count,
        ts
    )
}

/// InfluxDB v2 writer
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: reqwest::Url,
    token: String,
    max_attempts: u32,
}

impl InfluxSink {
    /// Create new InfluxSink
    pub fn new(base_url: &str, org: &str, bucket: &str, token: String) -> Result<Self> {
        let write_url = reqwest::Url::parse_with_params(
            &format!("{}/api/v2/write", base_url.trim_end_matches('/')),
            &[("org", org), ("bucket", bucket), ("precision", "ns")],
        )
        .map_err(|e| Error::Config(format!("Invalid INFLUXDB_URL {}: {}", base_url, e)))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            write_url,
            token,
            max_attempts: 3,
        })
    }

    /// Override the number of write attempts (min 1)
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    async fn write_once(&self, body: &str) -> std::result::Result<(), (bool, Error)> {
        let resp = self
            .client
            .post(self.write_url.clone())
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| (true, Error::Sink(format!("write failed: {}", e))))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }

        let retry = status.is_server_error() || status.as_u16() == 429;
        let text = resp.text().await.unwrap_or_default();
        Err((
            retry,
            Error::Sink(format!("write rejected: {} - {}", status, text)),
        ))
    }
}

#[async_trait]
impl MetricSink for InfluxSink {
    async fn record(&self, sample: &Sample) -> Result<()> {
        let line = to_line_protocol(sample);

        let mut attempt = 0;
        loop {
            if attempt > 0 {
                // Exponential backoff
                let delay = Duration::from_millis(100 * 2u64.pow(attempt));
                tokio::time::sleep(delay).await;
            }
            attempt += 1;

            match self.write_once(&line).await {
                Ok(()) => {
                    tracing::trace!(room = %sample.room, count = sample.count, "Sample written");
                    return Ok(());
                }
                Err((true, e)) if attempt < self.max_attempts => {
                    tracing::warn!(
                        room = %sample.room,
                        attempt = attempt,
                        error = %e,
                        "Metric write failed, retrying"
                    );
                }
                Err((_, e)) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Router};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Influx {
        lines: Arc<Mutex<Vec<String>>>,
        calls: Arc<AtomicU32>,
        fail_first: u32,
        status: Option<StatusCode>,
    }

    async fn write(State(db): State<Influx>, body: String) -> StatusCode {
        let n = db.calls.fetch_add(1, Ordering::SeqCst);
        if n < db.fail_first {
            return db.status.unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        }
        db.lines.lock().unwrap().push(body);
        StatusCode::NO_CONTENT
    }

    async fn spawn_influx(db: Influx) -> String {
        let app = Router::new()
            .route("/api/v2/write", post(write))
            .with_state(db);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        format!("http://{}", addr)
    }

    fn sample(room: &str, count: u32) -> Sample {
        Sample {
            room: room.to_string(),
            count,
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_line_protocol() {
        assert_eq!(
            to_line_protocol(&sample("Lab", 4)),
            "people_count,room=Lab count=4i 1714564800000000000"
        );
    }

    #[test]
    fn test_line_protocol_escapes_room() {
        let line = to_line_protocol(&sample("Room 3,a=b", 0));
        assert!(line.starts_with("people_count,room=Room\\ 3\\,a\\=b count=0i "));

        // A trailing backslash must not swallow the field separator
        let line = to_line_protocol(&sample("Lab\\", 1));
        assert!(line.starts_with("people_count,room=Lab\\\\ count=1i "));
    }

    #[tokio::test]
    async fn test_record_writes_line() {
        let db = Influx::default();
        let base = spawn_influx(db.clone()).await;
        let sink = InfluxSink::new(&base, "org", "bucket", "token".to_string()).unwrap();

        sink.record(&sample("Lab", 2)).await.unwrap();

        let lines = db.lines.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("people_count,room=Lab count=2i"));
    }

    #[tokio::test]
    async fn test_record_retries_transient_failure() {
        let db = Influx {
            fail_first: 2,
            ..Default::default()
        };
        let base = spawn_influx(db.clone()).await;
        let sink = InfluxSink::new(&base, "org", "bucket", "token".to_string()).unwrap();

        sink.record(&sample("Lab", 1)).await.unwrap();

        assert_eq!(db.calls.load(Ordering::SeqCst), 3);
        assert_eq!(db.lines.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_record_gives_up_after_max_attempts() {
        let db = Influx {
            fail_first: 10,
            ..Default::default()
        };
        let base = spawn_influx(db.clone()).await;
        let sink = InfluxSink::new(&base, "org", "bucket", "token".to_string())
            .unwrap()
            .with_max_attempts(2);

        let err = sink.record(&sample("Lab", 1)).await.unwrap_err();

        assert!(matches!(err, Error::Sink(_)));
        assert_eq!(db.calls.load(Ordering::SeqCst), 2);
        assert!(db.lines.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_does_not_retry_client_error() {
        let db = Influx {
            fail_first: 10,
            status: Some(StatusCode::UNAUTHORIZED),
            ..Default::default()
        };
        let base = spawn_influx(db.clone()).await;
        let sink = InfluxSink::new(&base, "org", "bucket", "bad".to_string()).unwrap();

        let err = sink.record(&sample("Lab", 1)).await.unwrap_err();

        assert!(matches!(err, Error::Sink(_)));
        assert_eq!(db.calls.load(Ordering::SeqCst), 1);
    }
}
