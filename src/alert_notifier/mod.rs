//! AlertNotifier - Escalation Alerts
//!
//! Fire-and-forget alerting when a camera escalates to a reboot.
//! The webhook payload is Slack-compatible: `{"text": "..."}`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

/// Alert transport
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Incoming-webhook notifier
pub struct WebhookNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            webhook_url,
        })
    }
}

#[async_trait]
impl AlertNotifier for WebhookNotifier {
    async fn notify(&self, message: &str) -> Result<()> {
        let resp = self
            .client
            .post(&self.webhook_url)
            .json(&json!({ "text": message }))
            .send()
            .await
            .map_err(|e| Error::Notify(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Error::Notify(format!("webhook answered {}", resp.status())));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn test_notify_posts_text_payload() {
        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::default();

        let app = Router::new()
            .route(
                "/hook",
                post(
                    |State(rx): State<Arc<Mutex<Vec<serde_json::Value>>>>,
                     Json(body): Json<serde_json::Value>| async move {
                        rx.lock().unwrap().push(body);
                        StatusCode::OK
                    },
                ),
            )
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let notifier = WebhookNotifier::new(format!("http://{}/hook", addr)).unwrap();
        notifier.notify("camera Lab rebooted").await.unwrap();

        let bodies = received.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        assert_eq!(bodies[0]["text"], "camera Lab rebooted");
    }
}
