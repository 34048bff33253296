//! Callback-URL notifier
//!
//! Modules may attach a callback URL to an outbound call; the station's
//! answer (result or error) is POSTed there once it arrives.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use super::build_client;
use super::webhook::post_json;
use crate::domain::ports::CallbackNotifier;
use crate::domain::WebhookError;

#[derive(Clone)]
pub struct HttpCallbackNotifier {
    client: Client,
}

impl HttpCallbackNotifier {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(timeout)?,
        })
    }
}

#[async_trait]
impl CallbackNotifier for HttpCallbackNotifier {
    async fn notify(&self, url: &str, body: &Value) -> Result<(), WebhookError> {
        post_json(&self.client, url, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn unreachable_callback_is_a_delivery_error() {
        let notifier = HttpCallbackNotifier::new(Duration::from_millis(200)).unwrap();
        let err = notifier
            .notify("http://127.0.0.1:1/callback", &json!({"status": "Accepted"}))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Delivery { ref url, .. } if url == "http://127.0.0.1:1/callback"));
    }
}
