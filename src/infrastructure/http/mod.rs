//! Outbound HTTP: webhooks and callback URLs

pub mod callback;
pub mod webhook;

use std::time::Duration;

use reqwest::Client;

pub use callback::HttpCallbackNotifier;
pub use webhook::{HttpWebhookDispatcher, WebhookConfigError, WebhookSubscription};

pub(crate) fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .connect_timeout(timeout)
        .timeout(timeout)
        .user_agent(concat!("ocpp-router/", env!("CARGO_PKG_VERSION")))
        .build()
}
