//! Chat-robot webhook notifications for scale changes.

use std::time::Duration;

use ::http::Method;
use serde::Serialize;
use tracing::{debug, info, warn};

use qscale_cluster::client::{Call, split_http_url};
use qscale_core::{NotifyConfig, ServiceKey};

use crate::error::{RelayError, RelayResult};

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct TextMessage<'a> {
    msgtype: &'static str,
    text: Content<'a>,
    at: At,
    #[serde(rename = "isAtAll")]
    is_at_all: bool,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct At {
    #[serde(rename = "atMobiles")]
    at_mobiles: Vec<String>,
}

#[derive(Debug, Clone)]
struct Webhook {
    url: String,
    endpoint: String,
    path: String,
}

/// Posts a text message to every configured webhook.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    hooks: Vec<Webhook>,
}

impl WebhookNotifier {
    /// Build from `[[notifies]]`. Kinds other than `webhook` are skipped;
    /// a malformed or non-`http` URL is an error.
    pub fn from_configs(configs: &[NotifyConfig]) -> RelayResult<Self> {
        let mut hooks = Vec::with_capacity(configs.len());
        for config in configs {
            if !config.kind.eq_ignore_ascii_case("webhook") {
                warn!(kind = %config.kind, "unsupported notify kind, skipping");
                continue;
            }
            let (endpoint, path) = split_http_url(&config.url)?;
            hooks.push(Webhook {
                url: config.url.clone(),
                endpoint,
                path,
            });
        }
        Ok(Self { hooks })
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Text announced for a replica change.
    pub fn scale_message(key: &ServiceKey, from: u32, to: u32) -> String {
        format!("{key} scaled {from} -> {to}")
    }

    /// JSON body of a plain text robot message.
    pub fn encode(text: &str) -> RelayResult<Vec<u8>> {
        let message = TextMessage {
            msgtype: "text",
            text: Content { content: text },
            at: At {
                at_mobiles: Vec::new(),
            },
            is_at_all: false,
        };
        Ok(serde_json::to_vec(&message)?)
    }

    /// Deliver `text` to every hook in turn. Returns how many accepted it.
    pub async fn notify(&self, text: &str) -> usize {
        let body = match Self::encode(text) {
            Ok(b) => b,
            Err(e) => {
                warn!(error = %e, "notification not encoded");
                return 0;
            }
        };

        let mut delivered = 0;
        for hook in &self.hooks {
            match self.post(hook, body.clone()).await {
                Ok(()) => {
                    debug!(url = %hook.url, "notification delivered");
                    delivered += 1;
                }
                Err(e) => warn!(url = %hook.url, error = %e, "notification failed"),
            }
        }
        if delivered > 0 {
            info!(text, delivered, "scale change announced");
        }
        delivered
    }

    async fn post(&self, hook: &Webhook, body: Vec<u8>) -> RelayResult<()> {
        let resp = Call::new(&hook.endpoint, Method::POST, &hook.path, NOTIFY_TIMEOUT)
            .json("application/json", body)
            .send()
            .await?;
        if !resp.status.is_success() {
            return Err(RelayError::Status {
                url: hook.url.clone(),
                status: resp.status.as_u16(),
            });
        }
        Ok(())
    }
}
