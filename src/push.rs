//! Best-effort browser push notifications for event updates.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use web_push::{
    ContentEncoding, SubscriptionInfo, SubscriptionKeys, VapidSignatureBuilder, WebPushMessage,
    WebPushMessageBuilder,
};

use crate::models::{EventId, PushConfig, VapidKeys};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushKeys {
    pub p256dh: String,
    pub auth: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub endpoint: String,
    pub keys: PushKeys,
}

impl PushSubscription {
    pub fn is_complete(&self) -> bool {
        !self.endpoint.trim().is_empty()
            && !self.keys.p256dh.trim().is_empty()
            && !self.keys.auth.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub data: PushData,
}

impl PushPayload {
    pub fn for_event(config: &PushConfig, public_url: &str, event_id: &EventId) -> Self {
        Self {
            title: format!("{} update", config.app_name),
            body: "A participant joined or updated their availability".into(),
            icon: config.icon.clone(),
            data: PushData {
                url: format!("{}/events/{}", public_url.trim_end_matches('/'), event_id),
            },
        }
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    /// The subscription no longer exists (404/410).
    #[error("subscription gone ({0})")]
    Gone(u16),
    #[error("push service rejected the message ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("push transport error: {0}")]
    Transport(String),
    #[error("could not encrypt or sign the message: {0}")]
    Encoding(String),
    #[error("push is not configured (no VAPID keys)")]
    NotConfigured,
}

impl PushError {
    pub fn status(&self) -> Option<u16> {
        match self {
            PushError::Gone(status) => Some(*status),
            PushError::Rejected { status, .. } => Some(*status),
            PushError::Transport(_) | PushError::Encoding(_) | PushError::NotConfigured => None,
        }
    }
}

#[async_trait]
pub trait PushDelivery: Send + Sync {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError>;
}

/// Web Push sender: encrypts the JSON payload for the subscription
/// (`aes128gcm`), signs a VAPID JWT and posts the result to the endpoint.
pub struct HttpPush {
    client: Client,
    vapid: Option<VapidKeys>,
    subject: String,
}

const PUSH_TTL: u32 = 86_400;

impl HttpPush {
    pub fn new(config: &PushConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build push client")?;
        let vapid = config.vapid_keys();
        if config.enabled && vapid.is_none() {
            warn!("Push: no VAPID keys configured, notifications will not be sent");
        }
        Ok(Self {
            client,
            vapid,
            subject: config.subject.clone(),
        })
    }

    pub fn public_key(&self) -> Option<&str> {
        self.vapid.as_ref().map(|keys| keys.public_key.as_str())
    }

    fn build_message(
        &self,
        subscription: &PushSubscription,
        content: &[u8],
    ) -> Result<WebPushMessage, PushError> {
        let vapid = self.vapid.as_ref().ok_or(PushError::NotConfigured)?;
        let info = SubscriptionInfo {
            endpoint: subscription.endpoint.clone(),
            keys: SubscriptionKeys {
                p256dh: subscription.keys.p256dh.clone(),
                auth: subscription.keys.auth.clone(),
            },
        };

        let mut signer =
            VapidSignatureBuilder::from_base64(&vapid.private_key, web_push::URL_SAFE_NO_PAD, &info)
                .map_err(|e| PushError::Encoding(format!("vapid key: {e}")))?;
        signer.add_claim("sub", self.subject.as_str());
        let signature = signer
            .build()
            .map_err(|e| PushError::Encoding(format!("vapid signature: {e}")))?;

        let mut builder = WebPushMessageBuilder::new(&info);
        builder.set_ttl(PUSH_TTL);
        builder.set_payload(ContentEncoding::Aes128Gcm, content);
        builder.set_vapid_signature(signature);
        builder
            .build()
            .map_err(|e| PushError::Encoding(e.to_string()))
    }
}

#[async_trait]
impl PushDelivery for HttpPush {
    async fn deliver(
        &self,
        subscription: &PushSubscription,
        payload: &PushPayload,
    ) -> Result<(), PushError> {
        let content =
            serde_json::to_vec(payload).map_err(|e| PushError::Encoding(e.to_string()))?;
        let message = self.build_message(subscription, &content)?;

        let mut request = self
            .client
            .post(&subscription.endpoint)
            .header("TTL", message.ttl.to_string());
        if let Some(body) = message.payload {
            for (name, value) in body.crypto_headers {
                request = request.header(name, value);
            }
            request = request
                .header(CONTENT_ENCODING, "aes128gcm")
                .header(CONTENT_TYPE, "application/octet-stream")
                .body(body.content);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| PushError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if resp.status().is_success() {
            return Ok(());
        }
        if status == 404 || status == 410 {
            return Err(PushError::Gone(status));
        }
        let message = resp.text().await.unwrap_or_default();
        Err(PushError::Rejected { status, message })
    }
}

/// Subscriptions per event. An endpoint is registered at most once.
#[derive(Clone, Default)]
pub struct PushRegistry {
    by_endpoint: Arc<DashMap<String, (EventId, PushSubscription)>>,
}

impl PushRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when the endpoint was not registered before.
    pub fn register(&self, event_id: &EventId, subscription: PushSubscription) -> bool {
        self.by_endpoint
            .insert(
                subscription.endpoint.clone(),
                (event_id.clone(), subscription),
            )
            .is_none()
    }

    pub fn remove(&self, endpoint: &str) -> bool {
        self.by_endpoint.remove(endpoint).is_some()
    }

    pub fn subscriptions(&self, event_id: &EventId) -> Vec<PushSubscription> {
        let mut subs: Vec<PushSubscription> = self
            .by_endpoint
            .iter()
            .filter(|entry| &entry.value().0 == event_id)
            .map(|entry| entry.value().1.clone())
            .collect();
        subs.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        subs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDelivery {
    pub endpoint: String,
    pub error: String,
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NotifyReport {
    pub delivered: usize,
    pub total: usize,
    pub failed: Vec<FailedDelivery>,
    pub cleaned: usize,
}

/// Send `payload` to every subscription of `event_id`. Subscriptions the
/// push service reports as gone are dropped from the registry.
pub async fn notify_event(
    registry: &PushRegistry,
    delivery: &dyn PushDelivery,
    event_id: &EventId,
    payload: &PushPayload,
) -> NotifyReport {
    let subs = registry.subscriptions(event_id);
    let mut report = NotifyReport {
        total: subs.len(),
        ..NotifyReport::default()
    };

    for sub in &subs {
        match delivery.deliver(sub, payload).await {
            Ok(()) => report.delivered += 1,
            Err(e) => {
                warn!("Push: delivery to {} failed: {}", sub.endpoint, e);
                if matches!(e, PushError::Gone(_)) && registry.remove(&sub.endpoint) {
                    report.cleaned += 1;
                }
                report.failed.push(FailedDelivery {
                    endpoint: sub.endpoint.clone(),
                    status: e.status(),
                    error: e.to_string(),
                });
            }
        }
    }

    if report.total > 0 {
        info!(
            "Push: event {} delivered {}/{} (cleaned {})",
            event_id, report.delivered, report.total, report.cleaned
        );
    } else {
        debug!("Push: no subscriptions for event {}", event_id);
    }
    report
}
