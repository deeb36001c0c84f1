// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Stakeholder Notifiers
//
// - LogNotifier: writes the message to the tracing log
// - WebhookNotifier: POSTs the message as JSON (Slack-compatible `text` field)
// - NotificationDispatcher: routes a message to every configured channel,
//   logging failures instead of returning them; `dispatch` does it detached

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::config::{ChannelKind, NotificationsConfig};
use crate::domain::notification::{NotificationError, NotificationMessage, Notifier};

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, channel: &str, message: &NotificationMessage) -> Result<(), NotificationError> {
        info!(
            channel = %channel,
            task_id = %message.task_id,
            outcome = %message.outcome,
            "{}",
            message.subject
        );
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    task_id: String,
    outcome: &'a str,
    subject: &'a str,
    body: &'a str,
}

pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String, timeout: Duration) -> Result<Self, NotificationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, _channel: &str, message: &NotificationMessage) -> Result<(), NotificationError> {
        let payload = WebhookPayload {
            text: format!("{}\n\n{}", message.subject, message.body),
            task_id: message.task_id.to_string(),
            outcome: &message.outcome,
            subject: &message.subject,
            body: &message.body,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotificationError::Delivery(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

/// Fans a message out to named channels.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    channels: BTreeMap<String, Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &NotificationsConfig) -> Result<Self, NotificationError> {
        let mut dispatcher = Self::new();
        for channel in &config.channels {
            let notifier: Arc<dyn Notifier> = match &channel.kind {
                ChannelKind::Log => Arc::new(LogNotifier),
                ChannelKind::Webhook { url, timeout } => Arc::new(WebhookNotifier::new(url.clone(), *timeout)?),
            };
            dispatcher = dispatcher.with_channel(channel.name.clone(), notifier);
        }
        Ok(dispatcher)
    }

    pub fn with_channel(mut self, name: impl Into<String>, notifier: Arc<dyn Notifier>) -> Self {
        self.channels.insert(name.into(), notifier);
        self
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    /// Deliver to every channel. Returns the channels that accepted the
    /// message; failures are logged and skipped.
    pub async fn broadcast(&self, message: &NotificationMessage) -> Vec<String> {
        let deliveries = self.channels.iter().map(|(name, notifier)| async move {
            match notifier.notify(name, message).await {
                Ok(()) => Some(name.clone()),
                Err(e) => {
                    warn!(channel = %name, task_id = %message.task_id, error = %e, "Notification failed");
                    None
                }
            }
        });
        futures::future::join_all(deliveries).await.into_iter().flatten().collect()
    }

    /// Broadcast on a detached task so a slow channel never holds up the
    /// caller. Returns the channels the message was handed to.
    pub fn dispatch(&self, message: NotificationMessage) -> Vec<String> {
        let channels = self.channel_names();
        if channels.is_empty() {
            return channels;
        }
        let dispatcher = self.clone();
        tokio::spawn(async move {
            let delivered = dispatcher.broadcast(&message).await;
            debug!(task_id = %message.task_id, delivered = delivered.len(), "Notifications delivered");
        });
        channels
    }
}
