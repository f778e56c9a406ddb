// Best-effort delivery of booking notifications to the chat and webhook channels
//
// Each dispatch runs on its own task. The booking operation that triggered it
// never waits for delivery and never sees its outcome.
use crate::config::NotifierConfig;
use crate::error::NotifyError;
use crate::messages::{BookingCancelMessage, BookingSuccessMessage, WebhookStatus};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn single_attempt() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    Success,
    Cancellation,
}

/// Record of one dispatch: what was sent where, how many attempts it took and how it ended.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEvent {
    pub kind: NotificationKind,
    pub channel: &'static str,
    pub payload: String,
    pub attempts: u32,
    pub outcome: Result<(), NotifyError>,
}

impl NotificationEvent {
    pub fn delivered(&self) -> bool {
        self.outcome.is_ok()
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn retry_policy(&self) -> RetryPolicy;

    async fn deliver(&self, payload: &str) -> Result<(), NotifyError>;
}

// Chat bot API, MarkdownV2 formatted
pub struct TelegramChannel {
    http: reqwest::Client,
    api_url: String,
    bot_token: SecretString,
    chat_id: String,
    policy: RetryPolicy,
}

impl TelegramChannel {
    pub fn new(
        http: reqwest::Client,
        api_url: impl Into<String>,
        bot_token: SecretString,
        chat_id: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            http,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            bot_token,
            chat_id: chat_id.into(),
            policy,
        }
    }

    pub fn from_config(http: reqwest::Client, config: &NotifierConfig) -> Option<Self> {
        let token = config.telegram_bot_token.clone()?;
        let chat_id = config.telegram_chat_id.clone()?;
        Some(Self::new(
            http,
            config.telegram_api_url.clone(),
            token,
            chat_id,
            RetryPolicy {
                max_retries: config.max_retries,
                delay: config.retry_delay,
            },
        ))
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy
    }

    async fn deliver(&self, payload: &str) -> Result<(), NotifyError> {
        let url = format!(
            "{}/bot{}/sendMessage",
            self.api_url,
            self.bot_token.expose_secret()
        );
        let form = [
            ("chat_id", self.chat_id.as_str()),
            ("text", payload),
            ("parse_mode", "MarkdownV2"),
        ];
        let response = self.http.post(&url).form(&form).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let message = response.text().await.unwrap_or_default();
        Err(NotifyError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

// JSON POST to the partner endpoint; one attempt only
pub struct WebhookChannel {
    http: reqwest::Client,
    url: String,
}

impl WebhookChannel {
    pub fn new(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::single_attempt()
    }

    async fn deliver(&self, payload: &str) -> Result<(), NotifyError> {
        let response = self
            .http
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("webhook error").to_string(),
            })
        }
    }
}

/// Bounded retry loop. Sleeps between attempts end early when `shutdown` fires.
pub async fn deliver_with_retries(
    kind: NotificationKind,
    payload: String,
    channel: Arc<dyn NotificationChannel>,
    shutdown: CancellationToken,
) -> NotificationEvent {
    let policy = channel.retry_policy();
    let name = channel.name();
    let mut attempts = 0u32;

    let outcome = loop {
        if shutdown.is_cancelled() {
            break Err(NotifyError::Cancelled);
        }
        attempts += 1;
        match channel.deliver(&payload).await {
            Ok(()) => {
                info!(channel = name, attempt = attempts, "notification delivered");
                break Ok(());
            }
            Err(err) => {
                let retries_left = (policy.max_retries + 1).saturating_sub(attempts);
                if retries_left == 0 || !err.is_retryable() {
                    error!(channel = name, attempt = attempts, error = %err, "notification failed");
                    break Err(err);
                }
                warn!(
                    channel = name,
                    attempt = attempts,
                    retries_left,
                    error = %err,
                    "notification failed, retrying"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => break Err(NotifyError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
            }
        }
    };

    NotificationEvent {
        kind,
        channel: name,
        payload,
        attempts,
        outcome,
    }
}

// An unencodable payload is never posted; it counts as a failed webhook.
async fn deliver_webhook(
    webhook: Arc<dyn NotificationChannel>,
    payload: serde_json::Result<String>,
    shutdown: CancellationToken,
) -> (WebhookStatus, Option<NotificationEvent>) {
    let payload = match payload {
        Ok(payload) => payload,
        Err(e) => {
            error!(
                channel = webhook.name(),
                error = %e,
                "webhook payload could not be encoded, delivery skipped"
            );
            return (WebhookStatus::Failed, None);
        }
    };
    let event = deliver_with_retries(NotificationKind::Success, payload, webhook, shutdown).await;
    let status = if event.delivered() {
        WebhookStatus::Sent
    } else {
        WebhookStatus::Failed
    };
    (status, Some(event))
}

pub struct NotificationDispatcher {
    chat: Option<Arc<dyn NotificationChannel>>,
    webhook: Option<Arc<dyn NotificationChannel>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl NotificationDispatcher {
    pub fn new(
        chat: Option<Arc<dyn NotificationChannel>>,
        webhook: Option<Arc<dyn NotificationChannel>>,
    ) -> Self {
        Self {
            chat,
            webhook,
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    pub fn from_config(http: reqwest::Client, config: &NotifierConfig) -> Self {
        let chat = TelegramChannel::from_config(http.clone(), config)
            .map(|c| Arc::new(c) as Arc<dyn NotificationChannel>);
        if chat.is_none() {
            warn!("chat notifications disabled, bot token or chat id missing");
        }
        let webhook = config
            .webhook_url
            .as_ref()
            .map(|url| Arc::new(WebhookChannel::new(http, url.clone())) as Arc<dyn NotificationChannel>);
        Self::new(chat, webhook)
    }

    // Nothing is ever sent
    pub fn disabled() -> Self {
        Self::new(None, None)
    }

    pub fn has_channels(&self) -> bool {
        self.chat.is_some() || self.webhook.is_some()
    }

    pub fn dispatch(
        &self,
        kind: NotificationKind,
        payload: String,
        channel: Arc<dyn NotificationChannel>,
    ) -> JoinHandle<NotificationEvent> {
        self.tracker
            .spawn(deliver_with_retries(kind, payload, channel, self.shutdown.clone()))
    }

    /// Webhook first so its result can be shown in the chat message, then chat.
    pub fn booking_confirmed(&self, message: BookingSuccessMessage) -> Option<JoinHandle<Vec<NotificationEvent>>> {
        if !self.has_channels() {
            return None;
        }
        let chat = self.chat.clone();
        let webhook = self.webhook.clone();
        let shutdown = self.shutdown.clone();

        Some(self.tracker.spawn(async move {
            let mut events = Vec::new();
            let mut status = WebhookStatus::Skipped;
            if let Some(webhook) = webhook {
                let payload = serde_json::to_string(&message.webhook_payload());
                let (sent, event) = deliver_webhook(webhook, payload, shutdown.clone()).await;
                status = sent;
                events.extend(event);
            }
            if let Some(chat) = chat {
                let text = message.render_chat(status);
                events.push(deliver_with_retries(NotificationKind::Success, text, chat, shutdown).await);
            }
            events
        }))
    }

    pub fn booking_cancelled(&self, message: BookingCancelMessage) -> Option<JoinHandle<NotificationEvent>> {
        let chat = self.chat.clone()?;
        Some(self.dispatch(NotificationKind::Cancellation, message.render_chat(), chat))
    }

    // Waits for every dispatch spawned so far; new ones are accepted afterwards.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    // Cancels pending retry sleeps and waits for in-flight dispatches to finish.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}
