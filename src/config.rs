// Per-request configuration resolved from plugin parameters with environment overrides
use crate::error::FailureKind;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

pub const MARKETPLACE_ID: &str = "TOURCMS_ACCOUNT_ID";
pub const CHANNEL_ID: &str = "TOURCMS_CHANNEL_ID";
pub const PRIVATE_KEY: &str = "TOURCMS_PRIVATE_KEY";
pub const API_KEY_OVERRIDE: &str = "TOURCMS_API_KEY";
pub const FILTER_IDS: &str = "TOURCMS_FILTER_IDS";
pub const SMTP_SERVER: &str = "SMTP_SERVER";
pub const SMTP_USERNAME: &str = "SMTP_USERNAME";
pub const SMTP_PASSWORD: &str = "SMTP_PASSWORD";
pub const MAIL_CC: &str = "MAIL_CC";

pub const TELEGRAM_BOT_TOKEN: &str = "TELEGRAM_BOT_TOKEN";
pub const TELEGRAM_GROUP_ID: &str = "TELEGRAM_GROUP_ID";
pub const TELEGRAM_MAX_RETRIES: &str = "TELEGRAM_MAX_RETRIES";
pub const TELEGRAM_RETRY_DELAY: &str = "TELEGRAM_RETRY_DELAY";
pub const WEBHOOK_URL: &str = "WEBHOOK_URL";

pub const MARKETPLACE_ACCESS_KEY: &str = "BOKUN_API_KEY";
pub const MARKETPLACE_SECRET: &str = "BOKUN_SECRET";

pub const DEFAULT_UPSTREAM_URL: &str = "https://api.tourcms.com";
pub const DEFAULT_MARKETPLACE_URL: &str = "https://api.bokun.io";
pub const DEFAULT_TELEGRAM_URL: &str = "https://api.telegram.org";

// A name/value pair as delivered by the marketplace with every plugin call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginParameter {
    pub name: String,
    pub value: String,
}

impl PluginParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub marketplace_id: String,
    pub channel_id: String,
    pub private_key: SecretString,
}

impl Credentials {
    pub fn new(
        marketplace_id: impl Into<String>,
        channel_id: impl Into<String>,
        private_key: impl Into<String>,
    ) -> Self {
        Self {
            marketplace_id: marketplace_id.into(),
            channel_id: channel_id.into(),
            private_key: SecretString::from(private_key.into()),
        }
    }

    pub fn validate(&self) -> Result<(), FailureKind> {
        if self.marketplace_id.trim().is_empty() {
            return Err(FailureKind::ConfigurationError(format!("{MARKETPLACE_ID} is missing")));
        }
        if self.channel_id.trim().is_empty() {
            return Err(FailureKind::ConfigurationError(format!("{CHANNEL_ID} is missing")));
        }
        if self.private_key.expose_secret().is_empty() {
            return Err(FailureKind::ConfigurationError(format!("{PRIVATE_KEY} is missing")));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SmtpSettings {
    pub server: Option<String>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub cc: Vec<String>,
}

impl SmtpSettings {
    pub fn is_configured(&self) -> bool {
        self.server.is_some() && self.username.is_some() && self.password.is_some()
    }
}

// Everything one inbound operation needs, threaded explicitly through every call
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub credentials: Credentials,
    pub filter_ids: Vec<String>,
    pub smtp: SmtpSettings,
}

impl AdapterConfig {
    pub fn from_parameters(parameters: &[PluginParameter]) -> Result<Self, FailureKind> {
        Self::resolve(parameters, |name| std::env::var(name).ok())
    }

    // Environment values win over caller-supplied parameters when both are present.
    pub fn resolve<F>(parameters: &[PluginParameter], env: F) -> Result<Self, FailureKind>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(parameters, &env, name);

        let private_key = non_empty(env(API_KEY_OVERRIDE))
            .or_else(|| get(PRIVATE_KEY))
            .unwrap_or_default();
        let credentials = Credentials::new(
            get(MARKETPLACE_ID).unwrap_or_default(),
            get(CHANNEL_ID).unwrap_or_default(),
            private_key,
        );
        credentials.validate()?;

        let filter_ids = get(FILTER_IDS)
            .map(|ids| split_list(&ids))
            .unwrap_or_default();

        let smtp = SmtpSettings {
            server: get(SMTP_SERVER),
            username: get(SMTP_USERNAME),
            password: get(SMTP_PASSWORD).map(SecretString::from),
            cc: get(MAIL_CC).map(|cc| split_list(&cc)).unwrap_or_default(),
        };

        Ok(Self {
            credentials,
            filter_ids,
            smtp,
        })
    }

    pub fn allows_product(&self, product_id: &str) -> bool {
        self.filter_ids.is_empty() || self.filter_ids.iter().any(|id| id == product_id)
    }
}

fn lookup<F>(parameters: &[PluginParameter], env: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(env(name)).or_else(|| {
        parameters
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| non_empty(Some(p.value.clone())))
    })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// Transport settings for the signed upstream surfaces
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub marketplace_url: String,
    pub timeout: Duration,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_UPSTREAM_URL.to_string(),
            marketplace_url: DEFAULT_MARKETPLACE_URL.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketplaceCredentials {
    pub access_key: String,
    pub secret_key: SecretString,
}

impl MarketplaceCredentials {
    pub fn from_lookup<F>(env: F) -> Option<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let access_key = non_empty(env(MARKETPLACE_ACCESS_KEY))?;
        let secret_key = non_empty(env(MARKETPLACE_SECRET))?;
        Some(Self {
            access_key,
            secret_key: SecretString::from(secret_key),
        })
    }
}

// Notification channel settings, resolved once when the dispatcher is built
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub telegram_api_url: String,
    pub telegram_bot_token: Option<SecretString>,
    pub telegram_chat_id: Option<String>,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub webhook_url: Option<String>,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_api_url: DEFAULT_TELEGRAM_URL.to_string(),
            telegram_bot_token: None,
            telegram_chat_id: None,
            max_retries: 3,
            retry_delay: Duration::from_millis(5000),
            webhook_url: None,
        }
    }
}

impl NotifierConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_retries = parse_or(&env, TELEGRAM_MAX_RETRIES, defaults.max_retries);
        let delay_ms = parse_or(
            &env,
            TELEGRAM_RETRY_DELAY,
            defaults.retry_delay.as_millis() as u64,
        );

        Self {
            telegram_bot_token: non_empty(env(TELEGRAM_BOT_TOKEN)).map(SecretString::from),
            telegram_chat_id: non_empty(env(TELEGRAM_GROUP_ID)),
            max_retries,
            retry_delay: Duration::from_millis(delay_ms),
            webhook_url: non_empty(env(WEBHOOK_URL)),
            ..defaults
        }
    }
}

fn parse_or<F, T>(env: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + Copy,
{
    match non_empty(env(name)) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(variable = name, value = %raw, "invalid numeric setting, using default");
            default
        }),
        None => default,
    }
}
