//! Alert delivery over webhook, Discord and SMTP.

use crate::alerts::channels::{discord, email, webhook};
use crate::alerts::{AlertConfig, AlertPayload};
use crate::config::SmtpConfig;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, Tokio1Executor};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("{channel} channel config is missing '{key}'")]
    MissingKey {
        channel: &'static str,
        key: &'static str,
    },

    #[error("unknown alert channel '{0}'")]
    UnknownChannel(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{channel} endpoint responded {status}")]
    Status {
        channel: &'static str,
        status: reqwest::StatusCode,
    },

    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("failed to build email: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("SMTP delivery failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("notification timed out after {0:?}")]
    Timeout(Duration),
}

/// Where one alert rule delivers to, parsed from its channel config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationTarget {
    Webhook { url: String },
    Discord { url: String },
    Email { to: String },
}

impl NotificationTarget {
    pub fn from_config(channel: &str, config: &Value) -> Result<Self, NotifyError> {
        match channel {
            "webhook" => Ok(Self::Webhook { url: required(config, "webhook", "url")? }),
            "discord" => Ok(Self::Discord { url: required(config, "discord", "url")? }),
            "email" => Ok(Self::Email { to: required(config, "email", "email")? }),
            other => Err(NotifyError::UnknownChannel(other.to_string())),
        }
    }

    pub fn channel(&self) -> &'static str {
        match self {
            Self::Webhook { .. } => "webhook",
            Self::Discord { .. } => "discord",
            Self::Email { .. } => "email",
        }
    }
}

fn required(config: &Value, channel: &'static str, key: &'static str) -> Result<String, NotifyError> {
    config
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or(NotifyError::MissingKey { channel, key })
}

#[derive(Clone)]
pub(crate) struct Mailer {
    pub(crate) transport: AsyncSmtpTransport<Tokio1Executor>,
    pub(crate) from: String,
}

/// Sends alert payloads. Cheap to clone; shares one HTTP client.
#[derive(Clone)]
pub struct Notifier {
    http: reqwest::Client,
    mailer: Mailer,
    timeout: Duration,
}

impl Notifier {
    pub fn new(smtp: &SmtpConfig, timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        // Without implicit TLS, upgrade via STARTTLS whenever the server offers it
        // so credentials never cross the wire in the clear.
        let builder = if smtp.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                .tls(Tls::Opportunistic(TlsParameters::new(smtp.host.clone())?))
        };
        let mut builder = builder.port(smtp.port).timeout(Some(timeout));
        if let Some(user) = &smtp.username {
            builder = builder.credentials(Credentials::new(
                user.clone(),
                smtp.password.clone().unwrap_or_default(),
            ));
        }

        Ok(Self {
            http,
            mailer: Mailer { transport: builder.build(), from: smtp.from.clone() },
            timeout,
        })
    }

    /// Deliver to one target, bounded by the notification timeout.
    pub async fn send(&self, target: &NotificationTarget, payload: &AlertPayload) -> Result<(), NotifyError> {
        let delivery = async {
            match target {
                NotificationTarget::Webhook { url } => webhook::send(&self.http, url, payload).await,
                NotificationTarget::Discord { url } => discord::send(&self.http, url, payload).await,
                NotificationTarget::Email { to } => email::send(&self.mailer, to, payload).await,
            }
        };
        tokio::time::timeout(self.timeout, delivery)
            .await
            .map_err(|_| NotifyError::Timeout(self.timeout))?
    }

    /// Resolve the rule's channel and deliver. Never fails: problems are
    /// logged and reported as `false`.
    pub async fn dispatch(&self, config: &AlertConfig, payload: &AlertPayload) -> bool {
        let target = match NotificationTarget::from_config(&config.channel, &config.channel_config) {
            Ok(t) => t,
            Err(e @ NotifyError::UnknownChannel(_)) => {
                warn!(alert_id = %config.id, error = %e, "alert not delivered");
                return false;
            }
            Err(e) => {
                error!(alert_id = %config.id, error = %e, "malformed channel config");
                return false;
            }
        };

        match self.send(&target, payload).await {
            Ok(()) => {
                info!(alert_id = %config.id, channel = target.channel(), "alert delivered");
                true
            }
            Err(e) => {
                error!(alert_id = %config.id, channel = target.channel(), error = %e, "alert delivery failed");
                false
            }
        }
    }
}
