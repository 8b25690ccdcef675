use crate::config::{NotifyConfig, SmtpConfig};
use crate::workflows::actions::Channel;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::{authentication::Credentials, PoolConfig},
};
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info};

/// A rendered notification, channel-agnostic.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub subject: String,
    pub body: String,
}

/// Outbound notification dispatch for workflow `notification` actions.
///
/// Channels missing their configuration report failure per dispatch instead
/// of refusing to start, so one unconfigured channel cannot take the engine
/// down with it.
#[derive(Clone)]
pub struct NotificationService {
    email: Option<EmailSender>,
    notify: NotifyConfig,
    http: reqwest::Client,
}

#[derive(Clone)]
struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from_email: String,
    from_name: String,
}

impl NotificationService {
    pub fn new(smtp: &SmtpConfig, notify: NotifyConfig) -> Self {
        let email = if smtp.is_configured() {
            let creds = Credentials::new(smtp.username.clone(), smtp.password.clone());
            let transport = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&smtp.host)
                .port(smtp.port)
                .credentials(creds)
                .pool_config(PoolConfig::new().max_size(10))
                .timeout(Some(Duration::from_secs(10)))
                .build();
            Some(EmailSender {
                transport,
                from_email: smtp.from_email.clone(),
                from_name: smtp.from_name.clone(),
            })
        } else {
            None
        };

        Self {
            email,
            notify,
            http: reqwest::Client::new(),
        }
    }

    /// Render and deliver one notification. Errors come back as strings so
    /// the caller can fold them into an action outcome.
    pub async fn dispatch(
        &self,
        channel: Channel,
        template: Option<&str>,
        payload: &Value,
    ) -> Result<(), String> {
        let message = render(template, payload);
        match channel {
            Channel::Email => self.send_email(&message, payload).await,
            Channel::Slack => self.post_slack(&message).await,
            Channel::Sms => self.post_sms(&message, payload).await,
        }
    }

    async fn send_email(&self, message: &RenderedMessage, payload: &Value) -> Result<(), String> {
        let Some(sender) = &self.email else {
            return Err("email channel is not configured".to_string());
        };
        let Some(recipient) = email_recipient(payload, self.notify.default_email.as_deref()) else {
            return Err("no email recipient in payload and no default configured".to_string());
        };

        let from = format!("{} <{}>", sender.from_name, sender.from_email)
            .parse::<Mailbox>()
            .map_err(|e| format!("invalid from address: {}", e))?;
        let to = recipient
            .parse::<Mailbox>()
            .map_err(|e| format!("invalid recipient '{}': {}", recipient, e))?;

        let email = Message::builder()
            .from(from)
            .to(to)
            .subject(&message.subject)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| format!("failed to build email: {}", e))?;

        match sender.transport.send(email).await {
            Ok(_) => {
                info!("Notification email sent to {}", recipient);
                Ok(())
            }
            Err(e) => {
                error!("Failed to send notification email to {}: {}", recipient, e);
                Err(format!("smtp send failed: {}", e))
            }
        }
    }

    async fn post_slack(&self, message: &RenderedMessage) -> Result<(), String> {
        let Some(url) = &self.notify.slack_webhook_url else {
            return Err("slack channel is not configured".to_string());
        };
        let text = format!("*{}*\n{}", message.subject, message.body);
        post_json(&self.http, url, &serde_json::json!({ "text": text }), "slack").await
    }

    async fn post_sms(&self, message: &RenderedMessage, payload: &Value) -> Result<(), String> {
        let Some(url) = &self.notify.sms_gateway_url else {
            return Err("sms channel is not configured".to_string());
        };
        let Some(phone) = payload.get("notify_phone").and_then(Value::as_str) else {
            return Err("no notify_phone in payload".to_string());
        };
        post_json(
            &self.http,
            url,
            &serde_json::json!({ "to": phone, "message": message.body }),
            "sms gateway",
        )
        .await
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &Value,
    service: &str,
) -> Result<(), String> {
    let response = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| format!("{} request failed: {}", service, e))?;

    if response.status().is_success() {
        Ok(())
    } else {
        Err(format!(
            "{} returned status {}",
            service,
            response.status().as_u16()
        ))
    }
}

/// Recipient resolution: the triggering payload wins, then the configured
/// default.
fn email_recipient(payload: &Value, default: Option<&str>) -> Option<String> {
    payload
        .get("notify_email")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| default.map(str::to_string))
}

fn str_field<'a>(payload: &'a Value, field: &str) -> &'a str {
    payload.get(field).and_then(Value::as_str).unwrap_or("-")
}

/// Render a named template against the triggering payload. Unknown or
/// absent template names fall back to a generic payload dump so a renamed
/// template degrades instead of silencing the alert.
pub fn render(template: Option<&str>, payload: &Value) -> RenderedMessage {
    match template {
        Some("low_stock_alert") => RenderedMessage {
            subject: format!(
                "[SellerDesk] Low stock: {}",
                str_field(payload, "product_name")
            ),
            body: format!(
                "Product {} ({}) is down to {} units on {}.",
                str_field(payload, "product_name"),
                str_field(payload, "sku"),
                payload
                    .get("stock_quantity")
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string()),
                str_field(payload, "marketplace"),
            ),
        },
        Some("order_sync_failed") => RenderedMessage {
            subject: format!(
                "[SellerDesk] Order sync failed on {}",
                str_field(payload, "marketplace")
            ),
            body: format!(
                "Order {} failed to sync: {}",
                str_field(payload, "order_id"),
                str_field(payload, "error"),
            ),
        },
        Some("settlement_ready") => RenderedMessage {
            subject: format!(
                "[SellerDesk] Settlement ready for {}",
                str_field(payload, "marketplace")
            ),
            body: format!(
                "Settlement {} is ready for review.",
                str_field(payload, "settlement_id"),
            ),
        },
        _ => RenderedMessage {
            subject: "[SellerDesk] Workflow notification".to_string(),
            body: serde_json::to_string_pretty(payload)
                .unwrap_or_else(|_| payload.to_string()),
        },
    }
}
