// Customer confirmation email: template rendering, ticket attachments and SMTP delivery
use crate::config::SmtpSettings;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::ExposeSecret;
use std::sync::Arc;
use tracing::{info, warn};

pub const SMTP_PORT: u16 = 587;
pub const REMOTE_BARCODE_URL: &str = "https://office.palisis.com/pit/bo/public/barcode.png";

const CONFIRMATION_TEMPLATE: &str = r#"<!DOCTYPE html>
<html>
<body style="font-family: Arial, sans-serif; color: #333;">
  <h2>Booking confirmation</h2>
  <p>Dear {{name}},</p>
  <p>Thank you for your booking. Your booking ID is <strong>{{booking_id}}</strong>.</p>
  <table>
    <tr><td>Date</td><td>{{booking_date}}</td></tr>
    <tr><td>Start time</td><td>{{start_time}}</td></tr>
  </table>
  {{content}}
  <p>Your voucher: <a href="{{voucher_link}}">{{voucher_link}}</a></p>
  <p>Your tickets are attached to this email.</p>
</body>
</html>
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: String,
    pub cc: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<EmailAttachment>,
}

#[async_trait]
pub trait EmailTransport: Send + Sync + 'static {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()>;
}

/// Renders a ticket code into PNG bytes.
#[async_trait]
pub trait TicketImageGenerator: Send + Sync + 'static {
    async fn render(&self, code: &str) -> anyhow::Result<Bytes>;
}

// Public barcode service, used when no local generator is configured or it fails
pub struct RemoteBarcodeImage {
    http: reqwest::Client,
    base_url: String,
}

impl RemoteBarcodeImage {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, REMOTE_BARCODE_URL)
    }

    pub fn with_base_url(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }

    pub fn image_url(&self, code: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(code.as_bytes()).collect();
        format!("{}?size=300&qrcontent={}", self.base_url, encoded)
    }
}

#[async_trait]
impl TicketImageGenerator for RemoteBarcodeImage {
    async fn render(&self, code: &str) -> anyhow::Result<Bytes> {
        let response = self
            .http
            .get(self.image_url(code))
            .send()
            .await
            .context("barcode request failed")?
            .error_for_status()
            .context("barcode service refused")?;
        Ok(response.bytes().await?)
    }
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_settings(settings: &SmtpSettings) -> anyhow::Result<Self> {
        let server = settings.server.as_deref().ok_or_else(|| anyhow!("SMTP server missing"))?;
        let username = settings
            .username
            .as_deref()
            .ok_or_else(|| anyhow!("SMTP username missing"))?;
        let password = settings
            .password
            .as_ref()
            .ok_or_else(|| anyhow!("SMTP password missing"))?;

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(server)
            .with_context(|| format!("invalid SMTP relay {server}"))?
            .port(SMTP_PORT)
            .credentials(Credentials::new(
                username.to_string(),
                password.expose_secret().to_string(),
            ))
            .build();
        let from: Mailbox = username
            .parse()
            .with_context(|| format!("SMTP username is not a mailbox: {username}"))?;

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl EmailTransport for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> anyhow::Result<()> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .to(email.to.parse().context("invalid recipient")?)
            .subject(email.subject);
        for cc in &email.cc {
            builder = builder.cc(cc.parse().with_context(|| format!("invalid cc address {cc}"))?);
        }

        let mut body = MultiPart::mixed().singlepart(SinglePart::html(email.html_body));
        for attachment in email.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|_| anyhow!("invalid content type {}", attachment.content_type))?;
            body = body.singlepart(
                Attachment::new(attachment.filename).body(attachment.data.to_vec(), content_type),
            );
        }

        let message = builder.multipart(body)?;
        self.transport.send(message).await?;
        Ok(())
    }
}

pub fn html_escape(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConfirmationDetails {
    pub customer_name: String,
    pub recipient: String,
    pub booking_id: String,
    pub booking_date: String,
    pub start_time: String,
    pub voucher_link: String,
    // One line per booked component
    pub lines: Vec<String>,
    pub ticket_codes: Vec<String>,
}

impl ConfirmationDetails {
    pub fn subject(&self) -> String {
        format!(
            "Booking confirmation - Client {} - Booking ID: {}",
            self.customer_name, self.booking_id
        )
    }

    pub fn render_html(&self) -> String {
        let content = if self.lines.is_empty() {
            String::new()
        } else {
            let items: String = self
                .lines
                .iter()
                .map(|line| format!("<li>{}</li>", html_escape(line)))
                .collect();
            format!("<ul>{items}</ul>")
        };
        CONFIRMATION_TEMPLATE
            .replace("{{name}}", &html_escape(&self.customer_name))
            .replace("{{booking_id}}", &html_escape(&self.booking_id))
            .replace("{{booking_date}}", &html_escape(&self.booking_date))
            .replace("{{start_time}}", &html_escape(&self.start_time))
            .replace("{{voucher_link}}", &html_escape(&self.voucher_link))
            .replace("{{content}}", &content)
    }
}

pub struct ConfirmationMailer {
    transport: Arc<dyn EmailTransport>,
    images: Option<Arc<dyn TicketImageGenerator>>,
    fallback: Arc<dyn TicketImageGenerator>,
    cc: Vec<String>,
}

impl ConfirmationMailer {
    pub fn new(
        transport: Arc<dyn EmailTransport>,
        images: Option<Arc<dyn TicketImageGenerator>>,
        fallback: Arc<dyn TicketImageGenerator>,
        cc: Vec<String>,
    ) -> Self {
        Self {
            transport,
            images,
            fallback,
            cc,
        }
    }

    async fn ticket_image(&self, code: &str) -> Option<Bytes> {
        if let Some(images) = &self.images {
            match images.render(code).await {
                Ok(image) => return Some(image),
                Err(e) => warn!(error = %e, "ticket image generator failed, using remote barcode"),
            }
        }
        match self.fallback.render(code).await {
            Ok(image) => Some(image),
            Err(e) => {
                warn!(error = %e, "remote barcode failed, ticket attachment skipped");
                None
            }
        }
    }

    pub async fn compose(&self, details: &ConfirmationDetails) -> OutgoingEmail {
        let mut attachments = Vec::new();
        for (index, code) in details.ticket_codes.iter().enumerate() {
            if let Some(data) = self.ticket_image(code).await {
                attachments.push(EmailAttachment {
                    filename: format!("ticket-{}.png", index + 1),
                    content_type: "image/png".to_string(),
                    data,
                });
            }
        }
        OutgoingEmail {
            to: details.recipient.clone(),
            cc: self.cc.clone(),
            subject: details.subject(),
            html_body: details.render_html(),
            attachments,
        }
    }

    pub async fn send_confirmation(&self, details: &ConfirmationDetails) -> anyhow::Result<()> {
        if details.recipient.trim().is_empty() {
            return Err(anyhow!("customer has no email address"));
        }
        let email = self.compose(details).await;
        let attachments = email.attachments.len();
        self.transport.send(email).await?;
        info!(booking_id = %details.booking_id, attachments, "confirmation email sent");
        Ok(())
    }
}
