// Rendering of the chat and webhook payloads sent after a booking changes state
use crate::mapping::{BookedComponent, CommitResult};
use crate::model::CustomerContact;
use serde::Serialize;
use std::fmt::Write;

pub const AGENT_CANCEL_REASON: &str = "23";
const AGENT_CANCEL_TEXT: &str = "Cancelled by agent (via website)";

// Characters the chat markdown dialect reserves; all of them need a backslash in plain text
const MARKDOWN_V2_RESERVED: &[char] = &[
    '\\', '_', '*', '[', ']', '(', ')', '~', '`', '>', '#', '+', '-', '=', '|', '{', '}', '.', '!',
];

pub fn escape_markdown_v2(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if MARKDOWN_V2_RESERVED.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub fn reason_text(code: &str) -> String {
    if code == AGENT_CANCEL_REASON {
        format!("{code} - {AGENT_CANCEL_TEXT}")
    } else {
        code.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookStatus {
    Sent,
    Failed,
    Skipped,
}

impl WebhookStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookStatus::Sent => "Sent",
            WebhookStatus::Failed => "Failed",
            WebhookStatus::Skipped => "Skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookPayload {
    pub platform: String,
    pub booking_confirmation_code: String,
    pub first_name: String,
    pub last_name: String,
    pub voucher_link: String,
    pub phone_number: String,
}

/// Everything the success notification needs, captured when the commit lands.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingSuccessMessage {
    pub booking_id: String,
    pub channel_id: String,
    pub account_id: String,
    pub status_text: String,
    pub voucher_url: Option<String>,
    pub customer: CustomerContact,
    pub platform: String,
    pub components: Vec<BookedComponent>,
}

impl BookingSuccessMessage {
    pub fn new(commit: &CommitResult, customer: &CustomerContact, platform: Option<&str>) -> Self {
        Self {
            booking_id: commit.booking_id.clone(),
            channel_id: commit.channel_id.clone(),
            account_id: commit.account_id.clone(),
            status_text: commit.status_text.clone(),
            voucher_url: commit.voucher_url.clone(),
            customer: customer.clone(),
            platform: platform.unwrap_or_default().to_string(),
            components: commit.components.clone(),
        }
    }

    pub fn webhook_payload(&self) -> WebhookPayload {
        WebhookPayload {
            platform: self.platform.clone(),
            booking_confirmation_code: self.booking_id.clone(),
            first_name: self.customer.first_name.clone(),
            last_name: self.customer.last_name.clone(),
            voucher_link: self.voucher_url.clone().unwrap_or_default(),
            phone_number: self.customer.phone.clone(),
        }
    }

    pub fn render_chat(&self, webhook: WebhookStatus) -> String {
        let e = escape_markdown_v2;
        let mut text = String::from("*\\[NEW BOOKING\\]* ✅\n\n");
        let _ = writeln!(text, "*Booking ID:* {}", e(&self.booking_id));
        let _ = writeln!(text, "*Channel:* {}", e(&self.channel_id));
        let _ = writeln!(text, "*Account:* {}", e(&self.account_id));
        let _ = writeln!(text, "*Status:* {}", e(&self.status_text));
        if let Some(voucher) = &self.voucher_url {
            let _ = writeln!(text, "*Voucher:* {}", e(voucher));
        }
        let _ = writeln!(text, "*Customer:* {}", e(&self.customer.full_name()));
        let _ = writeln!(text, "*Email:* {}", e(&self.customer.email));
        let _ = writeln!(text, "*Phone:* {}", e(&self.customer.phone));
        let _ = writeln!(text, "*Webhook:* {}", webhook.as_str());

        if !self.components.is_empty() {
            text.push_str("\n*Components:*\n");
            for component in &self.components {
                let _ = writeln!(
                    text,
                    "• {} \\| {} {} \\| x{}",
                    e(&component.component_name),
                    e(&component.start_date),
                    e(&component.start_time),
                    e(&component.sale_quantity),
                );
            }
        }
        text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingCancelMessage {
    pub booking_id: String,
    pub note: String,
    pub reason_code: String,
}

impl BookingCancelMessage {
    pub fn render_chat(&self) -> String {
        let e = escape_markdown_v2;
        let mut text = String::from("*\\[BOOKING CANCEL\\]* ❌\n\n");
        let _ = writeln!(text, "*Booking ID:* {}", e(&self.booking_id));
        if !self.note.is_empty() {
            let _ = writeln!(text, "*Note:* {}", e(&self.note));
        }
        let _ = writeln!(text, "*Reason:* {}", e(&reason_text(&self.reason_code)));
        text
    }
}
