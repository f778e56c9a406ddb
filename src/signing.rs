// Request signing strategies for the two upstream surfaces
//
// The tour-operator API signs `channel/marketplace/VERB/seconds/path[?query]` with
// HMAC-SHA256 and URL-encodes the base64 digest. The marketplace REST API signs
// `date + accessKey + METHOD + endpoint` with HMAC-SHA1 and sends the digest as is.
use crate::config::{Credentials, MarketplaceCredentials};
use crate::error::FailureKind;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use secrecy::ExposeSecret;
use sha1::Sha1;
use sha2::Sha256;

pub const TOURCMS_DATE_HEADER: &str = "x-tourcms-date";
pub const BOKUN_DATE_HEADER: &str = "x-bokun-date";
pub const BOKUN_ACCESS_KEY_HEADER: &str = "x-bokun-accesskey";
pub const BOKUN_SIGNATURE_HEADER: &str = "x-bokun-signature";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Get,
    Post,
    Put,
    Delete,
}

impl Verb {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Get => "GET",
            Verb::Post => "POST",
            Verb::Put => "PUT",
            Verb::Delete => "DELETE",
        }
    }
}

impl From<Verb> for reqwest::Method {
    fn from(verb: Verb) -> Self {
        match verb {
            Verb::Get => reqwest::Method::GET,
            Verb::Post => reqwest::Method::POST,
            Verb::Put => reqwest::Method::PUT,
            Verb::Delete => reqwest::Method::DELETE,
        }
    }
}

/// Inputs of a single signature. The timestamp is captured once per call and
/// feeds both the digest and the date header.
#[derive(Debug, Clone)]
pub struct SigningContext<'a> {
    pub verb: Verb,
    pub path: &'a str,
    pub query: &'a str,
    pub timestamp: DateTime<Utc>,
}

impl SigningContext<'_> {
    pub fn endpoint(&self) -> String {
        if self.query.is_empty() {
            self.path.to_string()
        } else {
            format!("{}?{}", self.path, self.query)
        }
    }
}

pub trait RequestSigner: Send + Sync + 'static {
    fn sign(&self, ctx: &SigningContext<'_>) -> Result<HeaderMap, FailureKind>;

    fn content_type(&self) -> &'static str;

    fn accept(&self) -> &'static str;
}

/// Canonical query string: pairs sorted by key, form-encoded, joined with `&`.
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    sorted
        .into_iter()
        .map(|(k, v)| format!("{}={}", form_encode(k), form_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn form_encode(raw: &str) -> String {
    url::form_urlencoded::byte_serialize(raw.as_bytes()).collect()
}

fn header(name: &'static str, value: &str) -> Result<(HeaderName, HeaderValue), FailureKind> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| FailureKind::ConfigurationError(format!("invalid {name} header: {e}")))?;
    Ok((HeaderName::from_static(name), value))
}

pub struct ChannelSigner {
    credentials: Credentials,
}

impl ChannelSigner {
    pub fn new(credentials: Credentials) -> Self {
        Self { credentials }
    }

    pub fn signing_string(&self, ctx: &SigningContext<'_>) -> String {
        format!(
            "{}/{}/{}/{}{}",
            self.credentials.channel_id,
            self.credentials.marketplace_id,
            ctx.verb.as_str(),
            ctx.timestamp.timestamp(),
            ctx.endpoint()
        )
    }

    // URL-encoded base64 digest, ready for the Authorization header
    pub fn signature(&self, ctx: &SigningContext<'_>) -> Result<String, FailureKind> {
        self.credentials.validate()?;
        let mut mac =
            Hmac::<Sha256>::new_from_slice(self.credentials.private_key.expose_secret().as_bytes())
                .map_err(|e| FailureKind::ConfigurationError(e.to_string()))?;
        mac.update(self.signing_string(ctx).as_bytes());
        let digest = STANDARD.encode(mac.finalize().into_bytes());
        Ok(form_encode(&digest))
    }
}

impl RequestSigner for ChannelSigner {
    fn sign(&self, ctx: &SigningContext<'_>) -> Result<HeaderMap, FailureKind> {
        let signature = self.signature(ctx)?;
        let authorization = format!(
            "TourCMS {}:{}:{}",
            self.credentials.channel_id, self.credentials.marketplace_id, signature
        );
        let date = ctx.timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut headers = HeaderMap::new();
        let (name, value) = header(TOURCMS_DATE_HEADER, &date)?;
        headers.insert(name, value);
        let value = HeaderValue::from_str(&authorization)
            .map_err(|e| FailureKind::ConfigurationError(format!("invalid authorization: {e}")))?;
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn content_type(&self) -> &'static str {
        "application/xml"
    }

    fn accept(&self) -> &'static str {
        "application/xml"
    }
}

pub struct AccessKeySigner {
    credentials: MarketplaceCredentials,
}

impl AccessKeySigner {
    pub fn new(credentials: MarketplaceCredentials) -> Self {
        Self { credentials }
    }

    pub fn signature(&self, ctx: &SigningContext<'_>, date: &str) -> Result<String, FailureKind> {
        if self.credentials.secret_key.expose_secret().is_empty() {
            return Err(FailureKind::ConfigurationError(
                "marketplace secret key is missing".to_string(),
            ));
        }
        let message = format!(
            "{}{}{}{}",
            date,
            self.credentials.access_key,
            ctx.verb.as_str(),
            ctx.endpoint()
        );
        let mut mac =
            Hmac::<Sha1>::new_from_slice(self.credentials.secret_key.expose_secret().as_bytes())
                .map_err(|e| FailureKind::ConfigurationError(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

impl RequestSigner for AccessKeySigner {
    fn sign(&self, ctx: &SigningContext<'_>) -> Result<HeaderMap, FailureKind> {
        let date = ctx.timestamp.format("%Y-%m-%d %H:%M:%S").to_string();
        let signature = self.signature(ctx, &date)?;

        let mut headers = HeaderMap::new();
        for (name, value) in [
            (BOKUN_DATE_HEADER, date.as_str()),
            (BOKUN_ACCESS_KEY_HEADER, self.credentials.access_key.as_str()),
            (BOKUN_SIGNATURE_HEADER, signature.as_str()),
        ] {
            let (name, value) = header(name, value)?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn accept(&self) -> &'static str {
        "application/json"
    }
}
