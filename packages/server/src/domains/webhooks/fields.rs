//! Provider-agnostic access to an inbound webhook request.
//!
//! Providers post multipart forms, url-encoded forms or JSON. [`WebhookFields`]
//! reads any of them into flat string maps so provider decoding only deals
//! with field names.

use std::collections::HashMap;

use axum::async_trait;
use axum::extract::{FromRequest, Multipart, Request};
use axum::http::{header, HeaderMap};
use axum::{Form, Json};
use serde_json::Value;

use super::handlers::WebhookError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WebhookFields {
    /// Request headers, names lowercased
    headers: HashMap<String, String>,
    /// Top-level body fields
    fields: HashMap<String, String>,
    /// Email headers carried in the body, names lowercased
    email_headers: HashMap<String, String>,
}

impl WebhookFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a body field.
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert_field(name.into(), value.into());
        self
    }

    /// Add a request header.
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// First non-blank body field among `names`.
    pub fn field(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .map(String::as_str)
            .find(|value| !value.trim().is_empty())
    }

    /// Non-blank request header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Non-blank email header carried in the body.
    pub fn email_header(&self, name: &str) -> Option<&str> {
        self.email_headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    fn insert_field(&mut self, name: String, value: String) {
        if name == "headers" {
            self.email_headers.extend(parse_raw_headers(&value));
        }
        self.fields.insert(name, value);
    }

    fn capture_headers(&mut self, headers: &HeaderMap) {
        for (name, value) in headers {
            if let Ok(value) = value.to_str() {
                self.headers.insert(name.as_str().to_string(), value.to_string());
            }
        }
    }

    /// Read a JSON body. Nested `signature` and `headers` objects are
    /// flattened; other nested values are ignored.
    pub fn from_json(body: &Value) -> Self {
        let mut fields = Self::new();
        let Some(object) = body.as_object() else {
            return fields;
        };

        for (name, value) in object {
            match (name.as_str(), value) {
                ("signature", Value::Object(signature)) => {
                    for (key, value) in signature {
                        if let Some(value) = scalar(value) {
                            fields.insert_field(key.clone(), value);
                        }
                    }
                }
                ("headers", Value::Object(headers)) => {
                    for (key, value) in headers {
                        if let Some(value) = scalar(value) {
                            fields.email_headers.insert(key.to_ascii_lowercase(), value);
                        }
                    }
                }
                ("message-headers", Value::Array(pairs)) => {
                    for pair in pairs {
                        if let Some([key, value]) = pair.as_array().map(Vec::as_slice) {
                            if let (Some(key), Some(value)) = (key.as_str(), scalar(value)) {
                                fields.email_headers.insert(key.to_ascii_lowercase(), value);
                            }
                        }
                    }
                }
                (_, value) => {
                    if let Some(value) = scalar(value) {
                        fields.insert_field(name.clone(), value);
                    }
                }
            }
        }

        fields
    }
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Parse a raw RFC 5322 header block (as SendGrid posts it). Folded
/// continuation lines are joined onto the previous header.
pub fn parse_raw_headers(raw: &str) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in raw.lines() {
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = current.as_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }

        if let Some((name, value)) = current.take() {
            headers.entry(name).or_insert(value);
        }

        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            if !name.is_empty() && !name.contains(' ') {
                current = Some((name.to_ascii_lowercase(), value.trim().to_string()));
            }
        }
    }

    if let Some((name, value)) = current {
        headers.entry(name).or_insert(value);
    }

    headers
}

#[async_trait]
impl<S> FromRequest<S> for WebhookFields
where
    S: Send + Sync,
{
    type Rejection = WebhookError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let headers = req.headers().clone();
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        let mut fields = if content_type.starts_with("application/json") {
            let Json(body) = Json::<Value>::from_request(req, state)
                .await
                .map_err(|e| WebhookError::MalformedBody(e.body_text()))?;
            WebhookFields::from_json(&body)
        } else if content_type.starts_with("multipart/form-data") {
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| WebhookError::MalformedBody(e.body_text()))?;

            let mut fields = WebhookFields::new();
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| WebhookError::MalformedBody(e.body_text()))?
            {
                // Attachments are not stored.
                if field.file_name().is_some() {
                    continue;
                }
                let Some(name) = field.name().map(str::to_string) else {
                    continue;
                };
                let value = field
                    .text()
                    .await
                    .map_err(|e| WebhookError::MalformedBody(e.body_text()))?;
                fields.insert_field(name, value);
            }
            fields
        } else {
            let Form(form) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|e| WebhookError::MalformedBody(e.body_text()))?;

            let mut fields = WebhookFields::new();
            for (name, value) in form {
                fields.insert_field(name, value);
            }
            fields
        };

        fields.capture_headers(&headers);
        Ok(fields)
    }
}
