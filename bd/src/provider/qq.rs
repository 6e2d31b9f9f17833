//! QQ devtool auth client
//!
//! Implements [`AuthProvider`] against the QQ mini-program devtool endpoints:
//! `GetLoginCode`, `syncScanSateGetTicket` and `login`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::debug;

use super::{AuthProvider, LoginCode, ProviderError, ScanStatus};
use crate::config::ProviderConfig;

/// Response code meaning the login code has already been consumed
const CODE_USED: i64 = -10003;

/// HTTP client for the QQ QR login flow
pub struct QqAuthClient {
    http: Client,
    base_url: String,
    qr_base_url: String,
    app_id: String,
}

impl QqAuthClient {
    /// Create a client from provider configuration
    pub fn from_config(config: &ProviderConfig) -> Result<Self, ProviderError> {
        debug!(base_url = %config.base_url, "QqAuthClient::from_config: called");
        let mut headers = HeaderMap::new();
        headers.insert(
            "qua",
            HeaderValue::from_str(&config.qua).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?,
        );
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&config.user_agent).map_err(|e| ProviderError::InvalidResponse(e.to_string()))?,
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            qr_base_url: config.qr_base_url.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl AuthProvider for QqAuthClient {
    async fn request_login_code(&self) -> Result<LoginCode, ProviderError> {
        debug!("QqAuthClient::request_login_code: called");
        let endpoint = self.url("/ide/devtoolAuth/GetLoginCode");
        let response = self.http.get(&endpoint).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                endpoint,
            });
        }
        let body: Value = response.json().await?;
        parse_login_code(&body, &self.qr_base_url)
    }

    async fn poll_scan_status(&self, login_code: &str) -> Result<ScanStatus, ProviderError> {
        debug!(%login_code, "QqAuthClient::poll_scan_status: called");
        let response = self
            .http
            .get(self.url("/ide/devtoolAuth/syncScanSateGetTicket"))
            .query(&[("code", login_code)])
            .send()
            .await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            debug!(%status, "QqAuthClient::poll_scan_status: non-200 response");
            return Ok(ScanStatus::Error(format!("HTTP {}", status.as_u16())));
        }
        let body: Value = response.json().await?;
        Ok(parse_scan_status(&body))
    }

    async fn exchange_ticket(&self, ticket: &str) -> Result<String, ProviderError> {
        debug!("QqAuthClient::exchange_ticket: called");
        let endpoint = self.url("/ide/login");
        let response = self
            .http
            .post(&endpoint)
            .json(&json!({ "appid": self.app_id, "ticket": ticket }))
            .send()
            .await?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(ProviderError::Http {
                status: status.as_u16(),
                endpoint,
            });
        }
        let body: Value = response.json().await?;
        parse_auth_code(&body)
    }
}

/// Read a response `code`, which the provider sends as a number or a string
fn numeric_code(value: Option<&Value>) -> Option<i64> {
    match value? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Read a non-empty string field, accepting numbers as well
fn string_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a `GetLoginCode` body into a [`LoginCode`]
pub fn parse_login_code(body: &Value, qr_base_url: &str) -> Result<LoginCode, ProviderError> {
    let code = numeric_code(body.get("code"));
    if code != Some(0) {
        return Err(ProviderError::Protocol(format!(
            "login code request rejected (code {})",
            body.get("code").unwrap_or(&Value::Null)
        )));
    }
    let login_code = string_field(body.get("data").and_then(|d| d.get("code")))
        .ok_or_else(|| ProviderError::InvalidResponse("login code missing from response".to_string()))?;
    let qr_payload = format!("{}/{}?_proxy=1&from=ide", qr_base_url.trim_end_matches('/'), login_code);
    Ok(LoginCode { login_code, qr_payload })
}

/// Parse a `syncScanSateGetTicket` body into a [`ScanStatus`]
pub fn parse_scan_status(body: &Value) -> ScanStatus {
    match numeric_code(body.get("code")) {
        Some(0) => {
            let data = body.get("data");
            if numeric_code(data.and_then(|d| d.get("ok"))) != Some(1) {
                return ScanStatus::Wait;
            }
            let ticket = string_field(data.and_then(|d| d.get("ticket"))).unwrap_or_default();
            ScanStatus::Ok { ticket }
        }
        Some(CODE_USED) => ScanStatus::Used,
        Some(other) => ScanStatus::Error(format!("provider code {other}")),
        None => ScanStatus::Error("missing provider code".to_string()),
    }
}

/// Parse a `login` body into the auth code
pub fn parse_auth_code(body: &Value) -> Result<String, ProviderError> {
    string_field(body.get("code"))
        .ok_or_else(|| ProviderError::Protocol("auth code missing from login response".to_string()))
}
