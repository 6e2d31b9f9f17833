//! Auth provider - the three-call QR login protocol
//!
//! [`AuthProvider`] is the seam between the login state machine and the
//! outside world. [`QqAuthClient`] speaks the QQ devtool protocol over HTTP;
//! tests drive the state machine with a scripted fake instead.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

mod error;
#[cfg(test)]
pub mod mock;
mod qq;

pub use error::ProviderError;
pub use qq::{QqAuthClient, parse_auth_code, parse_login_code, parse_scan_status};

/// A freshly issued login code and the payload to render as a QR code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginCode {
    pub login_code: String,
    pub qr_payload: String,
}

/// Result of one scan-status poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanStatus {
    /// Not scanned yet
    Wait,
    /// Scanned and confirmed; the ticket can be exchanged for an auth code
    Ok { ticket: String },
    /// The login code was already consumed
    Used,
    /// Provider-reported failure for this poll
    Error(String),
}

/// Client of the third-party QR authentication provider
///
/// Each call may fail with a transport error ([`ProviderError`]), which is
/// distinct from the protocol-level `Used`/`Error` poll results.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Request a new login code and its QR payload
    async fn request_login_code(&self) -> Result<LoginCode, ProviderError>;

    /// Poll whether `login_code` has been scanned
    async fn poll_scan_status(&self, login_code: &str) -> Result<ScanStatus, ProviderError>;

    /// Exchange a scan ticket for the game auth code
    async fn exchange_ticket(&self, ticket: &str) -> Result<String, ProviderError>;
}
