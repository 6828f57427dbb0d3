//! Handshake authentication.
//!
//! Runs on the HTTP upgrade request before the WebSocket handshake
//! completes. A rejection becomes a plain-text HTTP response and no
//! connection is registered.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Header carrying the bearer credential.
pub const AUTHORIZATION_HEADER: &str = "authorization";
/// Query parameter fallback for the credential.
pub const AUTHORIZATION_QUERY: &str = "authorization";
/// Header carrying the client device identifier.
pub const DEVICE_HEADER: &str = "device-identifier";
/// Proxy header carrying the original client address.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Resolves a credential to an identity. `None` means invalid.
pub type TokenCheck = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;
/// Decides whether `(credential, ip)` may connect.
pub type IpCheck = Arc<dyn Fn(Option<&str>, &str) -> bool + Send + Sync>;
/// Decides whether `(credential, device)` may connect.
pub type DeviceCheck = Arc<dyn Fn(Option<&str>, &str) -> bool + Send + Sync>;

/// Immutable authentication hooks, built once and shared by every handshake.
///
/// With no hooks set every client that has a resolvable IP is admitted.
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// Credential check.
    pub token_check: Option<TokenCheck>,
    /// IP allow check.
    pub ip_check: Option<IpCheck>,
    /// Device allow check.
    pub device_check: Option<DeviceCheck>,
    /// Take the client IP from `X-Forwarded-For`.
    pub forwarding_enabled: bool,
}

impl AuthConfig {
    /// Config with no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the credential check.
    #[must_use]
    pub fn with_token_check<F>(mut self, check: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.token_check = Some(Arc::new(check));
        self
    }

    /// Set the IP allow check.
    #[must_use]
    pub fn with_ip_check<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&str>, &str) -> bool + Send + Sync + 'static,
    {
        self.ip_check = Some(Arc::new(check));
        self
    }

    /// Set the device allow check.
    #[must_use]
    pub fn with_device_check<F>(mut self, check: F) -> Self
    where
        F: Fn(Option<&str>, &str) -> bool + Send + Sync + 'static,
    {
        self.device_check = Some(Arc::new(check));
        self
    }

    /// Enable or disable proxy forwarding mode.
    #[must_use]
    pub fn with_forwarding(mut self, enabled: bool) -> Self {
        self.forwarding_enabled = enabled;
        self
    }
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("token_check", &self.token_check.is_some())
            .field("ip_check", &self.ip_check.is_some())
            .field("device_check", &self.device_check.is_some())
            .field("forwarding_enabled", &self.forwarding_enabled)
            .finish()
    }
}

/// A handshake rejection. The message is the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    /// No client IP could be determined.
    #[error("Ip address header is missing")]
    MissingIp,
    /// A token check is configured and no credential was sent.
    #[error("Missing credentials")]
    MissingCredentials,
    /// The token check returned no identity.
    #[error("Invalid credentials")]
    InvalidCredentials,
    /// The IP check refused the client.
    #[error("Current IP address is not allowed")]
    IpNotAllowed,
    /// A device check is configured and no device identifier was sent.
    #[error("Missing device identifier")]
    MissingDevice,
    /// The device check refused the client.
    #[error("Current device identifier is not allowed")]
    DeviceNotAllowed,
}

impl AuthRejection {
    /// HTTP status for this rejection.
    pub fn status(self) -> StatusCode {
        match self {
            Self::MissingIp => StatusCode::BAD_REQUEST,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (self.status(), format!("{self}\n")).into_response()
    }
}

/// What a successful handshake established about the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Client IP.
    pub ip: String,
    /// Identity from the token check, when one ran.
    pub identity: Option<String>,
    /// Device identifier, when sent.
    pub device: Option<String>,
}

/// Run the handshake checks in order, stopping at the first rejection.
///
/// 1. Resolve the client IP (`X-Forwarded-For` in forwarding mode, else the peer).
/// 2. Extract the credential (`Authorization` header, then `authorization` query).
/// 3. Token check, IP check, device check, each only when configured.
pub fn authenticate(
    config: &AuthConfig,
    headers: &HeaderMap,
    query_token: Option<&str>,
    peer: Option<SocketAddr>,
) -> Result<Admission, AuthRejection> {
    let ip = client_ip(config.forwarding_enabled, headers, peer).ok_or(AuthRejection::MissingIp)?;
    let credential = credential(headers, query_token);

    let identity = match &config.token_check {
        Some(check) => {
            let token = credential.ok_or(AuthRejection::MissingCredentials)?;
            Some(check(token).ok_or(AuthRejection::InvalidCredentials)?)
        }
        None => None,
    };

    if let Some(check) = &config.ip_check {
        if !check(credential, &ip) {
            return Err(AuthRejection::IpNotAllowed);
        }
    }

    let device = header_value(headers, DEVICE_HEADER);
    if let Some(check) = &config.device_check {
        let device = device.ok_or(AuthRejection::MissingDevice)?;
        if !check(credential, device) {
            return Err(AuthRejection::DeviceNotAllowed);
        }
    }

    Ok(Admission {
        ip,
        identity,
        device: device.map(str::to_owned),
    })
}

/// Client address: first `X-Forwarded-For` entry when forwarding, else the peer.
pub fn client_ip(forwarding: bool, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<String> {
    if forwarding {
        header_value(headers, FORWARDED_FOR_HEADER)
            .and_then(|list| list.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty())
            .map(str::to_owned)
    } else {
        peer.map(|addr| addr.ip().to_string())
    }
}

fn credential<'a>(headers: &'a HeaderMap, query_token: Option<&'a str>) -> Option<&'a str> {
    header_value(headers, AUTHORIZATION_HEADER).or_else(|| query_token.filter(|t| !t.is_empty()))
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}
