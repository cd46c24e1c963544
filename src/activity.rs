//! Request origin capture: time, client IP and a coarse device signature.

use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::{
    extract::{ConnectInfo, FromRequestParts},
    http::{StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Current time as unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

/// Connection details of one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Unix seconds
    pub time: i64,
    pub ip: String,
    /// e.g. "Firefox on Linux"
    pub device: String,
}

impl Activity {
    pub fn new(ip: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            time: unix_now(),
            ip: ip.into(),
            device: device.into(),
        }
    }

    /// Build an activity from request parts. The IP comes from the configured
    /// proxy header when an extractor is given, otherwise from `ConnectInfo`.
    pub fn from_parts(
        parts: &Parts,
        ip_extractor: Option<&IpExtractor>,
    ) -> Result<Self, &'static str> {
        let ip = match ip_extractor {
            Some(extractor) => {
                let value = parts
                    .headers
                    .get(extractor.header_name())
                    .ok_or("IP header not present")?
                    .to_str()
                    .map_err(|_| "IP header contains invalid characters")?;
                extractor.extract(value)?
            }
            None => parts
                .extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ci| ci.0.ip().to_string())
                .ok_or("No client IP available")?,
        };

        let user_agent = parts
            .headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");

        Ok(Self::new(ip, device_signature(user_agent)))
    }
}

/// Proxy headers that may carry the client IP.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClientIpHeader {
    XForwardedFor,
    XRealIp,
    CfConnectingIp,
}

/// Reads the client IP from a proxy header. Only use behind a proxy that
/// overwrites the header.
#[derive(Clone, Copy, Debug)]
pub struct IpExtractor {
    header: ClientIpHeader,
}

impl From<ClientIpHeader> for IpExtractor {
    fn from(header: ClientIpHeader) -> Self {
        Self { header }
    }
}

impl IpExtractor {
    pub fn header_name(&self) -> &'static str {
        match self.header {
            ClientIpHeader::XForwardedFor => "x-forwarded-for",
            ClientIpHeader::XRealIp => "x-real-ip",
            ClientIpHeader::CfConnectingIp => "cf-connecting-ip",
        }
    }

    /// Parse a header value into a normalized IP string.
    pub fn extract(&self, value: &str) -> Result<String, &'static str> {
        let candidate = match self.header {
            // The left-most entry is the original client
            ClientIpHeader::XForwardedFor => value.split(',').next().unwrap_or(""),
            ClientIpHeader::XRealIp | ClientIpHeader::CfConnectingIp => value,
        };
        candidate
            .trim()
            .parse::<IpAddr>()
            .map(|ip| ip.to_string())
            .map_err(|_| "IP header is not a valid address")
    }
}

/// Derive a human-readable device signature from a User-Agent header.
pub fn device_signature(user_agent: &str) -> String {
    let browser = if user_agent.contains("Edg/") {
        Some("Edge")
    } else if user_agent.contains("OPR/") || user_agent.contains("Opera") {
        Some("Opera")
    } else if user_agent.contains("Firefox/") {
        Some("Firefox")
    } else if user_agent.contains("Chrome/") || user_agent.contains("CriOS/") {
        Some("Chrome")
    } else if user_agent.contains("Safari/") {
        Some("Safari")
    } else {
        None
    };

    // Order matters: Android UAs also say Linux, iOS UAs also say Mac OS X
    let os = if user_agent.contains("Windows") {
        Some("Windows")
    } else if user_agent.contains("Android") {
        Some("Android")
    } else if user_agent.contains("iPhone") || user_agent.contains("iPad") {
        Some("iOS")
    } else if user_agent.contains("CrOS") {
        Some("ChromeOS")
    } else if user_agent.contains("Mac OS X") || user_agent.contains("Macintosh") {
        Some("macOS")
    } else if user_agent.contains("Linux") {
        Some("Linux")
    } else {
        None
    };

    match (browser, os) {
        (Some(b), Some(o)) => format!("{} on {}", b, o),
        (Some(b), None) => b.to_string(),
        (None, Some(o)) => format!("Unknown browser on {}", o),
        (None, None) => "Unknown device".to_string(),
    }
}

/// State types that know how to find the client IP.
pub trait HasActivitySource {
    fn ip_extractor(&self) -> Option<&IpExtractor>;
}

#[derive(Debug)]
pub struct ActivityRejection(pub &'static str);

impl IntoResponse for ActivityRejection {
    fn into_response(self) -> Response {
        (StatusCode::BAD_REQUEST, self.0).into_response()
    }
}

impl<S> FromRequestParts<S> for Activity
where
    S: HasActivitySource + Send + Sync,
{
    type Rejection = ActivityRejection;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Activity::from_parts(parts, state.ip_extractor()).map_err(ActivityRejection)
    }
}
