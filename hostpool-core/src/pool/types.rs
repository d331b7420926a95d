use crate::config::PoolSettings;
use crate::pool::PoolError;
use http::Uri;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Where a pool connects to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    /// Host name or IP literal, without brackets.
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

impl Destination {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            tls: false,
        }
    }

    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Destination of an absolute `http` or `https` URI.
    pub fn from_uri(uri: &Uri) -> Result<Self, PoolError> {
        let scheme = uri
            .scheme_str()
            .ok_or_else(|| PoolError::malformed(format!("'{uri}' is not an absolute URI")))?;

        let tls = match scheme.to_ascii_lowercase().as_str() {
            "http" => false,
            "https" => true,
            other => {
                return Err(PoolError::malformed(format!(
                    "unsupported scheme '{other}' in '{uri}'"
                )));
            }
        };

        let host = uri
            .host()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| PoolError::malformed(format!("'{uri}' has no host")))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = uri.port_u16().unwrap_or(if tls { 443 } else { 80 });

        Ok(Self::new(host, port).with_tls(tls))
    }

    pub fn scheme(&self) -> &'static str {
        if self.tls { "https" } else { "http" }
    }

    fn default_port(&self) -> u16 {
        if self.tls { 443 } else { 80 }
    }

    /// Value for the `Host` header: the default port is omitted.
    pub fn authority(&self) -> String {
        let host = if self.host.contains(':') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };

        if self.port == self.default_port() {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.scheme(), self.host, self.port)
        } else {
            write!(f, "{}://{}:{}", self.scheme(), self.host, self.port)
        }
    }
}

/// Identity of one logical pool: same destination with different settings is a
/// different pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DestinationKey {
    pub destination: Destination,
    pub settings: Arc<PoolSettings>,
}

impl DestinationKey {
    pub fn new(destination: Destination, settings: Arc<PoolSettings>) -> Self {
        Self {
            destination,
            settings,
        }
    }
}

impl fmt::Display for DestinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.destination.fmt(f)
    }
}

/// Index of a connection slot, stable for the lifetime of one pool incarnation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot-{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Starting,
    Running,
    Draining,
    Terminating,
}

/// Snapshot of a live pool incarnation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub state: PoolState,
    /// Slots connecting or connected.
    pub open_slots: usize,
    pub in_flight: usize,
    pub queued: usize,
}

impl PoolStatus {
    pub(crate) fn starting() -> Self {
        Self {
            state: PoolState::Starting,
            open_slots: 0,
            in_flight: 0,
            queued: 0,
        }
    }
}
