//! Session seam between the provider and a NETCONF transport
//!
//! A [`Session`] moves one request document to the peer and returns the
//! reply document. Framing, authentication and the hello exchange belong to
//! the implementation; the provider only sees whole messages and the
//! capabilities the peer announced.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{NetconfError, Result, SessionError};

/// An established NETCONF session
pub trait Session: Send {
    /// Send one request and wait for its reply
    fn send(&mut self, request: &str) -> std::result::Result<String, SessionError>;

    /// Capability URIs from the peer's hello
    fn capabilities(&self) -> Vec<String>;

    /// Close the session; closing twice is not an error
    fn close(&mut self) -> std::result::Result<(), SessionError>;
}

/// Opens sessions from connection parameters
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        target: &ConnectionTarget,
    ) -> std::result::Result<Box<dyn Session>, SessionError>;

    /// Whether this connector can open `transport`
    fn supports(&self, transport: Transport) -> bool {
        transport == Transport::Ssh
    }
}

/// Secure transport carrying the session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Ssh,
    Tls,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Ssh => write!(f, "ssh"),
            Transport::Tls => write!(f, "tls"),
        }
    }
}

impl FromStr for Transport {
    type Err = NetconfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ssh" => Ok(Transport::Ssh),
            "tls" => Ok(Transport::Tls),
            other => Err(NetconfError::Initialization(format!(
                "unknown transport '{}'",
                other
            ))),
        }
    }
}

fn default_port() -> u16 {
    830
}

/// Where and how to open a session
#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectionTarget {
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub transport: Transport,
}

impl ConnectionTarget {
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            address: address.into(),
            port: default_port(),
            username: username.into(),
            password: password.into(),
            transport: Transport::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    /// Load a target from a JSON configuration document
    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| {
            NetconfError::Initialization(format!("invalid connection target: {}", e))
        })
    }

    /// Load a target from a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            NetconfError::Initialization(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_json_str(&content)
    }
}

impl fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionTarget")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("transport", &self.transport)
            .finish()
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}@{}:{}",
            self.transport, self.username, self.address, self.port
        )
    }
}

/// Owns a session and closes it when dropped
pub(crate) struct SessionGuard {
    inner: Option<Box<dyn Session>>,
}

impl SessionGuard {
    pub(crate) fn new(session: Box<dyn Session>) -> Self {
        Self {
            inner: Some(session),
        }
    }

    pub(crate) fn send(&mut self, request: &str) -> std::result::Result<String, SessionError> {
        match self.inner.as_mut() {
            Some(session) => session.send(request),
            None => Err(SessionError::Closed),
        }
    }

    pub(crate) fn capabilities(&self) -> Vec<String> {
        self.inner
            .as_ref()
            .map(|s| s.capabilities())
            .unwrap_or_default()
    }

    pub(crate) fn close(&mut self) -> std::result::Result<(), SessionError> {
        match self.inner.take() {
            Some(mut session) => {
                info!("closing NETCONF session");
                session.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("error while closing session: {}", e);
        }
    }
}

impl fmt::Debug for SessionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionGuard")
            .field("open", &self.inner.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSession {
        closes: Arc<AtomicUsize>,
    }

    impl Session for CountingSession {
        fn send(&mut self, request: &str) -> std::result::Result<String, SessionError> {
            Ok(request.to_string())
        }

        fn capabilities(&self) -> Vec<String> {
            vec!["urn:ietf:params:netconf:base:1.0".to_string()]
        }

        fn close(&mut self) -> std::result::Result<(), SessionError> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn test_target_defaults() {
        let target =
            ConnectionTarget::from_json_str(r#"{"address": "10.0.0.1", "username": "admin"}"#)
                .unwrap();
        assert_eq!(target.port, 830);
        assert_eq!(target.transport, Transport::Ssh);
        assert_eq!(target.to_string(), "ssh://admin@10.0.0.1:830");
    }

    #[test]
    fn test_target_debug_hides_password() {
        let target = ConnectionTarget::new("r1", "admin", "s3cret")
            .with_port(6513)
            .with_transport(Transport::Tls);
        let debug = format!("{:?}", target);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("Tls"));
        assert_eq!(target.to_string(), "tls://admin@r1:6513");
    }

    #[test]
    fn test_transport_parse() {
        assert_eq!("TLS".parse::<Transport>().unwrap(), Transport::Tls);
        assert!("telnet".parse::<Transport>().is_err());
    }

    #[test]
    fn test_guard_closes_once() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut guard = SessionGuard::new(Box::new(CountingSession {
            closes: closes.clone(),
        }));
        assert_eq!(guard.send("ping").unwrap(), "ping");
        guard.close().unwrap();
        assert!(matches!(guard.send("ping"), Err(SessionError::Closed)));
        drop(guard);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_guard_closes_on_drop() {
        let closes = Arc::new(AtomicUsize::new(0));
        {
            let _guard = SessionGuard::new(Box::new(CountingSession {
                closes: closes.clone(),
            }));
        }
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }
}
