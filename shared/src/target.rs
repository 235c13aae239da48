//! `host[:port]` parsing for the client's `--server` argument

use crate::DEFAULT_PORT;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
}

impl ConnectionTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parses `host`, `host:port` or `[v6]:port`. A missing port falls back to
    /// [`DEFAULT_PORT`]; a port that does not parse is an error.
    pub fn parse(text: &str) -> Result<Self, String> {
        let text = text.trim();
        if text.is_empty() {
            return Err("server address is empty".to_string());
        }

        let (host, port) = if let Some(rest) = text.strip_prefix('[') {
            let (host, after) = rest
                .split_once(']')
                .ok_or_else(|| format!("unterminated IPv6 address in {:?}", text))?;
            match after.strip_prefix(':') {
                Some(port) => (host, Some(port)),
                None if after.is_empty() => (host, None),
                None => return Err(format!("unexpected {:?} after address", after)),
            }
        } else if text.matches(':').count() == 1 {
            let (host, port) = text.split_once(':').unwrap_or((text, ""));
            (host, Some(port))
        } else {
            (text, None)
        };

        let port = match port {
            Some(port) => port
                .parse::<u16>()
                .map_err(|_| format!("invalid port {:?}", port))?,
            None => DEFAULT_PORT,
        };
        if host.is_empty() {
            return Err("server host is empty".to_string());
        }
        Ok(Self::new(host, port))
    }

    /// Whether this points at the machine we are running on, in which case
    /// the client may host the server in-process.
    pub fn is_local(&self) -> bool {
        matches!(
            self.host.to_ascii_lowercase().as_str(),
            "localhost" | "127.0.0.1" | "::1"
        )
    }
}

impl FromStr for ConnectionTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_only() {
        let target = ConnectionTarget::parse("celeste.example.net").unwrap();
        assert_eq!(target.host, "celeste.example.net");
        assert_eq!(target.port, DEFAULT_PORT);
        assert!(!target.is_local());
    }

    #[test]
    fn test_parse_host_and_port() {
        let target: ConnectionTarget = "localhost:4000".parse().unwrap();
        assert_eq!(target, ConnectionTarget::new("localhost", 4000));
        assert!(target.is_local());
        assert_eq!(target.to_string(), "localhost:4000");
    }

    #[test]
    fn test_parse_ipv6() {
        let target = ConnectionTarget::parse("[::1]:5000").unwrap();
        assert_eq!(target.host, "::1");
        assert_eq!(target.port, 5000);
        assert!(target.is_local());
        assert_eq!(target.to_string(), "[::1]:5000");

        let bare = ConnectionTarget::parse("fe80::1").unwrap();
        assert_eq!(bare.port, DEFAULT_PORT);
    }

    #[test]
    fn test_parse_errors() {
        assert!(ConnectionTarget::parse("").is_err());
        assert!(ConnectionTarget::parse("host:notaport").is_err());
        assert!(ConnectionTarget::parse(":2782").is_err());
        assert!(ConnectionTarget::parse("[::1").is_err());
    }
}
