//! Network reachability checks

use async_trait::async_trait;
use kiosk_shared::Url;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Answers whether the backend can be reached right now
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn reachable(&self) -> bool;
}

/// Probe that opens (and drops) a TCP connection to the backend host
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    connect_timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    /// Probe for the host:port of an http(s) base URL
    pub fn for_url(url: &str, connect_timeout: Duration) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::new(format!("{}:{}", host, port), connect_timeout))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl NetworkProbe for TcpProbe {
    async fn reachable(&self) -> bool {
        match timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("[BOOT] {} unreachable: {}", self.addr, e);
                false
            }
            Err(_) => {
                debug!("[BOOT] {} connect timed out", self.addr);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_probe_address_from_url() {
        let t = Duration::from_secs(1);
        assert_eq!(
            TcpProbe::for_url("https://abc.supabase.co/rest/v1", t).unwrap().addr(),
            "abc.supabase.co:443"
        );
        assert_eq!(
            TcpProbe::for_url("http://127.0.0.1:54321", t).unwrap().addr(),
            "127.0.0.1:54321"
        );
        assert!(TcpProbe::for_url("not a url", t).is_none());
        assert!(TcpProbe::for_url("ftp://files.example", t).is_none());
    }

    #[test]
    fn test_probe_address_ignores_userinfo_and_query() {
        let t = Duration::from_secs(1);
        assert_eq!(
            TcpProbe::for_url("https://[::1]", t).unwrap().addr(),
            "[::1]:443"
        );
        assert_eq!(
            TcpProbe::for_url("https://user:pw@host.example", t).unwrap().addr(),
            "host.example:443"
        );
        assert_eq!(
            TcpProbe::for_url("https://host.example?x=1", t).unwrap().addr(),
            "host.example:443"
        );
        assert_eq!(
            TcpProbe::for_url("http://[::1]:8000/rest", t).unwrap().addr(),
            "[::1]:8000"
        );
    }

    #[tokio::test]
    async fn test_reachable_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.reachable().await);

        drop(listener);
        assert!(!probe.reachable().await);
    }
}
