//! Transport establishment: the `Dialer` seam and dual-stack fallback.

use std::fmt;
use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// A duplex byte stream the bridge can pump.
pub trait Transport: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressFamily::V4 => "ipv4",
            AddressFamily::V6 => "ipv6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opens transports to the daemon. Swap in another implementation to add
/// TLS or to fake the network in tests.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> io::Result<Box<dyn Transport>>;
}

/// Plain TCP dialer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(
        &self,
        host: &str,
        port: u16,
        family: AddressFamily,
    ) -> io::Result<Box<dyn Transport>> {
        let addrs = tokio::net::lookup_host((host, port)).await?.filter(|a| match family {
            AddressFamily::V4 => a.is_ipv4(),
            AddressFamily::V6 => a.is_ipv6(),
        });

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(Box::new(stream));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("no {family} address for {host}"),
            )
        }))
    }
}

/// Try IPv4 then IPv6, each bounded by `timeout`. `None` when both fail.
pub async fn dial_dual_stack(
    dialer: &dyn Dialer,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Option<(Box<dyn Transport>, AddressFamily)> {
    for family in [AddressFamily::V4, AddressFamily::V6] {
        match tokio::time::timeout(timeout, dialer.dial(host, port, family)).await {
            Ok(Ok(transport)) => return Some((transport, family)),
            Ok(Err(e)) => {
                tracing::debug!(host, port, family = %family, error = %e, "dial failed");
            }
            Err(_) => {
                tracing::debug!(host, port, family = %family, "dial timed out");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Refuses IPv4, hands out an in-memory pipe for IPv6.
    struct V6Only {
        tried: Mutex<Vec<AddressFamily>>,
    }

    #[async_trait]
    impl Dialer for V6Only {
        async fn dial(
            &self,
            _host: &str,
            _port: u16,
            family: AddressFamily,
        ) -> io::Result<Box<dyn Transport>> {
            self.tried.lock().push(family);
            match family {
                AddressFamily::V4 => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
                AddressFamily::V6 => {
                    let (a, _b) = tokio::io::duplex(64);
                    Ok(Box::new(a))
                }
            }
        }
    }

    /// Never answers.
    struct BlackHole;

    #[async_trait]
    impl Dialer for BlackHole {
        async fn dial(
            &self,
            _host: &str,
            _port: u16,
            _family: AddressFamily,
        ) -> io::Result<Box<dyn Transport>> {
            std::future::pending::<()>().await;
            Err(io::Error::from(io::ErrorKind::TimedOut))
        }
    }

    #[tokio::test]
    async fn falls_back_to_ipv6() {
        let dialer = V6Only {
            tried: Mutex::new(Vec::new()),
        };
        let (_, family) = dial_dual_stack(&dialer, "localhost", 7185, Duration::from_secs(1))
            .await
            .expect("ipv6 should succeed");
        assert_eq!(family, AddressFamily::V6);
        assert_eq!(*dialer.tried.lock(), vec![AddressFamily::V4, AddressFamily::V6]);
    }

    #[tokio::test(start_paused = true)]
    async fn both_families_time_out() {
        let result = dial_dual_stack(&BlackHole, "localhost", 7185, Duration::from_secs(1)).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn tcp_dialer_reaches_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (_, family) = dial_dual_stack(&TcpDialer, "127.0.0.1", port, Duration::from_secs(1))
            .await
            .expect("local listener should accept");
        assert_eq!(family, AddressFamily::V4);
    }
}
