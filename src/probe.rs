//! Guest connectivity probing.
//!
//! The guest is reached through QEMU user-mode networking with a host port
//! forward, so its address is always the host loopback interface. QEMU
//! accepts connections on the forwarded port as soon as it starts, long
//! before the guest's sshd is listening, so a probe only succeeds once the
//! SSH identification banner has been received.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Timeouts;
use crate::error::{Error, Result};

/// Address the forwarded guest ports are reachable on.
pub const GUEST_HOST: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Prefix every SSH server sends before anything else.
const SSH_BANNER_PREFIX: &[u8] = b"SSH-";

/// Result of a successful probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeReport {
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
    /// Time from the first attempt until the guest answered.
    pub elapsed: Duration,
}

/// Polls the forwarded SSH port until the guest answers.
#[derive(Debug, Clone)]
pub struct Prober {
    port: u16,
    poll_interval: Duration,
    attempt_timeout: Duration,
    timeout: Duration,
}

impl Prober {
    /// Create a prober for `port` using the lifecycle timeouts.
    pub fn new(port: u16, timeouts: &Timeouts) -> Self {
        Self {
            port,
            poll_interval: timeouts.poll_interval,
            attempt_timeout: timeouts.probe_attempt,
            timeout: timeouts.boot,
        }
    }

    /// Socket address being probed.
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::from((GUEST_HOST, self.port))
    }

    /// Wait until the guest's SSH server answers.
    ///
    /// # Errors
    ///
    /// [`Error::ConnectivityTimeout`] once the deadline passes without an
    /// answer, [`Error::Cancelled`] if `cancel` fires first.
    pub async fn wait_until_ready(&self, cancel: &CancellationToken) -> Result<ProbeReport> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempts = 0u32;

        tracing::debug!(addr = %self.addr(), timeout = ?self.timeout, "probing guest ssh");

        loop {
            attempts += 1;

            let attempt = tokio::select! {
                result = self.attempt(deadline) => result,
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            };

            match attempt {
                Ok(()) => {
                    let report = ProbeReport {
                        attempts,
                        elapsed: start.elapsed(),
                    };
                    tracing::info!(
                        port = self.port,
                        attempts = report.attempts,
                        elapsed = ?report.elapsed,
                        "guest ssh is reachable"
                    );
                    return Ok(report);
                }
                Err(e) => {
                    tracing::trace!(port = self.port, attempt = attempts, error = %e, "probe failed");
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Err(Error::ConnectivityTimeout {
                    port: self.port,
                    timeout: self.timeout,
                });
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }
    }

    /// One connection attempt: connect and read the SSH banner.
    ///
    /// Bounded by the attempt timeout and never outlives `deadline`.
    async fn attempt(&self, deadline: Instant) -> std::io::Result<()> {
        let read_banner = async {
            let mut stream = TcpStream::connect(self.addr()).await?;
            let mut banner = [0u8; 4];
            stream.read_exact(&mut banner).await?;
            if banner == SSH_BANNER_PREFIX {
                Ok(())
            } else {
                Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    "peer is not an ssh server",
                ))
            }
        };

        let attempt_deadline = deadline.min(Instant::now() + self.attempt_timeout);
        tokio::time::timeout_at(attempt_deadline, read_banner)
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "probe timed out"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    const INTERVAL: Duration = Duration::from_millis(100);

    fn timeouts(boot: Duration) -> Timeouts {
        Timeouts {
            boot,
            poll_interval: INTERVAL,
            probe_attempt: Duration::from_millis(500),
            ..Timeouts::default()
        }
    }

    /// Reserve a free port and release it again.
    async fn free_port() -> u16 {
        let listener = TcpListener::bind((GUEST_HOST, 0)).await.unwrap();
        listener.local_addr().unwrap().port()
    }

    /// Serve an SSH banner on `listener` to every client.
    fn serve_banner(listener: TcpListener) {
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let _ = stream.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await;
            }
        });
    }

    #[tokio::test]
    async fn test_ready_immediately() {
        let listener = TcpListener::bind((GUEST_HOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        serve_banner(listener);

        let prober = Prober::new(port, &timeouts(Duration::from_secs(5)));
        let report = prober
            .wait_until_ready(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test]
    async fn test_ready_only_after_listener_appears() {
        const DELAY_INTERVALS: u32 = 4;
        let port = free_port().await;

        tokio::spawn(async move {
            tokio::time::sleep(INTERVAL * DELAY_INTERVALS).await;
            let listener = TcpListener::bind((GUEST_HOST, port)).await.unwrap();
            serve_banner(listener);
        });

        let prober = Prober::new(port, &timeouts(Duration::from_secs(10)));
        let report = prober
            .wait_until_ready(&CancellationToken::new())
            .await
            .unwrap();

        assert!(report.attempts > DELAY_INTERVALS, "attempts = {}", report.attempts);
        assert!(report.elapsed >= INTERVAL * DELAY_INTERVALS);
    }

    #[tokio::test]
    async fn test_silent_listener_is_not_ready() {
        // Accepts connections but never sends a banner, like QEMU's
        // forwarder before the guest is up.
        let listener = TcpListener::bind((GUEST_HOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut t = timeouts(Duration::from_millis(600));
        t.probe_attempt = Duration::from_millis(100);
        let prober = Prober::new(port, &t);
        let result = prober.wait_until_ready(&CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(Error::ConnectivityTimeout { port: p, .. }) if p == port
        ));
    }

    #[tokio::test]
    async fn test_boot_timeout_shorter_than_attempt_timeout() {
        let listener = TcpListener::bind((GUEST_HOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut t = timeouts(Duration::from_millis(500));
        t.probe_attempt = Duration::from_secs(5);
        let prober = Prober::new(port, &t);

        let start = std::time::Instant::now();
        let result = prober.wait_until_ready(&CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(Error::ConnectivityTimeout { timeout, .. }) if timeout == Duration::from_millis(500)
        ));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed = {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(2), "elapsed = {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_timeout_without_listener() {
        let port = free_port().await;
        let prober = Prober::new(port, &timeouts(Duration::from_millis(500)));

        let start = std::time::Instant::now();
        let result = prober.wait_until_ready(&CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::ConnectivityTimeout { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancelled() {
        let port = free_port().await;
        let prober = Prober::new(port, &timeouts(Duration::from_secs(60)));
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(250)).await;
            trigger.cancel();
        });

        let result = prober.wait_until_ready(&cancel).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
