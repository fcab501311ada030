//! Process stop signals.

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

/// SIGINT (ctrl-c) or, on unix, SIGTERM as sent by container runtimes.
///
/// Handlers are registered by [`ShutdownSignal::install`], so a signal that
/// arrives before [`ShutdownSignal::recv`] is awaited is not lost.
pub struct ShutdownSignal {
    #[cfg(unix)]
    interrupt: Signal,
    #[cfg(unix)]
    terminate: Signal,
}

impl ShutdownSignal {
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            #[cfg(unix)]
            interrupt: signal(SignalKind::interrupt())?,
            #[cfg(unix)]
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Wait for the first stop signal and return its name.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::select! {
            _ = self.interrupt.recv() => Ok("SIGINT"),
            _ = self.terminate.recv() => Ok("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> std::io::Result<&'static str> {
        tokio::signal::ctrl_c().await.map(|()| "ctrl-c")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::process::Command;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn sigterm_requests_shutdown() {
        let mut shutdown = ShutdownSignal::install().unwrap();

        let status = Command::new("kill")
            .args(["-TERM", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        let received = tokio::time::timeout(Duration::from_secs(5), shutdown.recv())
            .await
            .expect("no signal within 5s")
            .unwrap();
        assert_eq!(received, "SIGTERM");
    }
}
