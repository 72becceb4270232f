//! Test helpers shared by the integration tests

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use websvc_monitor::TargetConfig;
use websvc_monitor::monitors::probe::{ProbeRequest, ProbeTransport, TransportError};

/// Create a target with a one-call batch and no pauses worth waiting for
pub fn create_test_target(id: i64, name: &str, url: &str) -> TargetConfig {
    let mut target = TargetConfig::new(id, name, url);
    target.calls_per_batch = 1;
    target.timeout_secs = 2;
    target
}

/// Transport answering every request with `status` after `delay`
pub struct CountingTransport {
    pub status: u16,
    pub delay: Duration,
    pub started: AtomicUsize,
    pub finished: AtomicUsize,
}

impl CountingTransport {
    pub fn new(status: u16, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            status,
            delay,
            started: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        })
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProbeTransport for CountingTransport {
    async fn send(&self, _request: &ProbeRequest) -> Result<u16, TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

/// Poll `condition` every 20ms until it holds or `timeout` expires
pub async fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
