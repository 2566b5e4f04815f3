//! Proxy leasing.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::http::{Proxy, ProxyKind};

/// What happened to a leased proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyOutcome {
    /// Usable again.
    Healthy,
    /// Banned by the target; never lease it again.
    Banned,
}

/// Supplier of proxies, one lease per task.
///
/// A leased proxy belongs to exactly one in-flight task until it is
/// released.
#[async_trait]
pub trait ProxySource: Send + Sync {
    /// Lease a proxy, or `None` when none is free right now.
    async fn lease(&self) -> Option<Proxy>;

    async fn release(&self, proxy: Proxy, outcome: ProxyOutcome);
}

#[derive(Debug, Default)]
struct PoolState {
    free: VecDeque<Proxy>,
    leased: usize,
    banned: Vec<Proxy>,
}

/// In-memory rotating pool. Released proxies go to the back of the queue.
#[derive(Debug, Default)]
pub struct ProxyPool {
    state: Mutex<PoolState>,
}

impl ProxyPool {
    pub fn new(proxies: impl IntoIterator<Item = Proxy>) -> Self {
        Self {
            state: Mutex::new(PoolState {
                free: proxies.into_iter().collect(),
                ..PoolState::default()
            }),
        }
    }

    /// Parse one proxy per line; blank lines and `#` comments are skipped.
    pub fn from_lines(text: &str, default_kind: ProxyKind) -> Result<Self, ConfigError> {
        let proxies = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|line| Proxy::parse(line, default_kind))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(proxies))
    }

    pub async fn available(&self) -> usize {
        self.state.lock().await.free.len()
    }

    pub async fn leased(&self) -> usize {
        self.state.lock().await.leased
    }

    pub async fn banned(&self) -> Vec<Proxy> {
        self.state.lock().await.banned.clone()
    }
}

#[async_trait]
impl ProxySource for ProxyPool {
    async fn lease(&self) -> Option<Proxy> {
        let mut state = self.state.lock().await;
        let proxy = state.free.pop_front()?;
        state.leased += 1;
        Some(proxy)
    }

    async fn release(&self, proxy: Proxy, outcome: ProxyOutcome) {
        let mut state = self.state.lock().await;
        state.leased = state.leased.saturating_sub(1);
        match outcome {
            ProxyOutcome::Healthy => {
                debug!(proxy = %proxy, "Proxy released");
                state.free.push_back(proxy);
            }
            ProxyOutcome::Banned => {
                info!(proxy = %proxy, "Proxy banned");
                state.banned.push(proxy);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn leases_are_exclusive_and_rotate() {
        let pool = ProxyPool::from_lines("10.0.0.1:80\n# spare\n\n10.0.0.2:80\n", ProxyKind::Http)
            .unwrap();
        let a = pool.lease().await.unwrap();
        let b = pool.lease().await.unwrap();
        assert_ne!(a.host, b.host);
        assert!(pool.lease().await.is_none());
        assert_eq!(pool.leased().await, 2);

        pool.release(a, ProxyOutcome::Healthy).await;
        let again = pool.lease().await.unwrap();
        assert_eq!(again.host, "10.0.0.1");
    }

    #[tokio::test]
    async fn banned_proxies_leave_rotation() {
        let pool = ProxyPool::new([Proxy::new(ProxyKind::Http, "10.0.0.9", 8080)]);
        let proxy = pool.lease().await.unwrap();
        pool.release(proxy, ProxyOutcome::Banned).await;
        assert!(pool.lease().await.is_none());
        assert_eq!(pool.banned().await.len(), 1);
        assert_eq!(pool.available().await, 0);
    }

    #[test]
    fn malformed_line_fails() {
        assert!(matches!(
            ProxyPool::from_lines("10.0.0.1:80\nnot-a-proxy\n", ProxyKind::Http),
            Err(ConfigError::MalformedProxy { .. })
        ));
    }
}
