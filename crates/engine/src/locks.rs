use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Sharded map of per-symbol mutexes.
///
/// Every read-modify-write on a symbol's position state runs under its lock;
/// operations on disjoint symbols proceed in parallel. Lock order is always
/// symbol lock first, then the external call, so there is nothing to
/// deadlock against — the bounded acquire exists for the admin close path.
#[derive(Default)]
pub struct SymbolLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn shard(&self, symbol: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(symbol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for the symbol's lock.
    pub async fn acquire(&self, symbol: &str) -> OwnedMutexGuard<()> {
        self.shard(symbol).lock_owned().await
    }

    /// Bounded wait; `None` when the lock is still held at the deadline.
    pub async fn acquire_timeout(
        &self,
        symbol: &str,
        wait: Duration,
    ) -> Option<OwnedMutexGuard<()>> {
        tokio::time::timeout(wait, self.shard(symbol).lock_owned())
            .await
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_symbol_serializes() {
        let locks = SymbolLocks::new();
        let guard = locks.acquire("BTCUSDT").await;
        assert!(locks
            .acquire_timeout("BTCUSDT", Duration::from_millis(20))
            .await
            .is_none());
        drop(guard);
        assert!(locks
            .acquire_timeout("BTCUSDT", Duration::from_millis(20))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn disjoint_symbols_run_in_parallel() {
        let locks = SymbolLocks::new();
        let _btc = locks.acquire("BTCUSDT").await;
        // ETH is untouched by the held BTC lock
        assert!(locks
            .acquire_timeout("ETHUSDT", Duration::from_millis(20))
            .await
            .is_some());
    }
}
