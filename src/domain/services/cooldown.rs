//! Per-key signal cooldown.
//!
//! Keys are usually `venue#symbol`. State lives in memory only; a restart
//! clears every cooldown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct CooldownGate {
    cooldown: Duration,
    last_marked: Mutex<HashMap<String, Instant>>,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_marked: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(venue: &str, symbol: &str) -> String {
        format!("{}#{}", venue.to_lowercase(), symbol.to_uppercase())
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        // A panic while holding the lock leaves the map usable
        self.last_marked.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn remaining_at(&self, marked: Option<&Instant>, now: Instant) -> Option<Duration> {
        let marked = marked?;
        let elapsed = now.saturating_duration_since(*marked);
        if elapsed >= self.cooldown {
            None
        } else {
            Some(self.cooldown - elapsed)
        }
    }

    /// True once the cooldown has elapsed since the last `mark`
    pub fn allow(&self, key: &str) -> bool {
        let entries = self.entries();
        self.remaining_at(entries.get(key), Instant::now()).is_none()
    }

    pub fn mark(&self, key: &str) {
        self.entries().insert(key.to_string(), Instant::now());
    }

    /// Check-and-mark under one lock so two concurrent signals for the same
    /// key cannot both pass. Returns the remaining wait on rejection.
    pub fn try_acquire(&self, key: &str) -> Result<(), Duration> {
        let mut entries = self.entries();
        let now = Instant::now();
        if let Some(remaining) = self.remaining_at(entries.get(key), now) {
            return Err(remaining);
        }
        entries.insert(key.to_string(), now);
        Ok(())
    }

    /// Forgets the mark, e.g. when the acquired signal was not acted on
    pub fn release(&self, key: &str) {
        self.entries().remove(key);
    }

    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let entries = self.entries();
        self.remaining_at(entries.get(key), Instant::now())
    }

    /// Drops expired keys, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries();
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, marked| now.saturating_duration_since(*marked) < self.cooldown);
        before - entries.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.entries().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_allow_after_cooldown_elapses() {
        let gate = CooldownGate::new(Duration::from_secs(60));
        let key = CooldownGate::key("Binance", "btc");
        assert_eq!(key, "binance#BTC");

        assert!(gate.allow(&key));
        gate.mark(&key);
        assert!(!gate.allow(&key));

        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(!gate.allow(&key));
        assert_eq!(gate.remaining(&key), Some(Duration::from_secs(1)));

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(gate.allow(&key));
        assert_eq!(gate.remaining(&key), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let gate = CooldownGate::new(Duration::from_secs(30));
        gate.mark("binance#BTC");
        assert!(!gate.allow("binance#BTC"));
        assert!(gate.allow("binance#ETH"));
        assert!(gate.allow("bybit#BTC"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_try_acquire_is_exclusive() {
        let gate = Arc::new(CooldownGate::new(Duration::from_secs(60)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.try_acquire("binance#SOL").is_ok() }));
        }

        let mut passed = 0;
        for handle in handles {
            if handle.await.unwrap() {
                passed += 1;
            }
        }
        assert_eq!(passed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cooldown_always_allows() {
        let gate = CooldownGate::new(Duration::ZERO);
        assert!(gate.try_acquire("k").is_ok());
        assert!(gate.try_acquire("k").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let gate = CooldownGate::new(Duration::from_secs(10));
        gate.mark("a");
        tokio::time::advance(Duration::from_secs(5)).await;
        gate.mark("b");
        tokio::time::advance(Duration::from_secs(6)).await;

        assert_eq!(gate.purge_expired(), 1);
        assert_eq!(gate.tracked_keys(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_reopens_key() {
        let gate = CooldownGate::new(Duration::from_secs(60));
        assert!(gate.try_acquire("binance#ETH").is_ok());
        assert!(gate.try_acquire("binance#ETH").is_err());

        gate.release("binance#ETH");
        assert!(gate.try_acquire("binance#ETH").is_ok());
    }
}
