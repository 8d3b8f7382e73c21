//! Ordered proxy pool with a sequential cursor and a pinned working proxy

use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::Proxy;

#[derive(Debug, Default)]
struct PoolState {
    cursor: usize,
    pinned: Option<Arc<Proxy>>,
}

/// All configured proxies in configuration order.
///
/// The cursor only moves forward: once it passes the end the pool reports
/// exhaustion until [`ProxyPool::reset`] is called.
#[derive(Debug)]
pub struct ProxyPool {
    proxies: Vec<Arc<Proxy>>,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Build a pool, dropping duplicate entries but keeping first-seen order
    pub fn new(proxies: Vec<Proxy>) -> Self {
        let mut unique: Vec<Arc<Proxy>> = Vec::with_capacity(proxies.len());
        for proxy in proxies {
            if !unique.iter().any(|existing| **existing == proxy) {
                unique.push(Arc::new(proxy));
            }
        }

        Self {
            proxies: unique,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Sequential accessor.
    ///
    /// Returns the pinned proxy when there is one, otherwise the proxy at the
    /// cursor. `force_rotate` abandons a pinned proxy and steps past it; with
    /// nothing pinned the cursor already points at an untried proxy and stays.
    /// The cursor is not advanced by a plain call.
    pub fn next(&self, force_rotate: bool) -> Option<Arc<Proxy>> {
        let mut state = self.state.lock();

        if force_rotate && state.pinned.take().is_some() {
            state.cursor += 1;
        }

        if let Some(pinned) = &state.pinned {
            return Some(pinned.clone());
        }

        self.proxies.get(state.cursor).cloned()
    }

    /// Drop the pin and move to the next proxy
    pub fn mark_failed(&self) {
        let mut state = self.state.lock();
        state.pinned = None;
        state.cursor += 1;
    }

    /// Keep using `proxy` until it fails or a rotation is forced
    pub fn pin(&self, proxy: Arc<Proxy>) {
        self.state.lock().pinned = Some(proxy);
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.cursor = 0;
        state.pinned = None;
    }

    pub fn pinned(&self) -> Option<Arc<Proxy>> {
        self.state.lock().pinned.clone()
    }

    pub fn cursor(&self) -> usize {
        self.state.lock().cursor
    }

    /// True once the cursor has walked past the last proxy
    pub fn is_exhausted(&self) -> bool {
        let state = self.state.lock();
        state.pinned.is_none() && state.cursor >= self.proxies.len()
    }

    pub fn all(&self) -> &[Arc<Proxy>] {
        &self.proxies
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_pool(n: u16) -> ProxyPool {
        ProxyPool::new((1..=n).map(|i| Proxy::new("127.0.0.1", 8080 + i)).collect())
    }

    #[test]
    fn test_next_does_not_advance() {
        let pool = create_pool(3);
        assert_eq!(pool.next(false).unwrap().port(), 8081);
        assert_eq!(pool.next(false).unwrap().port(), 8081);
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn test_mark_failed_advances_until_exhausted() {
        let pool = create_pool(2);

        pool.mark_failed();
        assert_eq!(pool.next(false).unwrap().port(), 8082);

        pool.mark_failed();
        assert!(pool.next(false).is_none());
        assert!(pool.is_exhausted());

        // Stays exhausted; no wrap-around
        pool.mark_failed();
        assert!(pool.next(false).is_none());
    }

    #[test]
    fn test_pinned_proxy_is_reused() {
        let pool = create_pool(3);
        pool.mark_failed();

        let proxy = pool.next(false).unwrap();
        pool.pin(proxy.clone());
        assert_eq!(pool.next(false).unwrap(), proxy);
        assert_eq!(pool.pinned().unwrap(), proxy);
    }

    #[test]
    fn test_force_rotate_clears_pin_and_advances() {
        let pool = create_pool(3);
        let first = pool.next(false).unwrap();
        pool.pin(first.clone());

        let rotated = pool.next(true).unwrap();
        assert_ne!(rotated, first);
        assert_eq!(rotated.port(), 8082);
        assert!(pool.pinned().is_none());
    }

    #[test]
    fn test_force_rotate_without_pin_keeps_cursor() {
        let pool = create_pool(3);
        pool.mark_failed();
        pool.mark_failed();

        // 8082 just failed; rotation must land on the untried 8083
        let rotated = pool.next(true).unwrap();
        assert_eq!(rotated.port(), 8083);
        assert_eq!(pool.cursor(), 2);

        pool.reset();
        assert_eq!(pool.next(true).unwrap().port(), 8081);
    }

    #[test]
    fn test_reset() {
        let pool = create_pool(2);
        pool.mark_failed();
        pool.mark_failed();
        assert!(pool.next(false).is_none());

        pool.reset();
        assert_eq!(pool.next(false).unwrap().port(), 8081);
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn test_duplicates_are_dropped() {
        let pool = ProxyPool::new(vec![
            Proxy::new("127.0.0.1", 8081),
            Proxy::new("127.0.0.1", 8082),
            Proxy::new("127.0.0.1", 8081).with_credentials("u", "p"),
        ]);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.all()[1].port(), 8082);
    }

    #[test]
    fn test_empty_pool() {
        let pool = ProxyPool::new(Vec::new());
        assert!(pool.is_empty());
        assert!(pool.next(false).is_none());
        assert!(pool.is_exhausted());
    }
}
