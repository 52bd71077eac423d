//! Connection reuse for the hyper transports.
//!
//! HTTP/1.1 senders are exclusive: one is checked out per request and
//! returned once the body has been read. HTTP/2 senders multiplex, so a
//! single clone-able sender is shared per key while its connection lives.
//! New dials for a key take turns, so requests racing to an origin that may
//! speak HTTP/2 end up on the first connection instead of opening one each.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::{http1, http2};
use tokio::sync::OwnedMutexGuard;

/// HTTP/1.1 request sender.
pub type H1Sender = http1::SendRequest<Full<Bytes>>;

/// HTTP/2 request sender.
pub type H2Sender = http2::SendRequest<Full<Bytes>>;

/// Default idle HTTP/1.1 connections kept per key.
pub const DEFAULT_MAX_IDLE_PER_HOST: usize = 128;

/// Idle and shared connections keyed by origin (and proxy).
pub struct Pool {
    max_idle_per_host: usize,
    idle_h1: Mutex<HashMap<String, Vec<H1Sender>>>,
    shared_h2: Mutex<HashMap<String, H2Sender>>,
    dials: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Pool {
    pub fn new(max_idle_per_host: usize) -> Self {
        Self {
            max_idle_per_host,
            idle_h1: Mutex::new(HashMap::new()),
            shared_h2: Mutex::new(HashMap::new()),
            dials: Mutex::new(HashMap::new()),
        }
    }

    /// Take an idle HTTP/1.1 sender whose connection is still open.
    pub fn checkout_h1(&self, key: &str) -> Option<H1Sender> {
        let mut idle = lock(&self.idle_h1);
        let senders = idle.get_mut(key)?;
        while let Some(sender) = senders.pop() {
            if !sender.is_closed() {
                tracing::debug!(%key, "h1 pool hit");
                return Some(sender);
            }
        }
        None
    }

    /// Return an HTTP/1.1 sender after its response has been fully read.
    pub fn checkin_h1(&self, key: &str, sender: H1Sender) {
        if sender.is_closed() {
            return;
        }
        let mut idle = lock(&self.idle_h1);
        let senders = idle.entry(key.to_string()).or_default();
        if senders.len() < self.max_idle_per_host {
            senders.push(sender);
        }
    }

    /// Number of idle HTTP/1.1 senders for `key`.
    pub fn idle_h1(&self, key: &str) -> usize {
        lock(&self.idle_h1).get(key).map_or(0, Vec::len)
    }

    /// Shared HTTP/2 sender for `key`, if its connection is still open.
    pub fn h2(&self, key: &str) -> Option<H2Sender> {
        let mut shared = lock(&self.shared_h2);
        if let Some(sender) = shared.get(key) {
            if !sender.is_closed() {
                tracing::debug!(%key, "h2 pool hit");
                return Some(sender.clone());
            }
            shared.remove(key);
        }
        None
    }

    /// Publish an HTTP/2 sender for reuse.
    pub fn insert_h2(&self, key: &str, sender: H2Sender) {
        lock(&self.shared_h2).insert(key.to_string(), sender);
    }

    /// Wait for the right to dial `key`. Holders re-check [`Pool::h2`]
    /// first and publish any HTTP/2 sender before releasing the guard.
    pub async fn dial_gate(&self, key: &str) -> OwnedMutexGuard<()> {
        let gate = lock(&self.dials).entry(key.to_string()).or_default().clone();
        gate.lock_owned().await
    }
}

impl Default for Pool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IDLE_PER_HOST)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
