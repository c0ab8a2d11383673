//! Tunnel identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique tunnel IDs for tracing
//! - Enforce the concurrent tunnel cap
//! - Track the number of live tunnels for metrics and shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::observability::metrics;

/// Global atomic counter for tunnel IDs.
/// Using relaxed ordering is sufficient since we only need uniqueness, not synchronization.
static TUNNEL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TunnelId(u64);

impl TunnelId {
    /// Generate a new unique tunnel ID.
    pub fn new() -> Self {
        Self(TUNNEL_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for TunnelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TunnelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tun-{}", self.0)
    }
}

/// Admits tunnels up to a fixed cap and counts the live ones.
#[derive(Debug, Clone)]
pub struct TunnelTracker {
    /// Current count of active tunnels.
    active_count: Arc<AtomicU64>,
    /// One permit per admissible tunnel.
    slots: Arc<Semaphore>,
}

impl TunnelTracker {
    /// Create a tracker admitting at most `max_tunnels` at once.
    pub fn new(max_tunnels: usize) -> Self {
        Self {
            active_count: Arc::new(AtomicU64::new(0)),
            slots: Arc::new(Semaphore::new(max_tunnels)),
        }
    }

    /// Admit a new tunnel, or `None` when the cap is reached.
    /// The returned guard releases the slot on drop.
    pub fn try_admit(&self) -> Option<TunnelGuard> {
        let permit = self.slots.clone().try_acquire_owned().ok()?;
        let active = self.active_count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::set_active_tunnels(active);
        Some(TunnelGuard {
            active_count: Arc::clone(&self.active_count),
            id: TunnelId::new(),
            _permit: permit,
        })
    }

    /// Get current active tunnel count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Get current free tunnel slots.
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}

/// Guard that tracks a tunnel's lifetime.
/// Decrements active count and frees the slot when dropped.
#[derive(Debug)]
pub struct TunnelGuard {
    active_count: Arc<AtomicU64>,
    id: TunnelId,
    _permit: OwnedSemaphorePermit,
}

impl TunnelGuard {
    /// Get this tunnel's ID.
    pub fn id(&self) -> TunnelId {
        self.id
    }
}

impl Drop for TunnelGuard {
    fn drop(&mut self) {
        let active = self.active_count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::set_active_tunnels(active);
        tracing::trace!(tunnel_id = %self.id, "Tunnel released");
    }
}
