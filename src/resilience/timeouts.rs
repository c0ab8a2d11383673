//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap candidate connects with a deadline
//! - Track tunnel inactivity across both relay directions
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors surface as `io::ErrorKind::TimedOut`, same as any dial failure

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::time::Instant;

/// Run `fut` with a deadline, mapping expiry to `ErrorKind::TimedOut`.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            format!("timed out after {:?}", limit),
        )),
    }
}

/// Inactivity timer shared by the two directions of a session.
///
/// Both directions call [`IdleTimer::touch`] on progress; [`IdleTimer::expired`]
/// resolves once neither has touched it for the configured limit.
#[derive(Debug)]
pub struct IdleTimer {
    origin: Instant,
    /// Millis since `origin` of the last activity.
    last_activity: AtomicU64,
    limit: Option<Duration>,
}

impl IdleTimer {
    /// `None` disables the timer.
    pub fn new(limit: Option<Duration>) -> Self {
        Self {
            origin: Instant::now(),
            last_activity: AtomicU64::new(0),
            limit,
        }
    }

    /// Record activity now.
    pub fn touch(&self) {
        let elapsed = self.origin.elapsed().as_millis() as u64;
        self.last_activity.store(elapsed, Ordering::Relaxed);
    }

    /// Resolve when the timer expires; never resolves when disabled.
    pub async fn expired(&self) {
        let limit = match self.limit {
            Some(limit) => limit,
            None => return std::future::pending().await,
        };

        loop {
            let last = Duration::from_millis(self.last_activity.load(Ordering::Relaxed));
            let deadline = self.origin + last + limit;
            if Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep_until(deadline).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_maps_to_timed_out() {
        let err = with_deadline(Duration::from_millis(20), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, io::Error>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn deadline_passes_inner_result() {
        let value = with_deadline(Duration::from_secs(1), async { Ok::<_, io::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn idle_timer_expires_without_activity() {
        let started = Instant::now();
        let timer = IdleTimer::new(Some(Duration::from_millis(50)));
        timer.expired().await;
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn touching_postpones_expiry() {
        let started = Instant::now();
        let timer = IdleTimer::new(Some(Duration::from_millis(80)));

        let toucher = async {
            for _ in 0..4 {
                tokio::time::sleep(Duration::from_millis(30)).await;
                timer.touch();
            }
        };
        tokio::join!(toucher, timer.expired());

        assert!(started.elapsed() >= Duration::from_millis(120 + 80));
    }

    #[tokio::test]
    async fn disabled_timer_never_fires() {
        let timer = IdleTimer::new(None);
        let fired = tokio::time::timeout(Duration::from_millis(50), timer.expired()).await;
        assert!(fired.is_err());
    }
}
