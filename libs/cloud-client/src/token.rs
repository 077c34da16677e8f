//! Access-token lifecycle shared by every caller of a [`BaseClient`](crate::BaseClient).
//!
//! The current [`TokenSnapshot`] is published through an `ArcSwap`, so reads
//! never block. Only the refresh (retriever call + swap) runs under a lock.
//! The staleness check happens before the lock is taken, so callers that see
//! an expiring token at the same moment each run their own refresh in turn.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{ClientError, TokenError};

/// Immutable access token plus its validity window.
///
/// `Debug` redacts the token, and its buffer is zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct TokenSnapshot {
    access_token: String,
    issued_at: i64,
    expires_in: u64,
}

impl TokenSnapshot {
    /// Token issued at `issued_at` (unix seconds), valid for `expires_in` seconds.
    #[must_use]
    pub fn new(access_token: impl Into<String>, issued_at: i64, expires_in: u64) -> Self {
        Self {
            access_token: access_token.into(),
            issued_at,
            expires_in,
        }
    }

    /// Token issued now.
    #[must_use]
    pub fn issued_now(access_token: impl Into<String>, expires_in: u64) -> Self {
        Self::new(access_token, now_epoch(), expires_in)
    }

    /// Raw bearer token; callers must not log it.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    #[must_use]
    pub fn issued_at(&self) -> i64 {
        self.issued_at
    }

    #[must_use]
    pub fn expires_in(&self) -> u64 {
        self.expires_in
    }

    /// Unix second at which the token stops being valid.
    #[must_use]
    pub fn expires_at(&self) -> i64 {
        self.issued_at
            .saturating_add(i64::try_from(self.expires_in).unwrap_or(i64::MAX))
    }

    /// Whether the token is inside `window` of its expiry at unix second `now`.
    #[must_use]
    pub fn is_stale_at(&self, now: i64, window: Duration) -> bool {
        let horizon = now.saturating_add(i64::try_from(window.as_secs()).unwrap_or(i64::MAX));
        horizon >= self.expires_at()
    }
}

impl fmt::Debug for TokenSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSnapshot")
            .field("access_token", &"[REDACTED]")
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of fresh access tokens.
///
/// Called once at client construction and again whenever the current token
/// enters the expiry window. Retrying a failed fetch is the retriever's own
/// business; the client surfaces the error to the in-flight call.
#[async_trait]
pub trait TokenRetriever: Send + Sync {
    /// Fetch a new token.
    ///
    /// # Errors
    ///
    /// Returns [`TokenError`] when no token could be obtained.
    async fn fetch(&self) -> Result<TokenSnapshot, TokenError>;
}

/// Retriever for a fixed, caller-supplied token.
///
/// The snapshot it hands out has a zero lifetime, so every request goes
/// through a (trivial) refresh that reinstalls the same token.
pub struct StaticTokenRetriever {
    token: TokenSnapshot,
}

impl StaticTokenRetriever {
    #[must_use]
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            token: TokenSnapshot::new(access_token, 0, 0),
        }
    }
}

impl fmt::Debug for StaticTokenRetriever {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenRetriever").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenRetriever for StaticTokenRetriever {
    async fn fetch(&self) -> Result<TokenSnapshot, TokenError> {
        Ok(self.token.clone())
    }
}

/// Holds the current snapshot and serializes refreshes.
pub(crate) struct TokenManager {
    current: ArcSwap<TokenSnapshot>,
    retriever: Arc<dyn TokenRetriever>,
    expire_window: Duration,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    /// Fetch the initial token and start tracking it.
    pub(crate) async fn start(
        retriever: Arc<dyn TokenRetriever>,
        expire_window: Duration,
    ) -> Result<Self, ClientError> {
        let initial = retriever.fetch().await?;
        Ok(Self {
            current: ArcSwap::from_pointee(initial),
            retriever,
            expire_window,
            refresh_lock: Mutex::new(()),
        })
    }

    /// Lock-free read of the current snapshot.
    pub(crate) fn current(&self) -> Arc<TokenSnapshot> {
        self.current.load_full()
    }

    pub(crate) fn replace(&self, snapshot: TokenSnapshot) {
        self.current.store(Arc::new(snapshot));
    }

    /// Refresh the token if it is inside the expiry window.
    ///
    /// The check itself takes no lock; only the retriever call and the swap are
    /// serialized.
    pub(crate) async fn ensure_fresh(&self) -> Result<Arc<TokenSnapshot>, ClientError> {
        let snapshot = self.current();
        if !snapshot.is_stale_at(now_epoch(), self.expire_window) {
            return Ok(snapshot);
        }

        let _guard = self.refresh_lock.lock().await;
        let fresh = Arc::new(self.retriever.fetch().await?);
        tracing::debug!(expires_at = fresh.expires_at(), "access token refreshed");
        self.current.store(Arc::clone(&fresh));
        Ok(fresh)
    }
}

fn now_epoch() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct CountingRetriever {
        calls: AtomicUsize,
        expires_in: u64,
    }

    impl CountingRetriever {
        fn new(expires_in: u64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                expires_in,
            }
        }
    }

    #[async_trait]
    impl TokenRetriever for CountingRetriever {
        async fn fetch(&self) -> Result<TokenSnapshot, TokenError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenSnapshot::issued_now(format!("tok-{n}"), self.expires_in))
        }
    }

    struct FailingAfterFirst {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRetriever for FailingAfterFirst {
        async fn fetch(&self) -> Result<TokenSnapshot, TokenError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Ok(TokenSnapshot::new("initial", 0, 0))
            } else {
                Err(TokenError::Request("identity provider unavailable".into()))
            }
        }
    }

    /// Records whether two fetches ever ran at the same time.
    struct OverlapDetector {
        calls: AtomicUsize,
        in_flight: AtomicBool,
        overlapped: AtomicBool,
    }

    #[async_trait]
    impl TokenRetriever for OverlapDetector {
        async fn fetch(&self) -> Result<TokenSnapshot, TokenError> {
            if self.in_flight.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.store(false, Ordering::SeqCst);
            Ok(TokenSnapshot::issued_now(format!("tok-{n}"), 30))
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stale_callers_refresh_one_at_a_time() {
        const CALLERS: usize = 8;

        let retriever = Arc::new(OverlapDetector {
            calls: AtomicUsize::new(0),
            in_flight: AtomicBool::new(false),
            overlapped: AtomicBool::new(false),
        });
        let manager = Arc::new(
            TokenManager::start(retriever.clone(), Duration::from_secs(60))
                .await
                .unwrap(),
        );

        let barrier = Arc::new(tokio::sync::Barrier::new(CALLERS));
        let tasks: Vec<_> = (0..CALLERS)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    manager.ensure_fresh().await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert!(!retriever.overlapped.load(Ordering::SeqCst), "fetches must not overlap");
        assert_eq!(
            retriever.calls.load(Ordering::SeqCst),
            CALLERS + 1,
            "initial fetch plus one refresh per stale caller"
        );
    }

    #[test]
    fn stale_when_window_reaches_expiry() {
        let token = TokenSnapshot::new("t", 1_000, 600);
        let window = Duration::from_secs(60);

        assert!(!token.is_stale_at(1_000, window));
        assert!(!token.is_stale_at(1_539, window));
        assert!(token.is_stale_at(1_540, window));
        assert!(token.is_stale_at(2_000, window));
    }

    #[test]
    fn zero_lifetime_is_always_stale() {
        let token = TokenSnapshot::new("t", 0, 0);
        assert!(token.is_stale_at(0, Duration::ZERO));
    }

    #[test]
    fn debug_redacts_token() {
        let token = TokenSnapshot::new("super-secret", 1, 2);
        let dbg = format!("{token:?}");
        assert!(!dbg.contains("super-secret"));
        assert!(dbg.contains("REDACTED"));
    }

    #[tokio::test]
    async fn fresh_token_is_not_refreshed() {
        let retriever = Arc::new(CountingRetriever::new(3600));
        let manager = TokenManager::start(retriever.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        let token = manager.ensure_fresh().await.unwrap();

        assert_eq!(token.access_token(), "tok-0");
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 1, "only the initial fetch");
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_once_per_request() {
        let retriever = Arc::new(CountingRetriever::new(30));
        let manager = TokenManager::start(retriever.clone(), Duration::from_secs(60))
            .await
            .unwrap();

        let first = manager.ensure_fresh().await.unwrap();
        let second = manager.ensure_fresh().await.unwrap();

        assert_eq!(first.access_token(), "tok-1");
        assert_eq!(second.access_token(), "tok-2");
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 3);
        assert_eq!(manager.current().access_token(), "tok-2");
    }

    #[tokio::test]
    async fn retriever_failure_surfaces_and_keeps_old_snapshot() {
        let retriever = Arc::new(FailingAfterFirst {
            calls: AtomicUsize::new(0),
        });
        let manager = TokenManager::start(retriever, Duration::from_secs(60))
            .await
            .unwrap();

        let err = manager.ensure_fresh().await.unwrap_err();

        assert!(matches!(err, ClientError::TokenRetrieval(TokenError::Request(_))));
        assert_eq!(manager.current().access_token(), "initial");
    }

    #[tokio::test]
    async fn replace_installs_new_snapshot() {
        let manager = TokenManager::start(
            Arc::new(StaticTokenRetriever::new("static")),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        manager.replace(TokenSnapshot::issued_now("rotated", 3600));

        assert_eq!(manager.current().access_token(), "rotated");
    }

    #[tokio::test]
    async fn static_retriever_reinstalls_same_token() {
        let manager = TokenManager::start(
            Arc::new(StaticTokenRetriever::new("static")),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let token = manager.ensure_fresh().await.unwrap();
        assert_eq!(token.access_token(), "static");
    }
}
