//! Redirect resolver
//!
//! The hot path: a point read by short code, optionally served from a cache of active links

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use moka::future::Cache;

use crate::click_recorder::ClickRecorder;
use crate::clicks::ClickMetadata;
use crate::clicks::NewClick;
use crate::links::Link;
use crate::storage;
use crate::storage::SharedStorage;

/// Most links kept in the cache
const CACHE_CAPACITY: u64 = 10_000;

/// Outcome of resolving a short code
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RedirectResult {
    /// Active link, redirect to the original URL
    Found {
        /// Where to send the visitor
        original_url: String,
    },

    /// Unknown short code
    NotFound,

    /// The link is tombstoned
    Gone,
}

/// Resolves short codes into redirects
#[derive(Clone)]
pub struct RedirectResolver {
    /// Storage to look links up in
    storage: SharedStorage,

    /// Where clicks go
    clicks: ClickRecorder,

    /// Active links by short code, `None` when disabled
    cache: Option<Cache<String, Link>>,

    /// Bumped by every `forget`, a lookup that saw it change may not leave its link cached
    forgotten: Arc<AtomicU64>,
}

impl RedirectResolver {
    /// Create a resolver, caching active links for `cache_ttl` (zero disables the cache)
    pub fn new(storage: SharedStorage, clicks: ClickRecorder, cache_ttl: Duration) -> Self {
        let cache = (!cache_ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(cache_ttl)
                .build()
        });

        Self {
            storage,
            clicks,
            cache,
            forgotten: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Resolve a short code, exact and case-sensitive
    ///
    /// A click is queued for every `Found`, without waiting for it to be persisted
    ///
    /// # Errors
    ///
    /// Will return `Err` when the storage can not be read
    pub async fn resolve(
        &self,
        short_code: &str,
        metadata: ClickMetadata,
    ) -> storage::Result<RedirectResult> {
        let Some(link) = self.lookup(short_code).await? else {
            tracing::debug!(r#"Short code "{short_code}" not found"#);

            return Ok(RedirectResult::NotFound);
        };

        if link.is_tombstoned() {
            tracing::debug!(r#"Short code "{short_code}" is tombstoned"#);

            return Ok(RedirectResult::Gone);
        }

        tracing::debug!(
            r#"Short code "{short_code}" redirecting to: {}"#,
            link.original_url
        );

        self.clicks.record(NewClick::new(&link, metadata));

        Ok(RedirectResult::Found {
            original_url: link.original_url,
        })
    }

    /// Drop a short code from the cache, after it got tombstoned
    pub async fn forget(&self, short_code: &str) {
        if let Some(cache) = &self.cache {
            self.forgotten.fetch_add(1, Ordering::SeqCst);
            cache.invalidate(short_code).await;
        }
    }

    /// Find the link, from cache when possible
    async fn lookup(&self, short_code: &str) -> storage::Result<Option<Link>> {
        if let Some(link) = self.cached(short_code).await {
            return Ok(Some(link));
        }

        let forgotten = self.forgotten.load(Ordering::SeqCst);

        let link = self
            .storage
            .find_single_link_by_short_code(short_code)
            .await?;

        if let (Some(cache), Some(link)) = (&self.cache, &link)
            && !link.is_tombstoned()
        {
            cache.insert(short_code.to_string(), link.clone()).await;

            // a tombstone may have landed after the read, its `forget` could have run before the
            // insert above
            if self.forgotten.load(Ordering::SeqCst) != forgotten {
                cache.invalidate(short_code).await;
            }
        }

        Ok(link)
    }

    /// Cached active link
    async fn cached(&self, short_code: &str) -> Option<Link> {
        match &self.cache {
            Some(cache) => cache.get(short_code).await,
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::allocator::AllocatorConfig;
    use crate::allocator::CodeAllocator;
    use crate::click_recorder::ClickWorker;
    use crate::clicks::ClickSummary;
    use crate::storage::CreateLinkValues;
    use crate::storage::Memory;
    use crate::storage::Storage;

    use super::*;

    fn setup(cache_ttl: Duration) -> (SharedStorage, CodeAllocator, RedirectResolver, ClickWorker) {
        let storage: SharedStorage = Arc::new(Memory::new());
        let allocator = CodeAllocator::new(storage.clone(), AllocatorConfig::default());
        let (clicks, worker) = ClickRecorder::new(64);
        let resolver = RedirectResolver::new(storage.clone(), clicks, cache_ttl);

        (storage, allocator, resolver, worker)
    }

    #[tokio::test]
    async fn test_resolve_after_allocate() {
        for cache_ttl in [Duration::ZERO, Duration::from_secs(60)] {
            let (_, allocator, resolver, _worker) = setup(cache_ttl);

            let link = allocator
                .allocate("user_1", "https://example.com/a/b", None)
                .await
                .unwrap();

            for _ in 0..3 {
                let result = resolver
                    .resolve(&link.short_code, ClickMetadata::default())
                    .await
                    .unwrap();

                assert_eq!(
                    RedirectResult::Found {
                        original_url: "https://example.com/a/b".to_string()
                    },
                    result
                );
            }
        }
    }

    #[tokio::test]
    async fn test_resolve_not_found() {
        let (_, _, resolver, _worker) = setup(Duration::from_secs(60));

        let result = resolver
            .resolve("nonexistent-code", ClickMetadata::default())
            .await
            .unwrap();
        assert_eq!(RedirectResult::NotFound, result);
    }

    #[tokio::test]
    async fn test_resolve_is_case_sensitive() {
        let (_, allocator, resolver, _worker) = setup(Duration::ZERO);

        allocator
            .allocate("user_1", "https://example.com/", Some("Launch"))
            .await
            .unwrap();

        let result = resolver
            .resolve("launch", ClickMetadata::default())
            .await
            .unwrap();
        assert_eq!(RedirectResult::NotFound, result);
    }

    #[tokio::test]
    async fn test_resolve_tombstoned() {
        let (storage, allocator, resolver, _worker) = setup(Duration::from_secs(60));

        let link = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();

        // warm the cache
        resolver
            .resolve(&link.short_code, ClickMetadata::default())
            .await
            .unwrap();

        storage.tombstone_link(&link).await.unwrap();
        resolver.forget(&link.short_code).await;

        let result = resolver
            .resolve(&link.short_code, ClickMetadata::default())
            .await
            .unwrap();
        assert_eq!(RedirectResult::Gone, result);
    }

    #[tokio::test]
    async fn test_resolve_does_not_mutate_link() {
        let (storage, allocator, resolver, worker) = setup(Duration::ZERO);

        let link = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();

        for _ in 0..5 {
            resolver
                .resolve(&link.short_code, ClickMetadata::default())
                .await
                .unwrap();
        }

        let stored = storage.find_single_link_by_id(link.id).await.unwrap();
        assert_eq!(Some(link.clone()), stored);

        // clicks were queued, only for found links
        resolver
            .resolve("nonexistent-code", ClickMetadata::default())
            .await
            .unwrap();

        let shutdown = tokio_util::sync::CancellationToken::new();
        shutdown.cancel();
        worker.run(storage.clone(), shutdown).await;

        assert_eq!(5, storage.summarize_clicks(&link).await.unwrap().total);
    }

    /// Memory storage that holds short code reads until released
    struct HeldReads {
        inner: Memory,
        reached: tokio::sync::Notify,
        release: tokio::sync::Notify,
        hold: std::sync::atomic::AtomicBool,
    }

    #[async_trait::async_trait]
    impl Storage for HeldReads {
        async fn insert_link(&self, values: &CreateLinkValues<'_>) -> storage::Result<Link> {
            self.inner.insert_link(values).await
        }

        async fn find_single_link_by_short_code(
            &self,
            short_code: &str,
        ) -> storage::Result<Option<Link>> {
            let link = self.inner.find_single_link_by_short_code(short_code).await;

            if self.hold.swap(false, Ordering::SeqCst) {
                self.reached.notify_one();
                self.release.notified().await;
            }

            link
        }

        async fn find_single_link_by_id(&self, id: i64) -> storage::Result<Option<Link>> {
            self.inner.find_single_link_by_id(id).await
        }

        async fn find_all_links_by_owner(&self, owner_id: &str) -> storage::Result<Vec<Link>> {
            self.inner.find_all_links_by_owner(owner_id).await
        }

        async fn tombstone_link(&self, link: &Link) -> storage::Result<Link> {
            self.inner.tombstone_link(link).await
        }

        async fn insert_click(&self, click: &NewClick) -> storage::Result<()> {
            self.inner.insert_click(click).await
        }

        async fn summarize_clicks(&self, link: &Link) -> storage::Result<ClickSummary> {
            self.inner.summarize_clicks(link).await
        }
    }

    #[tokio::test]
    async fn test_resolve_tombstoned_during_read() {
        let held = Arc::new(HeldReads {
            inner: Memory::new(),
            reached: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            hold: std::sync::atomic::AtomicBool::new(false),
        });
        let storage: SharedStorage = held.clone();
        let allocator = CodeAllocator::new(storage.clone(), AllocatorConfig::default());
        let (clicks, _worker) = ClickRecorder::new(64);
        let resolver = RedirectResolver::new(storage.clone(), clicks, Duration::from_secs(60));

        let link = allocator
            .allocate("user_1", "https://example.com/", Some("abc234"))
            .await
            .unwrap();

        held.hold.store(true, Ordering::SeqCst);

        let in_flight = tokio::spawn({
            let resolver = resolver.clone();
            async move {
                resolver
                    .resolve("abc234", ClickMetadata::default())
                    .await
                    .unwrap()
            }
        });

        // the read saw the active link, tombstone it before the read returns
        held.reached.notified().await;
        storage.tombstone_link(&link).await.unwrap();
        resolver.forget("abc234").await;
        held.release.notify_one();

        // the read started before the tombstone, it may still redirect
        assert_eq!(
            RedirectResult::Found {
                original_url: "https://example.com/".to_string()
            },
            in_flight.await.unwrap()
        );

        let result = resolver
            .resolve("abc234", ClickMetadata::default())
            .await
            .unwrap();
        assert_eq!(RedirectResult::Gone, result);
    }
}
