//! Code allocator
//!
//! Turns an owner and a destination URL into a link with a unique short code. Uniqueness is
//! left to the storage: every attempt is a single insert that either reserves the code or
//! conflicts, there is no separate existence check to race against.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use url::Url;

use crate::links::Link;
use crate::short_code::CodeError;
use crate::short_code::CodeSource;
use crate::short_code::RandomCodes;
use crate::short_code::is_reserved;
use crate::short_code::parse_code;
use crate::storage;
use crate::storage::CreateLinkValues;
use crate::storage::SharedStorage;

/// Tuning of generated codes
#[derive(Clone, Debug)]
pub struct AllocatorConfig {
    /// Length of the first candidates
    pub min_length: usize,

    /// Longest length tried before giving up
    pub max_length: usize,

    /// Candidates drawn per length before widening
    pub attempts_per_length: usize,

    /// Upper bound of a single insert
    pub operation_timeout: Duration,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            min_length: 6,
            max_length: 10,
            attempts_per_length: 3,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

/// Reasons an allocation fails
#[derive(Debug, Error)]
pub enum AllocationError {
    /// Not an absolute `http`/`https` URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Refused custom code
    #[error(transparent)]
    InvalidCode(#[from] CodeError),

    /// No owner to attribute the link to
    #[error("Owner can not be empty")]
    InvalidOwner,

    /// The custom code is in use, or was in use by a tombstoned link
    #[error("Short code already exists")]
    CodeTaken,

    /// Every candidate up to the longest length collided
    #[error("No free short code after {attempts} attempts up to length {max_length}")]
    AllocationExhausted {
        /// Number of inserts tried
        attempts: usize,

        /// Longest length tried
        max_length: usize,
    },

    /// The storage failed or timed out, whether the link was persisted is unknown
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(#[source] storage::Error),
}

impl AllocationError {
    /// Can the caller try the same request again later?
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AllocationExhausted { .. } | Self::StorageUnavailable(_)
        )
    }
}

/// Allocates short codes for new links
#[derive(Clone)]
pub struct CodeAllocator {
    /// Storage enforcing the uniqueness of short codes
    storage: SharedStorage,

    /// Where candidates come from
    codes: Arc<dyn CodeSource>,

    /// Code tuning
    config: AllocatorConfig,
}

impl CodeAllocator {
    /// Allocator drawing random codes
    pub fn new(storage: SharedStorage, config: AllocatorConfig) -> Self {
        Self::with_code_source(storage, Arc::new(RandomCodes), config)
    }

    /// Allocator drawing codes from a specific source
    pub fn with_code_source(
        storage: SharedStorage,
        codes: Arc<dyn CodeSource>,
        config: AllocatorConfig,
    ) -> Self {
        Self {
            storage,
            codes,
            config,
        }
    }

    /// Create a link for `original_url`, owned by `owner_id`
    ///
    /// With a `desired_code` that exact (normalized) code is reserved or the allocation fails
    /// with [`AllocationError::CodeTaken`]. Without one, random codes are tried starting at the
    /// minimum length, widening by one character after every run of collisions.
    pub async fn allocate(
        &self,
        owner_id: &str,
        original_url: &str,
        desired_code: Option<&str>,
    ) -> Result<Link, AllocationError> {
        if owner_id.is_empty() {
            return Err(AllocationError::InvalidOwner);
        }

        let original_url = parse_url(original_url)?;

        if let Some(desired_code) = desired_code {
            let short_code = parse_code(desired_code)?;

            return self
                .try_insert(owner_id, &short_code, &original_url)
                .await?
                .ok_or(AllocationError::CodeTaken);
        }

        let mut attempts = 0;

        for length in self.config.min_length..=self.config.max_length {
            for _ in 0..self.config.attempts_per_length {
                attempts += 1;

                let short_code = self.codes.draw(length);

                if is_reserved(&short_code) {
                    tracing::debug!(r#"Short code "{short_code}" is reserved, skipping"#);
                    continue;
                }

                if let Some(link) = self
                    .try_insert(owner_id, &short_code, &original_url)
                    .await?
                {
                    return Ok(link);
                }

                tracing::debug!(r#"Short code "{short_code}" collided"#);
            }

            if length < self.config.max_length {
                tracing::warn!(
                    "No free short code of length {length} after {} attempts, widening",
                    self.config.attempts_per_length
                );
            }
        }

        tracing::error!("No free short code after {attempts} attempts");

        Err(AllocationError::AllocationExhausted {
            attempts,
            max_length: self.config.max_length,
        })
    }

    /// Insert the link, `None` when the short code is taken
    async fn try_insert(
        &self,
        owner_id: &str,
        short_code: &str,
        original_url: &Url,
    ) -> Result<Option<Link>, AllocationError> {
        let values = CreateLinkValues {
            owner_id,
            short_code,
            original_url,
        };

        let result = timeout(
            self.config.operation_timeout,
            self.storage.insert_link(&values),
        )
        .await
        .unwrap_or(Err(storage::Error::Timeout));

        match result {
            Ok(link) => {
                tracing::info!(
                    r#"Allocated short code "{}" for link {}"#,
                    link.short_code,
                    link.id
                );

                Ok(Some(link))
            }
            Err(storage::Error::Conflict) => Ok(None),
            Err(err) => {
                tracing::error!("Could not insert link: {err}");

                Err(AllocationError::StorageUnavailable(err))
            }
        }
    }
}

/// Parse and validate a destination URL
///
/// Only absolute `http` and `https` URLs with a host are accepted
///
/// ```rust
/// let url = "https://www.example.com/";
/// assert!(parse_url(url).is_ok())
/// ```
pub fn parse_url(url: &str) -> Result<Url, AllocationError> {
    let url = Url::parse(url.trim()).map_err(|err| AllocationError::InvalidUrl(err.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(AllocationError::InvalidUrl(format!(
            r#"unsupported scheme "{}""#,
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(AllocationError::InvalidUrl("missing host".to_string()));
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::clicks::ClickSummary;
    use crate::clicks::NewClick;
    use crate::short_code::ALPHABET;
    use crate::storage::Memory;
    use crate::storage::Storage;

    use super::*;

    /// Hands out prepared candidates, in order
    struct FixedCodes(Mutex<VecDeque<String>>);

    impl FixedCodes {
        fn new(codes: &[&str]) -> Arc<Self> {
            Arc::new(Self(Mutex::new(
                codes.iter().map(ToString::to_string).collect(),
            )))
        }
    }

    impl CodeSource for FixedCodes {
        fn draw(&self, length: usize) -> String {
            let code = self.0.lock().unwrap().pop_front().unwrap();
            assert_eq!(length, code.chars().count(), "candidate of wrong length");
            code
        }
    }

    /// Storage that never answers
    struct Unresponsive;

    #[async_trait]
    impl Storage for Unresponsive {
        async fn insert_link(&self, _values: &CreateLinkValues<'_>) -> storage::Result<Link> {
            std::future::pending().await
        }

        async fn find_single_link_by_short_code(
            &self,
            _short_code: &str,
        ) -> storage::Result<Option<Link>> {
            std::future::pending().await
        }

        async fn find_single_link_by_id(&self, _id: i64) -> storage::Result<Option<Link>> {
            std::future::pending().await
        }

        async fn find_all_links_by_owner(&self, _owner_id: &str) -> storage::Result<Vec<Link>> {
            std::future::pending().await
        }

        async fn tombstone_link(&self, _link: &Link) -> storage::Result<Link> {
            std::future::pending().await
        }

        async fn insert_click(&self, _click: &NewClick) -> storage::Result<()> {
            std::future::pending().await
        }

        async fn summarize_clicks(&self, _link: &Link) -> storage::Result<ClickSummary> {
            std::future::pending().await
        }
    }

    fn memory() -> SharedStorage {
        Arc::new(Memory::new())
    }

    #[tokio::test]
    async fn test_allocate_generated_code() {
        let storage = memory();
        let allocator = CodeAllocator::new(storage.clone(), AllocatorConfig::default());

        let link = allocator
            .allocate("user_1", "https://example.com/a/b", None)
            .await
            .unwrap();

        assert_eq!(6, link.short_code.len());
        assert!(link.short_code.bytes().all(|ch| ALPHABET.contains(&ch)));
        assert_eq!("https://example.com/a/b", link.original_url);
        assert_eq!("user_1", link.owner_id);
        assert!(!link.is_tombstoned());

        let stored = storage
            .find_single_link_by_short_code(&link.short_code)
            .await
            .unwrap();
        assert_eq!(Some(link), stored);
    }

    #[tokio::test]
    async fn test_allocate_many_unique_codes() {
        let allocator = CodeAllocator::new(memory(), AllocatorConfig::default());

        let mut codes = Vec::new();
        for _ in 0..200 {
            let link = allocator
                .allocate("user_1", "https://example.com/", None)
                .await
                .unwrap();
            codes.push(link.short_code);
        }

        codes.sort();
        codes.dedup();
        assert_eq!(200, codes.len());
    }

    #[tokio::test]
    async fn test_allocate_retries_after_collision() {
        let storage = memory();
        let codes = FixedCodes::new(&["aaaaaa", "aaaaaa", "bbbbbb"]);
        let allocator =
            CodeAllocator::with_code_source(storage, codes, AllocatorConfig::default());

        let first = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();
        assert_eq!("aaaaaa", first.short_code);

        let second = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();
        assert_eq!("bbbbbb", second.short_code);
    }

    #[tokio::test]
    async fn test_allocate_skips_reserved_codes() {
        let storage = memory();
        let codes = FixedCodes::new(&["api", "xyz"]);
        let config = AllocatorConfig {
            min_length: 3,
            ..AllocatorConfig::default()
        };
        let allocator = CodeAllocator::with_code_source(storage.clone(), codes, config);

        let link = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();
        assert_eq!("xyz", link.short_code);

        assert_eq!(
            None,
            storage.find_single_link_by_short_code("api").await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_allocate_widens_after_collisions() {
        let codes = FixedCodes::new(&["aaaaaa", "aaaaaa", "aaaaaa", "aaaaaa", "aaaaaaa"]);
        let allocator =
            CodeAllocator::with_code_source(memory(), codes, AllocatorConfig::default());

        allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();

        let link = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();
        assert_eq!("aaaaaaa", link.short_code);
    }

    #[tokio::test]
    async fn test_allocate_exhausted() {
        let codes = FixedCodes::new(&["aaaaaa", "aaaaaa", "aaaaaa"]);
        let config = AllocatorConfig {
            min_length: 6,
            max_length: 6,
            attempts_per_length: 2,
            ..AllocatorConfig::default()
        };
        let allocator = CodeAllocator::with_code_source(memory(), codes, config);

        allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap();

        let err = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AllocationError::AllocationExhausted {
                attempts: 2,
                max_length: 6
            }
        ));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_allocate_desired_code() {
        let allocator = CodeAllocator::new(memory(), AllocatorConfig::default());

        let link = allocator
            .allocate("user_1", "https://example.com/", Some("/launch/"))
            .await
            .unwrap();
        assert_eq!("launch", link.short_code);

        // taken, also for other owners
        let err = allocator
            .allocate("user_2", "https://example.org/", Some("launch"))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::CodeTaken));
        assert!(!err.is_retryable());

        // codes are case-sensitive
        let link = allocator
            .allocate("user_2", "https://example.org/", Some("Launch"))
            .await
            .unwrap();
        assert_eq!("Launch", link.short_code);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_allocate_desired_code_concurrently() {
        let allocator = CodeAllocator::new(memory(), AllocatorConfig::default());

        let handles = (0..16)
            .map(|index| {
                let allocator = allocator.clone();

                tokio::spawn(async move {
                    allocator
                        .allocate(
                            &format!("user_{index}"),
                            "https://example.com/",
                            Some("popular"),
                        )
                        .await
                })
            })
            .collect::<Vec<_>>();

        let mut succeeded = 0;
        let mut taken = 0;

        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => succeeded += 1,
                Err(AllocationError::CodeTaken) => taken += 1,
                Err(err) => panic!("Unexpected error: {err}"),
            }
        }

        assert_eq!(1, succeeded);
        assert_eq!(15, taken);
    }

    #[tokio::test]
    async fn test_allocate_tombstoned_code_is_taken() {
        let storage = memory();
        let allocator = CodeAllocator::new(storage.clone(), AllocatorConfig::default());

        let link = allocator
            .allocate("user_1", "https://example.com/", Some("retired"))
            .await
            .unwrap();
        storage.tombstone_link(&link).await.unwrap();

        let err = allocator
            .allocate("user_1", "https://example.com/", Some("retired"))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::CodeTaken));
    }

    #[tokio::test]
    async fn test_allocate_invalid_input_persists_nothing() {
        let storage = memory();
        let allocator = CodeAllocator::new(storage.clone(), AllocatorConfig::default());

        let err = allocator
            .allocate("user_1", "not-a-url", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidUrl(_)));

        let err = allocator
            .allocate("user_1", "not-a-url", Some("some-code"))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidUrl(_)));

        let err = allocator
            .allocate("user_1", "https://example.com/", Some("what?"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AllocationError::InvalidCode(CodeError::ForbiddenCharacter('?'))
        ));

        let err = allocator
            .allocate("", "https://example.com/", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationError::InvalidOwner));

        let links = storage.find_all_links_by_owner("user_1").await.unwrap();
        assert!(links.is_empty());
        assert_eq!(
            None,
            storage
                .find_single_link_by_short_code("some-code")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_allocate_timeout_is_failure() {
        let config = AllocatorConfig {
            operation_timeout: Duration::from_millis(10),
            ..AllocatorConfig::default()
        };
        let allocator = CodeAllocator::new(Arc::new(Unresponsive), config);

        let err = allocator
            .allocate("user_1", "https://example.com/", None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            AllocationError::StorageUnavailable(storage::Error::Timeout)
        ));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_url() {
        assert!(parse_url("https://www.example.com/").is_ok());
        assert!(parse_url("http://localhost:8080/path?query=1#fragment").is_ok());

        assert!(parse_url("not-a-url").is_err());
        assert!(parse_url("/relative/path").is_err());
        assert!(parse_url("javascript:alert(1)").is_err());
        assert!(parse_url("mailto:someone@example.com").is_err());
        assert!(parse_url("ftp://example.com/file").is_err());
        assert!(parse_url("").is_err());
    }
}
