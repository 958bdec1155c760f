//! Configuration from the environment

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use anyhow::ensure;
use axum::http::HeaderName;
use url::Url;

use crate::allocator::AllocatorConfig;
use crate::clicks::ClickSettings;
use crate::short_code::BaseUrl;
use crate::short_code::CodeSource;
use crate::short_code::RandomCodes;
use crate::utils::env_var;
use crate::utils::env_var_or_else;
use crate::utils::env_var_parsed_or;

const DEFAULT_ADDRESS: &str = "0.0.0.0:6000";
const DEFAULT_BASE_URL: &str = "http://localhost:6000";
const DEFAULT_LINK_CACHE_TTL_SECONDS: u64 = 60;
const IDENTITY_SECRET_LENGTH: usize = 32;

/// Everything needed to run Snip
#[derive(Clone, Debug)]
pub struct Config {
    /// Address to listen on
    pub address: SocketAddr,

    /// Base URL in front of every short code
    pub base_url: BaseUrl,

    /// Secret shared with the identity provider to verify owner tokens
    pub identity_secret: String,

    /// Tuning of generated codes
    pub allocator: AllocatorConfig,

    /// How long active links are cached by the resolver, zero disables the cache
    pub link_cache_ttl: Duration,

    /// Which clicks are recorded, and how
    pub clicks: ClickSettings,
}

impl Config {
    /// Read the configuration from the environment
    ///
    /// # Errors
    ///
    /// Will return `Err` when a variable is set to an invalid value
    pub fn from_env() -> Result<Self> {
        let defaults = AllocatorConfig::default();

        let allocator = AllocatorConfig {
            min_length: env_var_parsed_or("CODE_MIN_LENGTH", defaults.min_length)?,
            max_length: env_var_parsed_or("CODE_MAX_LENGTH", defaults.max_length)?,
            attempts_per_length: env_var_parsed_or(
                "CODE_ATTEMPTS_PER_LENGTH",
                defaults.attempts_per_length,
            )?,
            operation_timeout: Duration::from_millis(env_var_parsed_or(
                "STORAGE_TIMEOUT_MS",
                u64::try_from(defaults.operation_timeout.as_millis())?,
            )?),
        };

        validate_allocator(&allocator)?;

        let defaults = ClickSettings::default();

        let clicks = ClickSettings {
            queue_capacity: env_var_parsed_or("CLICK_QUEUE_CAPACITY", defaults.queue_capacity)?,
            record_referrer: env_var_parsed_or("CLICK_RECORD_REFERRER", defaults.record_referrer)?,
            record_user_agent: env_var_parsed_or(
                "CLICK_RECORD_USER_AGENT",
                defaults.record_user_agent,
            )?,
            country_header: env_var("CLICK_COUNTRY_HEADER")
                .map(|name| {
                    HeaderName::from_bytes(name.as_bytes())
                        .with_context(|| format!("Invalid value for `CLICK_COUNTRY_HEADER`: {name}"))
                })
                .transpose()?,
        };

        ensure!(
            clicks.queue_capacity > 0,
            "`CLICK_QUEUE_CAPACITY` should be at least 1"
        );

        let base_url = env_var_or_else("BASE_URL", || String::from(DEFAULT_BASE_URL));
        let base_url = Url::parse(&base_url)
            .with_context(|| format!("Invalid value for `BASE_URL`: {base_url}"))?;

        Ok(Self {
            address: setup_address()?,
            base_url: BaseUrl::new(base_url),
            identity_secret: setup_identity_secret(),
            allocator,
            link_cache_ttl: Duration::from_secs(env_var_parsed_or(
                "LINK_CACHE_TTL_SECONDS",
                DEFAULT_LINK_CACHE_TTL_SECONDS,
            )?),
            clicks,
        })
    }
}

/// Check the code lengths make sense together
fn validate_allocator(allocator: &AllocatorConfig) -> Result<()> {
    ensure!(
        allocator.min_length > 0,
        "`CODE_MIN_LENGTH` should be at least 1"
    );
    ensure!(
        allocator.max_length >= allocator.min_length,
        "`CODE_MAX_LENGTH` should be at least `CODE_MIN_LENGTH`"
    );
    ensure!(
        allocator.attempts_per_length > 0,
        "`CODE_ATTEMPTS_PER_LENGTH` should be at least 1"
    );

    Ok(())
}

fn setup_identity_secret() -> String {
    env_var_or_else("IDENTITY_JWT_SECRET", || {
        let identity_secret = RandomCodes.draw(IDENTITY_SECRET_LENGTH);
        tracing::info!(
            "`IDENTITY_JWT_SECRET` is not set, generating temporary one: {identity_secret}"
        );
        identity_secret
    })
}

fn setup_address() -> Result<SocketAddr> {
    let address = env_var_or_else("ADDRESS", || String::from(DEFAULT_ADDRESS));
    let mut address = address
        .parse::<SocketAddr>()
        .with_context(|| format!("Invalid value for `ADDRESS`: {address}"))?;

    // optional override of just the port
    if let Some(port) = env_var("PORT") {
        let port = port
            .parse::<u16>()
            .with_context(|| format!("Invalid value for `PORT`: {port}"))?;

        address.set_port(port);
    }

    Ok(address)
}
