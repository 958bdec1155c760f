//! Short codes
//!
//! Generated codes are drawn from an alphabet without look-alike characters, custom codes are
//! normalized before they are stored or looked up

use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;
use percent_encoding::utf8_percent_encode;
use rand_core::OsRng;
use rand_core::RngCore;
use rand_core::TryRngCore;
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;
use url::Url;

/// Characters of generated codes, `0`, `O`, `o`, `1`, `l` and `I` are left out
pub const ALPHABET: &[u8] = b"23456789abcdefghijkmnpqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

/// Longest custom code, in characters
pub const MAX_CODE_LENGTH: usize = 64;

/// Prefix of the API routes, codes can not shadow them
const RESERVED_PREFIX: &str = "api";

/// Characters that stay readable in a short URL
const SHORT_URL_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// Reasons a custom code is refused
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodeError {
    /// Nothing left after normalization
    #[error("Short code can not be empty")]
    Empty,

    /// Longer than [`MAX_CODE_LENGTH`]
    #[error("Short code can not be longer than {MAX_CODE_LENGTH} characters")]
    TooLong,

    /// Would end up as query or fragment of the short URL
    #[error(r#"Short code can not contain "{0}""#)]
    ForbiddenCharacter(char),

    /// Whitespace or control characters
    #[error("Short code can not contain whitespace or control characters")]
    Invisible,

    /// Collides with the API routes
    #[error(r#"Short code can not start with "api/""#)]
    Reserved,

    /// Clients collapse these path segments, the short URL would lead elsewhere
    #[error(r#"Short code can not contain empty, "." or ".." segments"#)]
    DotSegment,
}

/// Draw a code of `length` characters uniformly from the [`ALPHABET`]
pub fn generate<R>(rng: &mut R, length: usize) -> String
where
    R: RngCore + ?Sized,
{
    // bytes at or above the zone would favour the start of the alphabet
    let zone = 256 - (256 % ALPHABET.len());

    let mut code = String::with_capacity(length);
    let mut buffer = [0u8; 32];

    while code.len() < length {
        rng.fill_bytes(&mut buffer);

        for byte in buffer {
            let byte = usize::from(byte);

            if byte < zone && code.len() < length {
                code.push(char::from(ALPHABET[byte % ALPHABET.len()]));
            }
        }
    }

    code
}

/// Source of candidate codes for the allocator
pub trait CodeSource: Send + Sync + 'static {
    /// Draw a fresh candidate of `length` characters
    fn draw(&self, length: usize) -> String;
}

/// Candidates from the operating system random generator
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomCodes;

impl CodeSource for RandomCodes {
    fn draw(&self, length: usize) -> String {
        generate(&mut OsRng.unwrap_err(), length)
    }
}

/// Normalize and validate a custom code
///
/// - Leading and trailing slashes are removed
/// - Unicode normalization (NFC)
///
/// ```rust
/// assert_eq!(parse_code("/some-code/"), Ok("some-code".to_string()));
/// ```
pub fn parse_code(code: &str) -> Result<String, CodeError> {
    let code = normalize_code(code);

    if code.is_empty() {
        return Err(CodeError::Empty);
    }

    if code.chars().count() > MAX_CODE_LENGTH {
        return Err(CodeError::TooLong);
    }

    for ch in code.chars() {
        if ch == '?' || ch == '#' {
            return Err(CodeError::ForbiddenCharacter(ch));
        }

        if ch.is_whitespace() || ch.is_control() {
            return Err(CodeError::Invisible);
        }
    }

    if code
        .split('/')
        .any(|segment| matches!(segment, "" | "." | ".."))
    {
        return Err(CodeError::DotSegment);
    }

    if is_reserved(&code) {
        return Err(CodeError::Reserved);
    }

    Ok(code)
}

/// Is the code shadowed by the API routes?
pub fn is_reserved(code: &str) -> bool {
    code == RESERVED_PREFIX
        || code
            .strip_prefix(RESERVED_PREFIX)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Normalize a code without validating it, used for lookups
pub fn normalize_code(code: &str) -> String {
    code.trim_matches('/').nfc().collect()
}

/// Base URL in front of every short code
#[derive(Clone, Debug)]
pub struct BaseUrl(Url);

impl BaseUrl {
    /// Wrap a base URL
    pub fn new(url: Url) -> Self {
        Self(url)
    }

    /// Full short URL for a code, percent-encoded where needed
    pub fn short_url(&self, code: &str) -> String {
        format!(
            "{}/{}",
            self.0.as_str().trim_end_matches('/'),
            utf8_percent_encode(code, SHORT_URL_ENCODE_SET)
        )
    }
}
