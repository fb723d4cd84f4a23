//! Shared secret used to authenticate with a managed scheduler.
//!
//! The value never shows up in Debug or Display output, and is zeroed from
//! memory on drop. Call sites that need the bytes must call `expose()`.

use std::fmt;

use zeroize::Zeroize;

pub const REDACTED: &str = "[REDACTED]";

/// Environment variable consulted at `connect()` time.
pub const DEFAULT_SECRET_ENV: &str = "RSCHED_SECRET";

#[derive(Zeroize, Default)]
#[zeroize(drop)]
pub struct AuthSecret {
    inner: String,
}

impl AuthSecret {
    pub fn new(inner: impl Into<String>) -> Self {
        Self {
            inner: inner.into(),
        }
    }

    /// Reads `var` from the environment. Unset or non-unicode values are
    /// treated as an empty secret.
    pub fn from_env(var: &str) -> Self {
        Self::new(std::env::var(var).unwrap_or_default())
    }

    pub fn expose(&self) -> &[u8] {
        self.inner.as_bytes()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl fmt::Debug for AuthSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthSecret").field(&REDACTED).finish()
    }
}

impl fmt::Display for AuthSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}
