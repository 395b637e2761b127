use super::*;

use async_ssh2_tokio::ServerCheckMethod;
use russh::Preferred;
use std::borrow::Cow;

use crate::config;

/// Security level used for SSH algorithm selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum SecurityLevel {
    /// Strict modern algorithms (default).
    Secure,
    /// Good security with broader compatibility.
    Balanced,
    /// Older RTX firmware: SHA-1 key exchange, CBC ciphers, `ssh-rsa` host keys.
    LegacyCompatible,
}

/// Connection security options for SSH establishment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSecurityOptions {
    /// SSH algorithm policy.
    pub level: SecurityLevel,
    /// Server host key verification method.
    pub server_check: ServerCheckMethod,
}

impl Default for ConnectionSecurityOptions {
    fn default() -> Self {
        Self::secure_default()
    }
}

impl ConnectionSecurityOptions {
    /// Algorithm profile `level`, host keys checked against known_hosts.
    pub fn with_level(level: SecurityLevel) -> Self {
        Self {
            level,
            server_check: ServerCheckMethod::DefaultKnownHostsFile,
        }
    }

    pub fn secure_default() -> Self {
        Self::with_level(SecurityLevel::Secure)
    }

    pub fn balanced() -> Self {
        Self::with_level(SecurityLevel::Balanced)
    }

    /// Older firmware; host keys are still checked.
    pub fn legacy_compatible() -> Self {
        Self::with_level(SecurityLevel::LegacyCompatible)
    }

    /// Pins the device's host key (base64 public key as printed by the router).
    pub fn with_host_key(mut self, public_key: impl Into<String>) -> Self {
        self.server_check = ServerCheckMethod::PublicKey(public_key.into());
        self
    }

    /// Skips host key verification. Lab use only.
    pub fn without_host_check(mut self) -> Self {
        self.server_check = ServerCheckMethod::NoCheck;
        self
    }

    pub(super) fn preferred(&self) -> Preferred {
        let (kex, key, cipher, mac) = match self.level {
            SecurityLevel::Secure => (
                config::SECURE_KEX_ORDER,
                config::SECURE_KEY_TYPES,
                config::SECURE_CIPHERS,
                config::SECURE_MAC_ALGORITHMS,
            ),
            SecurityLevel::Balanced => (
                config::BALANCED_KEX_ORDER,
                config::BALANCED_KEY_TYPES,
                config::BALANCED_CIPHERS,
                config::BALANCED_MAC_ALGORITHMS,
            ),
            SecurityLevel::LegacyCompatible => (
                config::LEGACY_KEX_ORDER,
                config::LEGACY_KEY_TYPES,
                config::LEGACY_CIPHERS,
                config::LEGACY_MAC_ALGORITHMS,
            ),
        };
        Preferred {
            kex: Cow::Borrowed(kex),
            key: Cow::Borrowed(key),
            cipher: Cow::Borrowed(cipher),
            mac: Cow::Borrowed(mac),
            compression: Cow::Borrowed(config::DEFAULT_COMPRESSION_ALGORITHMS),
        }
    }
}
