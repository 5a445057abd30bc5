//! Credential resolution.
//!
//! Profiles never carry a password, only a `secretRef`. A [`SecretResolver`]
//! turns that reference into a [`Secret`] at the moment a handle is opened; the
//! value is not cached by the pool and never appears in `Debug` output or errors.

use crate::error::{DbError, DbResult};
use async_trait::async_trait;
use std::collections::HashMap;

/// A resolved credential. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw value. Only adapters handing it to a driver should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Mask every occurrence of this secret inside `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.0.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.0, "****")
        }
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret(****)")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("****")
    }
}

/// Resolves a profile's secret reference into a credential.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, secret_ref: &str) -> DbResult<Secret>;
}

/// Treats the secret reference as the name of an environment variable.
#[derive(Debug, Clone, Default)]
pub struct EnvSecretResolver {
    prefix: Option<String>,
}

impl EnvSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend `prefix` to every reference before the lookup.
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
        }
    }

    fn variable_name(&self, secret_ref: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}{}", prefix, secret_ref),
            None => secret_ref.to_string(),
        }
    }
}

#[async_trait]
impl SecretResolver for EnvSecretResolver {
    async fn resolve(&self, secret_ref: &str) -> DbResult<Secret> {
        let name = self.variable_name(secret_ref);
        std::env::var(&name).map(Secret::new).map_err(|_| {
            DbError::connect_failed(
                format!("Secret reference '{}' could not be resolved", secret_ref),
                format!("Set the environment variable {}", name),
            )
        })
    }
}

/// Fixed in-memory map of references to secrets.
#[derive(Debug, Clone, Default)]
pub struct StaticSecretResolver {
    secrets: HashMap<String, Secret>,
}

impl StaticSecretResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret(mut self, secret_ref: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(secret_ref.into(), Secret::new(value));
        self
    }
}

#[async_trait]
impl SecretResolver for StaticSecretResolver {
    async fn resolve(&self, secret_ref: &str) -> DbResult<Secret> {
        self.secrets.get(secret_ref).cloned().ok_or_else(|| {
            DbError::connect_failed(
                format!("Secret reference '{}' could not be resolved", secret_ref),
                "Register the secret with the resolver",
            )
        })
    }
}
