//! Environment-sourced configuration.
//!
//! No dotenv loading anywhere in this crate — variables are read straight
//! from the process environment, the way `sx9-claude-sdk::ClaudeClient`
//! reads `ANTHROPIC_API_KEY`.

use secrecy::{ExposeSecret, SecretString};

use crate::error::{IngestError, Result};

/// Destination store coordinates plus the optional per-adapter secrets.
///
/// `Debug` is derived by hand below so that secret values never reach a
/// log line; `env_presence()` exposes only booleans for the `/debug`
/// surface.
pub struct Config {
    pub supabase_url: String,
    supabase_key: SecretString,
    abusech_api_key: Option<SecretString>,
    vulncheck_api_key: Option<SecretString>,
    pulsedive_api_key: Option<SecretString>,
    censys_api_key: Option<SecretString>,
}

impl Config {
    /// Build a `Config` from the process environment. `SUPABASE_URL` and
    /// `SUPABASE_KEY` are required; the per-adapter keys are optional and
    /// their absence is a normal, expected condition (adapters skip rather
    /// than fail — spec §4.4).
    pub fn from_env() -> Result<Self> {
        let supabase_url = std::env::var("SUPABASE_URL")
            .map_err(|_| IngestError::MissingEnv("SUPABASE_URL".to_string()))?;
        let supabase_key = std::env::var("SUPABASE_KEY")
            .map_err(|_| IngestError::MissingEnv("SUPABASE_KEY".to_string()))?
            .into();

        Ok(Self {
            supabase_url,
            supabase_key,
            abusech_api_key: std::env::var("ABUSECH_API_KEY").ok().map(Into::into),
            vulncheck_api_key: std::env::var("VULNCHECK_API_KEY").ok().map(Into::into),
            pulsedive_api_key: std::env::var("PULSEDIVE_API_KEY").ok().map(Into::into),
            censys_api_key: std::env::var("CENSYS_API_KEY").ok().map(Into::into),
        })
    }

    pub fn supabase_key(&self) -> &str {
        self.supabase_key.expose_secret()
    }

    pub fn abusech_api_key(&self) -> Option<&str> {
        self.abusech_api_key.as_ref().map(ExposeSecret::expose_secret)
    }

    pub fn vulncheck_api_key(&self) -> Option<&str> {
        self.vulncheck_api_key.as_ref().map(ExposeSecret::expose_secret)
    }

    pub fn pulsedive_api_key(&self) -> Option<&str> {
        self.pulsedive_api_key.as_ref().map(ExposeSecret::expose_secret)
    }

    pub fn censys_api_key(&self) -> Option<&str> {
        self.censys_api_key.as_ref().map(ExposeSecret::expose_secret)
    }

    /// Boolean snapshot of which optional secrets are configured, safe to
    /// serialize straight onto the `/debug/supabase` response.
    pub fn env_presence(&self) -> EnvPresence {
        EnvPresence {
            supabase_url: true,
            supabase_key: true,
            abusech_api_key: self.abusech_api_key.is_some(),
            vulncheck_api_key: self.vulncheck_api_key.is_some(),
            pulsedive_api_key: self.pulsedive_api_key.is_some(),
            censys_api_key: self.censys_api_key.is_some(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("supabase_url", &self.supabase_url)
            .field("supabase_key", &"[REDACTED]")
            .field("abusech_api_key", &self.abusech_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("vulncheck_api_key", &self.vulncheck_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("pulsedive_api_key", &self.pulsedive_api_key.as_ref().map(|_| "[REDACTED]"))
            .field("censys_api_key", &self.censys_api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[derive(Debug, serde::Serialize)]
pub struct EnvPresence {
    pub supabase_url: bool,
    pub supabase_key: bool,
    pub abusech_api_key: bool,
    pub vulncheck_api_key: bool,
    pub pulsedive_api_key: bool,
    pub censys_api_key: bool,
}
