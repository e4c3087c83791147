//! Region selection, credential resolution, and tracing setup.

use clap::Args;
use url::Url;

use crate::client::ApiClient;
use crate::error::{HnyError, Result};

pub const US_BASE_URL: &str = "https://api.honeycomb.io/1/";
pub const EU_BASE_URL: &str = "https://api.eu1.honeycomb.io/1/";

/// Regional API host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum Region {
    #[default]
    Us,
    Eu,
}

impl Region {
    pub fn base_url(self) -> &'static str {
        match self {
            Region::Us => US_BASE_URL,
            Region::Eu => EU_BASE_URL,
        }
    }
}

/// Connection flags shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct ConnectionArgs {
    /// API key; falls back to the HONEYCOMB_API_KEY environment variable
    #[arg(long, env = "HONEYCOMB_API_KEY", hide_env_values = true)]
    pub api_key: String,

    /// Regional API host to target
    #[arg(long, value_enum, default_value_t = Region::Us)]
    pub region: Region,

    /// Explicit API base URL, overriding --region (for proxies and testing)
    #[arg(long)]
    pub api_url: Option<String>,
}

impl ConnectionArgs {
    /// Resolve the versioned base URL: an explicit override wins, otherwise
    /// the regional host. A missing `/1/` suffix on an override is added so
    /// endpoint joins land on the right API version.
    pub fn base_url(&self) -> Result<Url> {
        let raw = match &self.api_url {
            Some(url) => {
                let trimmed = url.trim_end_matches('/');
                format!("{trimmed}/1/")
            }
            None => self.region.base_url().to_string(),
        };
        Url::parse(&raw).map_err(|e| HnyError::Config(format!("invalid API URL '{raw}': {e}")))
    }

    pub fn client(&self) -> Result<ApiClient> {
        if self.api_key.trim().is_empty() {
            return Err(HnyError::Config("API key must not be empty".to_string()));
        }
        Ok(ApiClient::new(self.base_url()?, self.api_key.clone()))
    }
}

/// Install the fmt subscriber, honoring RUST_LOG with an info default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(region: Region, api_url: Option<&str>) -> ConnectionArgs {
        ConnectionArgs {
            api_key: "hcaik_test".to_string(),
            region,
            api_url: api_url.map(str::to_string),
        }
    }

    #[test]
    fn regions_map_to_hosts() {
        assert_eq!(
            args(Region::Us, None).base_url().unwrap().as_str(),
            "https://api.honeycomb.io/1/"
        );
        assert_eq!(
            args(Region::Eu, None).base_url().unwrap().as_str(),
            "https://api.eu1.honeycomb.io/1/"
        );
    }

    #[test]
    fn override_beats_region_and_gets_versioned() {
        let url = args(Region::Eu, Some("http://localhost:8080"))
            .base_url()
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/1/");

        let url = args(Region::Us, Some("http://localhost:8080/"))
            .base_url()
            .unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/1/");
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = args(Region::Us, None);
        let err = ConnectionArgs {
            api_key: "  ".to_string(),
            ..err
        }
        .client()
        .unwrap_err();
        assert!(matches!(err, HnyError::Config(_)));
    }
}
