use std::time::{SystemTime, UNIX_EPOCH};

use crate::consts::{DEVNET_API_URL, LOCAL_API_URL, MAINNET_API_URL};

/// Ledger gateway selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseUrl {
    Localhost,
    Devnet,
    Mainnet,
    Custom(String),
}

impl BaseUrl {
    pub fn get_url(&self) -> String {
        match self {
            BaseUrl::Mainnet => MAINNET_API_URL.to_string(),
            BaseUrl::Devnet => DEVNET_API_URL.to_string(),
            BaseUrl::Localhost => LOCAL_API_URL.to_string(),
            BaseUrl::Custom(url) => url.trim_end_matches('/').to_string(),
        }
    }

    /// Parse a network name ("mainnet", "devnet", "localhost") or an
    /// explicit `http(s)://` URL.
    pub fn parse(s: &str) -> Result<Self, String> {
        match s.to_lowercase().as_str() {
            "mainnet" => Ok(BaseUrl::Mainnet),
            "devnet" => Ok(BaseUrl::Devnet),
            "localhost" | "local" => Ok(BaseUrl::Localhost),
            _ if s.starts_with("http://") || s.starts_with("https://") => {
                Ok(BaseUrl::Custom(s.to_string()))
            }
            _ => Err(format!(
                "Unknown network '{s}'. Use: mainnet, devnet, localhost, or an http(s) URL"
            )),
        }
    }
}

/// Current unix time in whole seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_base_url() {
        assert_eq!(BaseUrl::parse("Mainnet").unwrap(), BaseUrl::Mainnet);
        assert_eq!(BaseUrl::parse("devnet").unwrap(), BaseUrl::Devnet);
        assert_eq!(
            BaseUrl::parse("http://127.0.0.1:9000/").unwrap().get_url(),
            "http://127.0.0.1:9000"
        );
        assert!(BaseUrl::parse("moonnet").is_err());
    }
}
