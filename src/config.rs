use ethers::types::Address;
use std::str::FromStr;

use crate::error::ConfigError;

/// Process-wide configuration, loaded once at startup from the environment (§6).
/// A missing or malformed required value is a fatal initialisation error (exit code 1).
#[derive(Debug, Clone)]
pub struct Config {
    pub contract_address: Address,
    pub chain_id: u64,
    pub game_api_base: String,
    pub privkey: String,
    pub jwt_secret: String,
    pub rpc_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let contract_address = required("CONTRACT_ADDRESS")?;
        let contract_address = Address::from_str(contract_address.trim()).map_err(|e| {
            ConfigError::Invalid("CONTRACT_ADDRESS", e.to_string())
        })?;

        let chain_id = optional("CHAIN_ID").map_or(Ok(8453), |v| {
            v.parse::<u64>()
                .map_err(|e| ConfigError::Invalid("CHAIN_ID", e.to_string()))
        })?;

        let game_api_base =
            optional("GAME_API_BASE").unwrap_or_else(|| "http://localhost".to_string());

        let privkey = required("PRIVKEY")?;
        let jwt_secret = required("JWT_SECRET")?;
        let rpc_url = required("CHAIN_RPC_URL")?;

        Ok(Config {
            contract_address,
            chain_id,
            game_api_base,
            privkey,
            jwt_secret,
            rpc_url,
        })
    }

    /// Secret used to sign bearer tokens, scoped to this contract: `BASE ∥ "-" ∥
    /// contract_address_lower` (§3, §4.9). Only the address half is lowercased — the base
    /// secret is used verbatim.
    pub fn token_secret(&self) -> String {
        let address_lower = format!("{:#x}", self.contract_address).to_lowercase();
        format!("{}-{}", self.jwt_secret, address_lower)
    }

    /// Composes the server URL published on chain for a given game's port (§6).
    pub fn server_url(&self, port: u16) -> String {
        if self.game_api_base.contains("://") {
            format!("{}:{}", self.game_api_base, port)
        } else {
            format!("http://{}:{}", self.game_api_base, port)
        }
    }
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn optional(key: &'static str) -> Option<String> {
    std::env::var(key).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            contract_address: Address::zero(),
            chain_id: 8453,
            game_api_base: "http://localhost".to_string(),
            privkey: "deadbeef".to_string(),
            jwt_secret: "base-secret".to_string(),
            rpc_url: "http://127.0.0.1:8545".to_string(),
        }
    }

    #[test]
    fn server_url_appends_port_when_base_has_scheme() {
        let cfg = base_config();
        assert_eq!(cfg.server_url(8001), "http://localhost:8001");
    }

    #[test]
    fn server_url_prepends_scheme_when_base_is_bare_host() {
        let mut cfg = base_config();
        cfg.game_api_base = "games.example.com".to_string();
        assert_eq!(cfg.server_url(8042), "http://games.example.com:8042");
    }

    #[test]
    fn token_secret_lowercases_only_the_address_half() {
        let mut cfg = base_config();
        cfg.jwt_secret = "BaseSecret".to_string();
        let secret = cfg.token_secret();
        assert!(secret.starts_with("BaseSecret-0x"));
        let (base, address) = secret.split_once("-0x").unwrap();
        assert_eq!(base, "BaseSecret");
        assert_eq!(address, address.to_lowercase());
    }
}
