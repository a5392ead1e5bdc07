use std::time::Duration;

use crate::errors::VoteError;
use crate::{Address, Result};

pub const CONTRACT_ADDRESS_VAR: &str = "VOTE_CONTRACT_ADDRESS";
pub const CONFIRMATION_TIMEOUT_VAR: &str = "VOTE_CONFIRMATION_TIMEOUT_SECS";

const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 120;

#[derive(Clone, Debug)]
pub struct Config {
    /// Deployed voting contract. Required; there is no zero-address fallback.
    pub contract_address: Address,
    /// How long the submission pipeline waits for finality before giving up
    /// locally. The transaction itself is not cancelled.
    pub confirmation_timeout: Duration,
}

impl Config {
    pub fn new(contract_address: Address) -> Config {
        Config {
            contract_address,
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        }
    }

    pub fn from_env() -> Result<Config> {
        dotenv::dotenv().ok();
        let address = dotenv::var(CONTRACT_ADDRESS_VAR)
            .map_err(|_| VoteError::Config(format!("{} is not set", CONTRACT_ADDRESS_VAR)))?;
        let contract_address = Address::from_hex_str(&address)?;
        let confirmation_timeout = match dotenv::var(CONFIRMATION_TIMEOUT_VAR) {
            Ok(secs) => {
                let secs: u64 = secs.parse().map_err(|_| {
                    VoteError::Config(format!("{} must be an integer", CONFIRMATION_TIMEOUT_VAR))
                })?;
                Duration::from_secs(secs)
            }
            Err(_) => Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        };
        Ok(Config {
            contract_address,
            confirmation_timeout,
        })
    }
}
