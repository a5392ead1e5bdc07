use std::fmt;

use serde::{Deserialize, Serialize};

pub mod analytics;
pub mod audit;
pub mod cache;
pub mod config;
pub mod errors;
pub mod provider;
pub mod session;
pub mod sim;
pub mod submit;

use errors::VoteError;
pub use errors::Result;
pub use session::{ConnectionState, Session, SessionContext, SessionController};

pub type TxHash = [u8; 32];
pub type ChainId = u64;

/// 20-byte account address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address(#[serde(with = "hex")] pub [u8; 20]);

impl Address {
    pub fn from_hex_str(s: &str) -> Result<Address> {
        let h = s.strip_prefix("0x").unwrap_or(s);
        let bytes =
            hex::decode(h).map_err(|_| VoteError::Config(format!("invalid address: {}", s)))?;
        let bytes: [u8; 20] = bytes
            .try_into()
            .map_err(|_| VoteError::Config(format!("invalid address length: {}", s)))?;
        Ok(Address(bytes))
    }

    /// Shortened `0x1234...abcd` form for display.
    pub fn short(&self) -> String {
        let h = hex::encode(self.0);
        format!("0x{}...{}", &h[..4], &h[h.len() - 4..])
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// One contract-assigned candidate. Ids are 1-based and stable; the client
/// never mutates counts locally, it re-reads them after confirmation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: u32,
    pub name: String,
    pub vote_count: u64,
}

/// One emitted `Voted` log entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VotedEvent {
    pub voter: Address,
    pub candidate_id: u32,
    pub timestamp: u64,
    pub block_number: u64,
    #[serde(with = "hex")]
    pub tx_hash: TxHash,
    pub log_index: u32,
}

impl VotedEvent {
    /// Identity of the underlying log entry; stable across re-sorts and
    /// merges, unlike a display-list position.
    pub fn key(&self) -> (TxHash, u32) {
        (self.tx_hash, self.log_index)
    }
}
