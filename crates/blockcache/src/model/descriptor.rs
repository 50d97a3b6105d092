//! Block descriptors: a concrete height or one of the moving chain pointers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("empty block descriptor")]
    Empty,
    #[error("invalid block descriptor: {0}")]
    Invalid(String),
}

/// A requested block. `Latest`, `Finalized` and `Safe` resolve to a different
/// height over time and are never stored under a fixed key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockDescriptor {
    Latest,
    Finalized,
    Safe,
    Number(u64),
}

impl BlockDescriptor {
    /// The pointers kept warm by the refresher.
    pub const SPECIAL: [BlockDescriptor; 3] = [
        BlockDescriptor::Latest,
        BlockDescriptor::Finalized,
        BlockDescriptor::Safe,
    ];

    pub fn is_special(&self) -> bool {
        !matches!(self, BlockDescriptor::Number(_))
    }

    pub fn number(&self) -> Option<u64> {
        match self {
            BlockDescriptor::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// JSON-RPC block parameter: a tag or a `0x` quantity.
    pub fn to_rpc_param(&self) -> String {
        match self {
            BlockDescriptor::Number(n) => format!("{:#x}", n),
            special => special.to_string(),
        }
    }
}

impl fmt::Display for BlockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockDescriptor::Latest => f.write_str("latest"),
            BlockDescriptor::Finalized => f.write_str("finalized"),
            BlockDescriptor::Safe => f.write_str("safe"),
            BlockDescriptor::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Accepts `nil`, `head` and `latest` for the chain head, `finalized`, `safe`,
/// or a decimal height.
impl FromStr for BlockDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        match s.to_ascii_lowercase().as_str() {
            "" => Err(DescriptorError::Empty),
            "nil" | "head" | "latest" => Ok(BlockDescriptor::Latest),
            "finalized" => Ok(BlockDescriptor::Finalized),
            "safe" => Ok(BlockDescriptor::Safe),
            other => other
                .parse::<u64>()
                .map(BlockDescriptor::Number)
                .map_err(|_| DescriptorError::Invalid(s.to_string())),
        }
    }
}
