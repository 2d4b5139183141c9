use std::fmt;
use std::str::FromStr;

use ethers::types::{H256, U256};
use serde::{Deserialize, Serialize};

/// The subset of a block header the fee market reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Header {
    pub number: u64,
    pub hash: H256,
    pub gas_limit: u64,
    pub gas_used: u64,
    /// Absent on blocks produced before the fee market fork
    #[serde(default)]
    pub base_fee: Option<U256>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub hash: H256,
    /// Gas allowance declared by the sender
    pub gas: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn number(&self) -> u64 {
        self.header.number
    }

    pub fn hash(&self) -> H256 {
        self.header.hash
    }

    pub fn gas_used(&self) -> u64 {
        self.header.gas_used
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub transaction_hash: H256,
    /// Gas consumed by this transaction alone
    pub gas_used: u64,
}

/// Identifies the block a query ends at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockSelector {
    Number(u64),
    #[default]
    Latest,
    Pending,
    Finalized,
}

impl BlockSelector {
    pub fn as_number(&self) -> Option<u64> {
        match self {
            Self::Number(number) => Some(*number),
            _ => None,
        }
    }
}

impl From<u64> for BlockSelector {
    fn from(number: u64) -> Self {
        Self::Number(number)
    }
}

impl From<BlockSelector> for ethers::types::BlockNumber {
    fn from(selector: BlockSelector) -> Self {
        match selector {
            BlockSelector::Number(number) => Self::Number(number.into()),
            BlockSelector::Latest => Self::Latest,
            BlockSelector::Pending => Self::Pending,
            BlockSelector::Finalized => Self::Finalized,
        }
    }
}

impl fmt::Display for BlockSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(number) => write!(f, "{number}"),
            Self::Latest => write!(f, "latest"),
            Self::Pending => write!(f, "pending"),
            Self::Finalized => write!(f, "finalized"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid block selector: {0}")]
pub struct InvalidBlockSelector(String);

impl FromStr for BlockSelector {
    type Err = InvalidBlockSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "latest" => Ok(Self::Latest),
            "pending" => Ok(Self::Pending),
            "finalized" => Ok(Self::Finalized),
            s => {
                let number = if let Some(hex) = s.strip_prefix("0x") {
                    u64::from_str_radix(hex, 16)
                } else {
                    s.parse()
                };

                number
                    .map(Self::Number)
                    .map_err(|_| InvalidBlockSelector(s.to_string()))
            }
        }
    }
}

impl Serialize for BlockSelector {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Self::Number(number) => {
                serializer.serialize_str(&format!("{number:#x}"))
            }
            other => serializer.serialize_str(&other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for BlockSelector {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;

        s.parse().map_err(serde::de::Error::custom)
    }
}
