use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

pub type ChainId = u8;

/// Chain family a configured chain belongs to. Decides address formats and
/// which adapter constructor handles the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Ethereum,
    Substrate,
}

impl ChainFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainFamily::Ethereum => "ethereum",
            ChainFamily::Substrate => "substrate",
        }
    }
}

impl fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 32-byte identifier binding a bridged asset to its handler on every chain.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId(pub [u8; 32]);

impl fmt::Debug for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceId({})", self)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = hex::decode(s.trim_start_matches("0x"))
            .map_err(|e| Error::Serialization(format!("Invalid resource id {}: {}", s, e)))?;
        let bytes: [u8; 32] = raw
            .try_into()
            .map_err(|_| Error::Serialization(format!("Resource id must be 32 bytes: {}", s)))?;
        Ok(ResourceId(bytes))
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransferType {
    Fungible,
    NonFungible,
    Generic,
}

impl fmt::Display for TransferType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferType::Fungible => "FungibleTransfer",
            TransferType::NonFungible => "NonFungibleTransfer",
            TransferType::Generic => "GenericTransfer",
        };
        f.write_str(name)
    }
}

/// Transfer body as decoded on the source chain. Amounts and token ids are
/// big-endian unsigned integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Fungible {
        amount: Vec<u8>,
        recipient: Vec<u8>,
    },
    NonFungible {
        token_id: Vec<u8>,
        recipient: Vec<u8>,
        metadata: Vec<u8>,
    },
    Generic {
        metadata: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferMessage {
    pub source: ChainId,
    pub destination: ChainId,
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    pub payload: Payload,
}

impl TransferMessage {
    pub fn transfer_type(&self) -> TransferType {
        match self.payload {
            Payload::Fungible { .. } => TransferType::Fungible,
            Payload::NonFungible { .. } => TransferType::NonFungible,
            Payload::Generic { .. } => TransferType::Generic,
        }
    }
}

/// A destination-chain call that executes a relayed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proposal {
    pub source: ChainId,
    pub deposit_nonce: u64,
    pub resource_id: ResourceId,
    pub handler: String,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_family_names() {
        assert_eq!(ChainFamily::Ethereum.as_str(), "ethereum");
        assert_eq!(ChainFamily::Substrate.to_string(), "substrate");
        assert_eq!(serde_json::to_value(ChainFamily::Substrate).unwrap(), "substrate");
    }

    #[test]
    fn test_resource_id_hex() {
        let hex_id = "0x000000000000000000000000000000c76ebe4a02bbc34786d860b355f5a5ce00";
        let id: ResourceId = hex_id.parse().unwrap();
        assert_eq!(id.0[31], 0x00);
        assert_eq!(id.0[30], 0xce);
        assert_eq!(id.to_string(), hex_id);

        assert!("0x1234".parse::<ResourceId>().is_err());
        assert!("not hex".parse::<ResourceId>().is_err());
    }

    #[test]
    fn test_transfer_type_from_payload() {
        let message = TransferMessage {
            source: 1,
            destination: 2,
            deposit_nonce: 7,
            resource_id: ResourceId::default(),
            payload: Payload::Generic { metadata: vec![1] },
        };
        assert_eq!(message.transfer_type(), TransferType::Generic);
    }
}
