//! Identifier types for catalog entities and confirmations
//!
//! Catalog identifiers arrive from the ad server as opaque strings and are
//! wrapped without interpretation. Transaction identifiers are minted locally
//! from effect-provided randomness.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create from any string-like value
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Whether the identifier is empty
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }
    };
}

string_id!(
    /// Identifies one concrete creative as served
    CreativeInstanceId
);
string_id!(
    /// Identifies a group of creatives sharing caps and conversions
    CreativeSetId
);
string_id!(
    /// Identifies a campaign
    CampaignId
);
string_id!(
    /// Identifies an advertiser
    AdvertiserId
);
string_id!(
    /// Identifies one placement of an ad on screen
    PlacementId
);

/// Identifies one confirmation and its eventual payment transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    /// Build a v4 identifier from 16 random bytes
    pub fn from_random_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Builder::from_random_bytes(bytes).into_uuid())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for TransactionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl From<TransactionId> for Uuid {
    fn from(id: TransactionId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_ids_are_transparent() {
        let id = CreativeSetId::new("c2ba3e7d-f688-4bc4-a053-cbe7ac1e6123");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"c2ba3e7d-f688-4bc4-a053-cbe7ac1e6123\"");
        assert_eq!(id.to_string(), "c2ba3e7d-f688-4bc4-a053-cbe7ac1e6123");
    }

    #[test]
    fn test_transaction_id_is_v4() {
        let id = TransactionId::from_random_bytes([7u8; 16]);
        assert_eq!(id.uuid().get_version_num(), 4);
        assert_eq!(id, TransactionId::from_random_bytes([7u8; 16]));
    }
}
