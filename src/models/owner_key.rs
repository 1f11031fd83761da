use std::fmt;

use serde::{Deserialize, Serialize};

const FEE_BUCKET: &str = "fee";

/// Which bucket of a wallet source the extracted records belong to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OwnerBucket {
    /// Movements of a given denomination.
    Asset(String),
    /// Fee charges, always denominated in the chain's native asset.
    Fee,
}

/// Identifies the wallet-side recipient of a piece of extracted data.
///
/// One multi-asset transaction fans out into one key per (denomination, owner) pair plus a
/// `fee:<owner>` key for the fee payer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OwnerKey {
    pub bucket: OwnerBucket,
    pub source_key: String,
}

impl OwnerKey {
    pub fn asset(denom: impl Into<String>, source_key: impl Into<String>) -> Self {
        Self {
            bucket: OwnerBucket::Asset(denom.into()),
            source_key: source_key.into(),
        }
    }

    pub fn fee(source_key: impl Into<String>) -> Self {
        Self {
            bucket: OwnerBucket::Fee,
            source_key: source_key.into(),
        }
    }

    pub fn is_fee(&self) -> bool {
        self.bucket == OwnerBucket::Fee
    }
}

impl fmt::Display for OwnerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucket {
            OwnerBucket::Asset(denom) => write!(f, "{}:{}", denom, self.source_key),
            OwnerBucket::Fee => write!(f, "{}:{}", FEE_BUCKET, self.source_key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owner_key_rendering() {
        assert_eq!(OwnerKey::asset("BNB", "acc-1").to_string(), "BNB:acc-1");
        assert_eq!(OwnerKey::fee("acc-1").to_string(), "fee:acc-1");
        assert!(OwnerKey::fee("acc-1").is_fee());
    }
}
