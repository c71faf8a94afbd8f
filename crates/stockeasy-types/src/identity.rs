//! Identity types for StockEasy
//!
//! Every identifier is a strongly typed string wrapper so an owner can never
//! be passed where a payee is expected. Generated identifiers carry a prefix
//! (`session_…`, `intent_…`); externally supplied ones (supplier codes,
//! product names) are kept verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Macro to generate ID types with common implementations
macro_rules! define_id_type {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create a new random ID
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::new_v4().simple()))
            }

            /// Wrap an existing identifier
            pub fn from_string(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            /// Borrow the raw identifier
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_id_type!(OwnerId, "owner", "Merchant (shopkeeper) that owns a master key and its sessions");
define_id_type!(SessionId, "session", "Delegated signing capability, 1:1 with an agent key");
define_id_type!(PayeeId, "payee", "Supplier address or identifier that can be paid");
define_id_type!(ProductId, "product", "Inventory product (SKU)");
define_id_type!(IntentId, "intent", "Unique identifier for a payment intent, used for dedupe");
define_id_type!(SupplierId, "supplier", "Supplier code from the supplier directory");
