//! StockEasy Types - Canonical domain types for delegated restock payments
//!
//! This crate contains the foundational types shared by every StockEasy
//! crate, with zero dependencies on the others:
//!
//! - Identity types (OwnerId, SessionId, PayeeId, ProductId, IntentId)
//! - Currency-agnostic amounts in minor units
//! - Authorization sessions with their budget windows
//! - Payment intents, outcomes and denial reasons
//!
//! # Invariants
//!
//! 1. An agent never holds the master key; it spends through a session
//! 2. A payment is authorized in full or not at all
//! 3. Session status only moves Active -> Expired or Active -> Revoked
//! 4. Denials are data, never panics or stringly-typed errors

pub mod identity;
pub mod amount;
pub mod session;
pub mod payment;
pub mod error;

pub use identity::*;
pub use amount::*;
pub use session::*;
pub use payment::*;
pub use error::*;

/// Current timestamp helper
pub fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}
