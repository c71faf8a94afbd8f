//! StockEasy Policy - Session storage and spending authorization
//!
//! Two halves:
//!
//! - [`authorize`] is a pure function from (intent, session, now) to a
//!   [`Decision`]. It never touches storage and never changes status.
//! - [`PolicyStore`] holds one [`AuthorizationSession`] per owner and
//!   serializes counter updates with compare-and-swap on `version`.
//!
//! The orchestrator in `stockeasy-agent` glues them together.

pub mod authorizer;
pub mod sled_store;
pub mod store;

pub use authorizer::{authorize, Decision};
pub use sled_store::SledPolicyStore;
pub use store::{CommitResult, InMemoryPolicyStore, PolicyStore, Result, StoreError};

pub use stockeasy_types::{AuthorizationSession, SessionStatus, SpendCounters};
