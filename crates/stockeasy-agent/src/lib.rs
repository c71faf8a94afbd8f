//! StockEasy Agent - Payment orchestration for session-key spending
//!
//! The orchestrator turns a [`PaymentIntent`](stockeasy_types::PaymentIntent)
//! into exactly one [`PaymentOutcome`](stockeasy_types::PaymentOutcome):
//!
//! 1. load the owner's session and run the authorizer
//! 2. reserve the amount with a compare-and-swap commit
//! 3. call the payment executor, outside of any lock, under a timeout
//! 4. roll the reservation back if the executor fails
//!
//! Every outcome is appended to a bounded [`PaymentJournal`].

pub mod executor;
pub mod journal;
pub mod orchestrator;

pub use executor::{
    ExecutorError, HttpPaymentExecutor, PaymentExecutor, PaymentRequest, SimulatedExecutor,
};
pub use journal::{JournalEntry, JournalSummary, PaymentJournal};
pub use orchestrator::{
    system_clock, Clock, OrchestratorConfig, PaymentOrchestrator, ReserveAttempt, Reservation,
};
