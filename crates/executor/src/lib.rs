//! # Meridian Executor Crate
//!
//! This crate decides whether a pending order may trade and, if so, turns it
//! into a settled change of portfolio cash and holdings.
//!
//! ## Architectural Principles
//!
//! - **State vs. Logic Decoupling:** `ledger::apply_fill` is a pure state
//!   transition over a portfolio and a holding. The `ExecutionEngine` owns the
//!   eligibility rules and the transaction around the ledger.
//! - **One Atomic Unit per Fill:** Each fill holds the portfolio lock from the
//!   eligibility check until commit, closing the double-spend race between the
//!   submission path and the sweeper.
//!
//! ## Public API
//!
//! - `MarketClock`: Exchange session check.
//! - `ExecutionEngine`: `try_fill` for stored orders, `fill_new` for submissions.
//! - `FillOutcome` / `Ineligibility`: Non-error results of a fill attempt.
//! - `ExecutionError`: The specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod clock;
pub mod engine;
pub mod error;
pub mod ledger;

// Re-export the key components to provide a clean, public-facing API.
pub use clock::MarketClock;
pub use engine::{ExecutionEngine, FillOutcome, Ineligibility};
pub use error::ExecutionError;
pub use ledger::{apply_fill, HoldingChange};
