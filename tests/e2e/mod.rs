//! End-to-end tests for sourcing-gateway.
//!
//! The gateway runs against in-memory fakes of the registry contract, the
//! ledger node and the history indexer. `scenarios` drives the access
//! decision directly; `http` drives the same flows over a bound listener.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod harness;
mod http;
mod scenarios;

pub use harness::{TestHarness, TestWallet, VAULT};
