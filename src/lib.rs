//! # sourcing-gateway
//!
//! Access gateway for metered BOM sourcing operations.
//!
//! A caller proves control of a wallet identity by signing a fixed agreement
//! message. The gateway then decides, tier by tier, whether that identity
//! holds an active subscription:
//!
//! 1. **Registry** - an unexpired record in the on-chain registry grants at once
//! 2. **Reference** - a payment transaction hash supplied by the caller
//! 3. **Ledger scan** - the caller's transaction history via an indexer
//! 4. **Sync** - a verified payment is written back to the registry
//!
//! Every tier failure is a miss that escalates to the next tier. Only a bad
//! identity proof ends a request early.
//!
//! ## Example
//!
//! ```rust,ignore
//! use sourcing_gateway::{GatewayBuilder, GatewayConfig};
//!
//! #[tokio::main]
//! async fn main() -> color_eyre::Result<()> {
//!     let config = GatewayConfig::from_file("gateway.toml".as_ref())?;
//!     let mut gateway = GatewayBuilder::new(config).build().await?;
//!     gateway.run().await?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod chain;
pub mod config;
pub mod error;
pub mod event;
pub mod gateway;
pub mod identity;
pub mod payment;
pub mod registry;
pub mod server;

pub use api::{VerifyRequest, VerifyResponse};
pub use config::GatewayConfig;
pub use error::{Error, Result};
pub use event::{GatewayEvent, GatewayEventsChannel, Tier};
pub use gateway::{
    AccessGateway, AccessOutcome, AccessRequest, Decision, DenialReason, GatewayComponents,
    GrantBasis,
};
pub use payment::{Fulfillment, PaymentEvidence, PaymentTerms};
pub use server::{GatewayBuilder, RunningGateway, ShutdownHandle};
