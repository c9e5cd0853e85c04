//! Purchase escrow agreement simulated on an in-memory test chain.
//!
//! [`chain::TestChain`] keeps pre-funded accounts, auto-mines one block per
//! transaction and hosts [`agreement::PurchaseAgreement`] contracts.
//! [`session::Session`] drives one agreement between a fixed seller and buyer,
//! and [`server`] exposes that session over HTTP.

pub mod agreement;
pub mod chain;
pub mod clock;
pub mod config;
pub mod demo;
pub mod server;
pub mod session;
pub mod telemetry;
pub mod types;

pub use agreement::{AgreementEvent, AgreementStatus, Call, DeployParams, PurchaseAgreement};
pub use chain::{ChainConfig, ChainError, Receipt, TestChain};
pub use clock::{Clock, ManualClock, SystemClock};
pub use session::{DeployRequest, Session, SessionError};
pub use types::{format_ether, to_wei, Address, TxHash, Wei};
