//! Pairing Service - issues short-lived pairing codes for linking a phone
//! number to a chat client session.
//!
//! The service:
//! - Validates phone numbers and bounds concurrent sessions per caller
//! - Drives the external protocol client through connect, code request,
//!   confirmation and teardown
//! - Reclaims every session exactly once, on success, failure or timeout

pub mod api;
pub mod config;
pub mod error;
pub mod ids;
pub mod link;
pub mod pairing;
pub mod phone;
pub mod session;

pub use config::Config;
pub use error::{ApiError, PairError};
pub use link::{GatewayClient, LinkClient};
pub use pairing::{PairingOrchestrator, PairingOutcome};
pub use phone::{validate, ValidatedPhone, ValidationError};
pub use session::{Session, SessionRegistry, SessionStatus};
