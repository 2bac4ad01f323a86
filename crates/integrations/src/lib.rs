//! Channel manager integration: outbound HTTP client and webhook signature
//! helpers.

pub mod channex;
pub mod signature;

pub use channex::*;
pub use signature::*;
