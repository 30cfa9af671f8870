// xrtc-common - Shared wire contracts and error taxonomy for the XRTC client
//
// This crate defines the JSON shapes exchanged with the item API and the
// single error type every client failure is reported through.

pub mod error;
pub mod protocol;
pub mod types;

// Re-export for convenience
pub use error::*;
pub use protocol::*;
pub use types::*;
