// anvil-worker: the remote execution agent of the Anvil master/worker
// framework. The binary lives in `main.rs`; everything else is exposed as a
// library so the integration tests can drive the session loop in-process.
//
// Architecture:
//   main → scratch dir + resource probe → Session::run
//   Session → Connection (transport) → protocol codec → executor / transfer

pub mod executor;
pub mod protocol;
pub mod resources;
pub mod scratch;
pub mod session;
pub mod transfer;
pub mod transport;

// Re-exports for convenient access
pub use protocol::Request;
pub use resources::ResourceSnapshot;
pub use session::{Session, SessionConfig};
pub use transfer::TransferError;
pub use transport::{Connection, TransportError, TuneProfile};
