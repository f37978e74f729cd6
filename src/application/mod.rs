// Application layer - use cases and orchestration.
// The ledger service owns every write to class aggregates; reconciliation
// is the out-of-band audit/repair path.

pub mod error;
mod locks;
mod reconcile;
mod service;

pub use error::*;
pub use locks::*;
pub use reconcile::*;
pub use service::*;
