mod aggregate;
mod component;
mod ledger;
mod money;
mod terms;
mod totals;

pub use aggregate::*;
pub use component::*;
pub use ledger::*;
pub use money::*;
pub use terms::*;
pub use totals::*;
