pub mod csv_store;
pub mod dataset;
pub mod journal;
pub mod ledger;
pub mod lineage;

pub use csv_store::*;
pub use dataset::*;
pub use journal::*;
pub use ledger::*;
pub use lineage::*;
