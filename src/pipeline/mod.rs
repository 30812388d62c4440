//! Pipeline module - batch runs, founder and listing lookups, bulk enrichment.

mod batch;
mod enrichment;
mod extract;
mod founders;
mod listings;

pub use batch::*;
pub use enrichment::*;
pub use extract::*;
pub use founders::*;
pub use listings::*;
