//! Concurrency pool for independent lookups.

mod lookup;

pub use lookup::LookupPool;
