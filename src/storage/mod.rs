//! Persistence for the resolution ledger.
//!
//! - [`sql`]: connection pool and the store's single transaction
//! - [`records`]: read/write facade over the record tables
//! - [`traits`]: error type and the snapshot layout trait
//!
//! Table modules expose free functions over `&mut AnyConnection` so the
//! same statements run on a pooled connection or inside an open
//! [`StoreTx`](sql::StoreTx).

pub(crate) mod clash_zones;
pub(crate) mod clusters;
pub(crate) mod combined;
pub mod records;
pub(crate) mod rows;
mod schema;
pub mod snapshots;
pub mod sql;
pub mod traits;
