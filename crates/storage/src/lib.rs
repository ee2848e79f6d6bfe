//! Pluggable storage contract (Component I): the trait a concrete
//! backend implements, plus the backend-agnostic distributed lock built
//! on top of its key/value primitives. See spec §4.10/§4.11.

mod contract;
mod lock;
mod query_result;

pub use contract::{empty_rows, single_row_result, Storage, Transaction};
pub use lock::{lock, unlock, LockError};
pub use query_result::QueryResult;
