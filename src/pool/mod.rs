//! Connection reuse.

mod idle;

pub use idle::{ConnectionPool, PoolStats};
