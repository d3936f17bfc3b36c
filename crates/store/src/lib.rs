pub mod assemble;
pub mod builder;
pub mod db;
pub mod deps;
pub mod pool;
pub mod probe;
pub mod query;
pub mod schema;
pub mod write;

pub use db::{Store, StoreStatus};
pub use pool::ConnectionPool;
pub use probe::Capabilities;
