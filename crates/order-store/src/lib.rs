pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryOrderStore, StoreOp};
pub use postgres::PostgresOrderStore;
pub use store::{LineFlag, OrderStore};
