#[cfg(test)]
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

#[cfg(test)]
pub use memory::MemoryActivityStore;
pub use postgres::PgActivityStore;
pub use store::ActivityStore;
