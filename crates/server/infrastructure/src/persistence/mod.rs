//! PostgreSQL persistence

pub mod outbox;
pub mod pool;
pub mod unit_of_work;
