pub mod compactor;
pub mod config;
pub mod desk;
pub mod engine;
pub mod error;
pub mod grid;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod patch;
pub mod roles;
pub mod schedule;
pub mod session;
pub mod store;
pub mod wal;
