pub mod accounts;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod http;
pub mod limits;
pub mod manager;
pub mod model;
pub mod observability;
pub mod retry;
pub mod store;
pub mod sweeper;
pub mod wal;
