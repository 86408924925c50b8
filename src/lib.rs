pub mod auth;
pub mod clock;
pub mod compactor;
pub mod config;
pub mod directory;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod wal;
pub mod wire;
