pub mod clock;
pub mod config;
pub mod deadline;
pub mod engine;
pub mod fee;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod reaper;
pub mod rules;
pub mod schedule;
pub mod store;
pub mod wal;
