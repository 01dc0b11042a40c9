// Remote file extraction engine shared by the worker binary

pub mod config;
pub mod errors;
pub mod extraction;
pub mod incremental;
pub mod models;
pub mod output;
pub mod retry;
pub mod selection;
pub mod state;
pub mod telemetry;
pub mod transport;
