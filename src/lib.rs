pub mod config;
pub mod dedup;
pub mod error;
pub mod geocode;
pub mod ledger;
pub mod logging;
pub mod notify;
pub mod pipeline;
pub mod registry;
pub mod render;
pub mod retry;
pub mod sources;
pub mod urlnorm;
