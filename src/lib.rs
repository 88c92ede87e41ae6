//! feedsnap: keeps a durable snapshot of the newest entry of each configured
//! RSS/Atom feed, refreshed by periodic sync cycles.

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
