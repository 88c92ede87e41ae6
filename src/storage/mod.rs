mod entries;
mod feed_store;
mod schema;
mod types;

pub use feed_store::FeedStore;
pub use schema::Database;
pub use types::{DatabaseError, FeedRecord};
