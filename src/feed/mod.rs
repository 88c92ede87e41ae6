//! Feed retrieval and latest-entry extraction.
//!
//! - [`fetcher`] - HTTP retrieval of raw feed bytes (one attempt, size-limited)
//! - [`document`] - XML element tree built with `quick-xml`
//! - [`extractor`] - Atom/RSS detection and first-entry extraction
//! - [`timestamp`] - Date parsing, future clamping and the start-of-day fallback
//!
//! # Example
//!
//! ```ignore
//! use feedsnap::feed::{extract, Document, Fetcher};
//!
//! let bytes = fetcher.fetch(url).await?;
//! let document = Document::parse(&bytes)?;
//! let record = extract(&document, url);
//! ```

pub mod document;
pub mod extractor;
pub mod fetcher;
pub mod timestamp;

pub use document::{Document, DocumentError, Element};
pub use extractor::{extract, extract_at, EntryNode};
pub use fetcher::{build_client, FetchConfig, FetchError, Fetcher};
pub use timestamp::{fallback_timestamp, fallback_timestamp_at, resolve, resolve_at, DateFormat};
