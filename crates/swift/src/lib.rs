//! OpenStack Swift REST client.
//!
//! [`protocol`] holds the single-attempt wire operations over a raw
//! `(client, session)` pair; [`Connection`] layers authentication,
//! retry with backoff, and listing pagination on top and is what the
//! rest of the workspace uses. [`segment`] implements large-object
//! transfers as manifest plus numbered segments.

pub mod connection;
pub mod listing;
pub mod protocol;
pub mod segment;

pub use connection::{BodySource, Connection, DEFAULT_RETRIES};
pub use listing::{ContainerRecord, ObjectEntry, ObjectRecord};
pub use protocol::{Headers, ObjectBody, PutBody, Session};
pub use segment::{Destination, EMPTY_MD5, StreamSummary};
