//! Song and playlist metadata persistence.
//!
//! The [`store::MetadataStore`] trait defines the interface.  The only
//! implementation is the SQLite store in [`sqlite`].

pub mod sqlite;
pub mod store;
