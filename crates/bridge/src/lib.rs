//! Reference adapters for the cachemesh external collaborators.
//!
//! - `PostgresStore`: write-through durable store over a shared Postgres
//!   database (`kv_store` table, upsert semantics).
//! - `HttpLegacySource`: read-through fallback fetching JSON from the
//!   legacy HTTP endpoint.
//!
//! Both implement the seam traits from `cachemesh-kv`; nothing above the
//! traits knows these exist.

pub mod legacy;
pub mod postgres;

pub use legacy::HttpLegacySource;
pub use postgres::PostgresStore;
