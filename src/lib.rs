//! InsightDB is a small query engine over flat tabular datasets of course
//! sections and campus rooms. Datasets are added as JSON arrays of flat
//! rows, validated against a fixed field vocabulary, and queried through a
//! JSON query language with filtering, grouping, aggregation, projection
//! and ordering.
//!
//! The crate splits along these lines:
//!
//! * [`record`] holds the field vocabulary, the dynamically typed
//!   [`record::Value`] and the [`record::Record`] row type.
//! * [`store`] keeps datasets in memory behind immutable snapshots and
//!   optionally persists each one as a JSON document.
//! * [`query`] validates raw JSON queries into a typed [`query::Query`].
//! * [`engine`] evaluates a validated query against a snapshot.
//! * [`interface`] is the facade tying store and engine together.
//! * [`server`] exposes the facade over HTTP.

pub mod engine;
pub mod error;
pub mod interface;
pub mod query;
pub mod record;
pub mod server;
pub mod store;
