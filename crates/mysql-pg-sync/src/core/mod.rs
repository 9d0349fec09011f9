//! Core data types shared by every component.
//!
//! - [`value`]: SQL values read from and written to either database
//! - [`key`]: normalized identity keys used to compare rows across databases
//! - [`row`]: ordered column/value rows
//! - [`schema`]: tables resolved against a live store

pub mod key;
pub mod row;
pub mod schema;
pub mod value;

pub use key::{KeyValue, RowKey};
pub use row::Row;
pub use schema::{Column, TableHandle};
pub use value::SqlValue;
