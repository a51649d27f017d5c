//! Storage query interpreter.
//!
//! ```text
//! SHOW DATABASES
//! SHOW STORES FROM <db>
//! SELECT * FROM <db>.<store>
//! CLEAR FROM <db>.<store>
//! ```
//!
//! Lines are parsed host-side into [`ParsedQuery`] and compiled into
//! structured commands; identifiers only reach the document as encoded
//! literals.

pub mod grammar;
pub mod interpreter;

pub use grammar::{parse, ParsedQuery, QueryError, ACCEPTED_FORMS};
pub use interpreter::{DatabaseInfo, QueryOutput, StorageQueryInterpreter, StoredRecord, SELECT_LIMIT};
