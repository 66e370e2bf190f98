//! Storage is organized through [record_store::FsRecordStore].
//! The basic idea is:
//!  - There is a directory with all the records.
//!  - Samples and periods live in JSON Lines files, one file per UTC day.
//!  - Pointers live in a single small table overwritten in place.
//!  - Every record carries its own identity, so duplicate writes are no-ops.

pub mod entities;
pub mod record_store;
