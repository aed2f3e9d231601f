//! Core values, record identifiers, and errors for Ruleline.
//!
//! This crate provides:
//! - [`Value`] - Scalar values stored in record fields and rule literals
//! - [`Attributes`] - A snapshot of one record's field values
//! - [`Error`] - Rich error types with context

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod value;

pub use error::{Error, ErrorContext, ErrorKind, Result};
pub use value::{Attributes, RecordId, Value};
