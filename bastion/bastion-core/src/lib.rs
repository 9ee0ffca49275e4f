//! Core types and abstractions for the Bastion retrieval system.
//!
//! This crate provides the foundational pieces shared by every Bastion
//! component:
//!
//! - [`Document`] and [`CallerScope`], the data model read by retrieval
//! - The filter-expression language used to scope every store query
//!   ([`filter::parse`], [`filter::evaluate`], [`filter::FilterBuilder`])
//! - The core error type
//!
//! Nothing in here performs I/O; the filter parser is total and never panics.

pub mod error;
pub mod filter;
pub mod types;

pub use error::{BastionError, Result};
pub use filter::{Condition, FilterBuilder, FilterOp, ParseResult, ParsedFilter};
pub use types::{CallerScope, Document, DocumentId, Metadata};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{BastionError, Result};
    pub use crate::filter::{self, Condition, FilterBuilder, FilterOp, ParseResult, ParsedFilter};
    pub use crate::types::{CallerScope, Document, DocumentId, Metadata};
}
