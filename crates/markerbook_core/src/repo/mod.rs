//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define use-case oriented data access contracts.
//! - Isolate SQLite query details from callers.
//!
//! # Invariants
//! - Repositories return semantic errors (`NotFound`,
//!   `CircularReference`) in addition to DB transport errors.
//! - Multi-row mutations run in immediate transactions.

pub mod category_repo;
pub mod document_repo;
pub mod marker_repo;
