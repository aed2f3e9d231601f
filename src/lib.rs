//! Ruleline - Declarative, incrementally maintained rules over SQL
//!
//! This crate re-exports all layers of the Ruleline system for convenient access.
//! For detailed documentation, see the individual layer crates.
//!
//! # Architecture
//!
//! ```text
//! Layer 3: ruleline_engine     - Pattern compilation, impact analysis, activation
//! Layer 2: ruleline_language   - Lexer, parser, constraint AST, unparser
//! Layer 1: ruleline_storage    - Dialects, record schemas, match store, SQLite
//! Layer 0: ruleline_foundation - Core types (Value, Error)
//! ```

pub use ruleline_engine as engine;
pub use ruleline_foundation as foundation;
pub use ruleline_language as language;
pub use ruleline_storage as storage;
