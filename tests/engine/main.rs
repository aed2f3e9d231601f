//! Integration tests for Layer 3: Engine
//!
//! Tests for compiled match queries, change impact, the rule registry, and
//! race recovery, all against in-memory SQLite.

mod fixtures;

mod impact;
mod races;
