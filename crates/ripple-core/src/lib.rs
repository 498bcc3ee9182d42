//! Ripple core library: cross-language impact analysis for multi-component
//! projects.
//!
//! Source files are parsed with tree-sitter into per-file symbol snapshots
//! ([`indexer`]), rolled up into a component dependency graph, and compared
//! against drafted edits to find which components a change request touches
//! ([`impact`]). Change requests then move through a review lifecycle
//! ([`workflow`]) backed by SQLite and a blob store ([`store`]). The
//! [`tasks`] module packages the long-running pieces as plain functions over a
//! shared [`tasks::TaskContext`].

pub mod config;
pub mod errors;
pub mod impact;
pub mod indexer;
pub mod models;
pub mod store;
pub mod tasks;
pub mod workflow;
