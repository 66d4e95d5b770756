//! # quill-types
//!
//! Core type definitions for the quill intent classification framework.
//!
//! This crate is the foundation of the dependency graph -- all other
//! quill crates depend on it. It contains:
//!
//! - **[`error`]** -- [`QuillError`] and the workspace [`Result`] alias
//! - **[`config`]** -- Server and model configuration schema
//! - **[`message`]** -- Messages, tokens, intents, entities and parse results
//! - **[`training`]** -- The training data container

pub mod config;
pub mod error;
pub mod message;
pub mod training;

pub use error::{QuillError, Result};
