//! # quill-core
//!
//! Core engine for the quill intent classification framework.
//!
//! Contains the component contract and registry, the built-in components,
//! the pipeline engine and model persistence, training data formats,
//! evaluation metrics, output emulators and remote model storage.

pub mod component;
pub mod components;
pub mod emulators;
pub mod evaluate;
pub mod metadata;
pub mod persistor;
pub mod pipeline;
pub mod registry;
pub mod train;
pub mod training_data;

pub use component::{Component, ComponentFactory, Context, ContextUpdate};
pub use pipeline::{Model, Pipeline};
pub use registry::ComponentRegistry;
