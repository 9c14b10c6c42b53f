#![doc = "handbook-core: pipeline library for the handbook generator."]

//! Turns the markdown documentation of a GitHub repository into an ordered,
//! human-reviewed handbook and renders it to PDF.
//!
//! The stages are separated by the traits in [`contract`]; real
//! implementations live in [`fetch`], [`organize`] and [`render`] (the HTTP
//! text generator and the remote rendering client live in the CLI crate).
//! [`pipeline::GenerationRun`] ties the stages together and enforces the run
//! state machine; [`preview::PreviewSession`] holds the human review step.
//!
//! # Usage
//! Add this as a dependency wherever a run needs to be driven: the CLI, the
//! web preview and integration tests.

pub mod contract;
pub mod error;
pub mod fetch;
pub mod markup;
pub mod model;
pub mod organize;
pub mod pipeline;
pub mod preview;
pub mod render;

pub use error::{HandbookError, Result, Stage};
