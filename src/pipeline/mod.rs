//! # Pipeline Composition
//!
//! A [`Pipeline`] is the explicit, ordered list of [`StepId`]s one
//! operation runs. Templates in [`templates`] fix that list per action and
//! instance kind; the [`StepRegistry`] maps each id to its [`Step`].

pub mod builder;
pub mod context;
pub mod registry;
pub mod step;
pub mod templates;

pub use builder::{Pipeline, PipelineBuilder};
pub use context::StepContext;
pub use registry::StepRegistry;
pub use step::{Step, StepId};
pub use templates::pipeline_for;
