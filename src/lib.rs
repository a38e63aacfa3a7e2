//! GPU render graph and resource tracking core.
//!
//! The crate is built around a per-frame declarative scheduler: user code
//! registers work nodes (render, compute, transfer) with explicit resource
//! inputs and outputs, and [`RenderGraph::submit`] derives the execution
//! order, records driver commands through typed contexts, and tracks the
//! resulting submission until the device signals completion.
//!
//! Driver-specific command encoding lives behind the [`driver::Driver`]
//! trait; this crate only schedules, records and tracks.
#[macro_use]
extern crate log;

mod batch;
mod buffer;
mod command;
mod config;
mod context;
mod descriptor;
mod error;
mod format;
mod graph;
mod handle;
mod image;
mod pack;
mod pipeline;
mod pool;
mod renderpass;
mod resources;
mod sampler;
mod staging;

pub mod driver;

pub use self::batch::CmdBatchId;
pub use self::buffer::*;
pub use self::command::*;
pub use self::config::GraphicsConfig;
pub use self::context::*;
pub use self::descriptor::*;
pub use self::error::{Error, Result};
pub use self::format::*;
pub use self::graph::*;
pub use self::handle::*;
pub use self::image::*;
pub use self::pack::*;
pub use self::pipeline::*;
pub use self::renderpass::*;
pub use self::resources::*;
pub use self::sampler::*;
pub use self::staging::{StagingIdx, StagingPoolKind};
