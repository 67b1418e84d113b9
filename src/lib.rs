//! Latent-space drag editing: move handle points of a generated image toward
//! target points by optimising the generator's latent code.
//!
//! [`renderer::Renderer`] is the entry point. It owns one
//! [`components::DragSession`] and shares networks and transfer buffers with
//! other renderers through [`resources::Resources`].

pub mod logger;

pub mod cli;
pub mod components;
pub mod config;
pub mod error;
pub mod io;
pub mod models;
pub mod ops;
pub mod pool;
pub mod renderer;
pub mod resources;

pub use config::{Point, RenderArgs};
pub use error::{DragError, ErrorKind, Result};
pub use renderer::{RenderResult, Renderer};
pub use resources::Resources;
