//! Thai traditional melody generation.
//!
//! A user names a mood; the composer agent answers with ABC notation,
//! which is extracted, checked, and rendered to MIDI and WAV.
//!
//! - [`extract`] pulls the titled notation out of the reply
//! - [`render`] turns notation into files
//! - [`turn`] runs the whole pipeline for one message
//! - [`session`], [`web`] and [`console`] present it

pub mod console;
pub mod extract;
pub mod render;
pub mod session;
pub mod telemetry;
pub mod turn;
pub mod web;

pub use extract::{extract_composition, normalize_blank_lines, Composition, ExtractError};
pub use render::{AudioRenderer, RenderError, RenderedArtifacts, Renderer};
pub use session::{Session, SessionStore};
pub use turn::{ComposeTurn, ConfiguredModels, ModelSource, Studio, TurnError, TurnResult};
