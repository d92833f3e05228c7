//! Compose Synthesizer (C6): document model, fragment assembler, and atomic writer.

pub mod render;
pub mod support;
pub mod synth;
pub mod types;

pub use render::{render_yaml, write_atomic, SCHEMA_VERSION};
pub use support::write_support_configs;
pub use synth::synthesize;
pub use types::ComposeDocument;
