//! Script-to-video pipeline: parse, render, narrate, mux.

pub mod media;
pub mod mux;
pub mod narration;
pub mod parser;
pub mod process;
pub mod render;
