//! Bytecode to graph translation
//!
//! [`build_graph`] is the entry point. It splits the bytecode into blocks ([`BlockMap`]), then
//! abstractly interprets each block once, tracking the values in locals and on the operand stack
//! in a [`FrameState`] and turning every instruction into nodes of an [`crate::ir::Graph`].

mod block_map;
mod calls;
mod errors;
mod frame_state;
mod graph_builder;
mod instructions;
mod settings;

pub use block_map::*;
pub use errors::*;
pub use frame_state::*;
pub use graph_builder::*;
pub use settings::*;
