//! Sea-of-nodes intermediate representation
//!
//! A [`Graph`] owns all of its nodes in an arena. Nodes refer to each other by [`NodeId`] through
//! data edges (inputs) and control edges (successors). The control edges alone form the control
//! flow graph, rooted at the start node. Data nodes without control edges "float" and are only
//! anchored by their usages.

mod dce;
mod graph;
mod node;

pub use dce::*;
pub use graph::*;
pub use node::*;
