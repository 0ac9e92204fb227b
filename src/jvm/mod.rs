//! Class file vocabulary: everything the graph builder reads about a method
//!
//! Nothing here parses whole class files. Methods arrive already split out (code, exception
//! table, flags, descriptor) and constant pool entries are reached through [`ConstantPool`].

mod access_flags;
mod binary_format;
mod bytecode;
mod constants;
mod descriptors;
mod errors;
mod method;

pub use access_flags::*;
pub use binary_format::*;
pub use bytecode::*;
pub use constants::*;
pub use descriptors::*;
pub use errors::*;
pub use method::*;
