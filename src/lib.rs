pub mod builder;
pub mod ir;
pub mod jvm;
pub mod util;
