pub mod fbp;
pub mod resolver;

pub use fbp::{Parser, ParserClient};
pub use resolver::{ChainResolver, ConfigResolver, TypeRegistry};
