pub mod client_types;
pub mod parser;
pub mod traits;

pub use client_types::*;
pub use parser::*;
pub use traits::{AsyncReadAndWrite, BoxedAsyncReadAndWrite};
