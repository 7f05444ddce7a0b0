#[macro_use]
mod macros;

pub mod driver;
pub mod error;
pub mod ir;
pub mod lex;
pub mod lower;
pub mod parse;
pub mod semantic;
pub mod sm83;
pub mod source;

mod codegen;

pub mod target {
    pub use crate::codegen::{emit, EmitError};
}
