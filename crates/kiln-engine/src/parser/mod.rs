//! Lexer and parser for kiln source.
//!
//! Embedded source files are a small class-based language:
//!
//! ```ignore
//! class Net {
//!     attr weight;
//!     def forward(self, x) {
//!         let y = x + CONSTANTS.c0;
//!         if y > 10 { return y; } else { return self.helper(y); }
//!     }
//!     def helper(self, v) { return ops.relu(v) / 2; }
//! }
//! ```

#[allow(missing_docs)]
pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;
pub mod token;

pub use lexer::Lexer;
pub use parser::{parse, ParseError, Parser};
pub use token::{Span, Token};
