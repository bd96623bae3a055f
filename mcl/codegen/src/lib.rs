//! The MCL compiler back end.
//!
//! Turns a typed AST into a linear assembly listing for the MCL virtual
//! machine. Four cooperating pieces:
//!
//! - [`mem::MemoryManager`]: segregated free-list allocator for static
//!   RAM (globals, arrays, spill slots) and the compile-time heap.
//! - [`symtab::SymbolTable`]: lexical scopes mapping names to storage
//!   descriptors.
//! - [`regalloc::RegisterAllocator`]: liveness-aware allocation over the
//!   fixed register file, with LRU spilling and reload on access.
//! - [`codegen::Compiler`]: the AST walk that emits instructions and
//!   implements the calling convention.
//!
//! ```
//! let program = mcl_frontend::parse_source(
//!     "function main() { var x = 7; return x * 6; }",
//! ).unwrap();
//! let listing = mcl_codegen::compile(&program).unwrap();
//! assert!(listing.contains("func_main:"));
//! ```

#![deny(missing_docs)]

mod codegen;
mod error;
pub mod mem;
pub mod regalloc;
pub mod symtab;

pub use crate::codegen::{
    compile, Compiler, HEAP_BASE, HEAP_SIZE, STACK_TOP, STATIC_BASE, STATIC_SIZE,
};
pub use crate::error::CodegenError;
