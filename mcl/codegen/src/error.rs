//! Compile-time error kinds.

use thiserror::Error;

/// Errors raised while lowering a program. All of them are fatal; the
/// compiler never emits a partial listing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodegenError {
    /// A name declared twice in the same scope.
    #[error("symbol '{name}' already defined in scope {scope}")]
    Redefinition {
        /// The offending name.
        name: String,
        /// The scope id holding the earlier definition.
        scope: u32,
    },

    /// A reference to a name with no visible declaration.
    #[error("undefined symbol '{0}'")]
    Undefined(String),

    /// The static region cannot satisfy an allocation.
    #[error("static memory overflow: requested {requested} words, {free} free")]
    StaticMemoryOverflow {
        /// Words requested.
        requested: usize,
        /// Free words remaining across all buckets.
        free: usize,
    },

    /// The heap region cannot satisfy a `malloc`.
    #[error("heap exhausted: requested {requested} words, {free} free")]
    HeapExhausted {
        /// Words requested.
        requested: usize,
        /// Free words remaining.
        free: usize,
    },

    /// Every pool register holds a live value, so nothing can be spilled.
    /// Indicates the code generator failed to keep liveness bounded.
    #[error("cannot allocate a register: every candidate holds a live value")]
    NoSpillableRegister,

    /// `malloc` with a size that is not a compile-time constant.
    #[error("malloc size must be a compile-time constant")]
    RuntimeMallocSize,

    /// Assignment to something that is not an lvalue.
    #[error("invalid assignment target")]
    InvalidAssignTarget,

    /// `@` applied to a non-addressable expression.
    #[error("cannot take the address of this expression")]
    InvalidAddressOf,

    /// `break` outside a loop or switch.
    #[error("break statement outside loop or switch")]
    BreakOutsideLoop,

    /// `continue` outside a loop.
    #[error("continue statement outside loop")]
    ContinueOutsideLoop,

    /// `{…}` literal anywhere but an array initializer.
    #[error("array literal is only valid as an array initializer")]
    StrayArrayLiteral,

    /// Array declared without a compile-time size.
    #[error("array '{0}' needs a compile-time size")]
    UnsizedArray(String),

    /// More initializer elements than the array holds.
    #[error("array '{name}' holds {expected} elements, initializer has {found}")]
    ArrayInitLength {
        /// Array name.
        name: String,
        /// Declared element count.
        expected: usize,
        /// Initializer element count.
        found: usize,
    },

    /// No `main` to generate an entry point for.
    #[error("program has no 'main' function")]
    MissingMain,

    /// An `asm` template that does not assemble.
    #[error("inline asm: {0}")]
    InlineAsm(String),

    /// A built-in called with the wrong number of arguments.
    #[error("{builtin} expects {expected} arguments, found {found}")]
    BuiltinArity {
        /// Built-in name.
        builtin: &'static str,
        /// Required argument count.
        expected: usize,
        /// Arguments supplied.
        found: usize,
    },

    /// A constant `setGPUBuffer`/`getGPUBuffer` selector other than 0 or 1.
    #[error("GPU buffer selector must be 0 or 1")]
    InvalidBufferId,
}
