//! AST node definitions.
//!
//! Every node family is a tagged enum; the code generator matches on them
//! exhaustively.

/// A type annotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Type {
    /// 16-bit integer.
    Int,
    /// No value (function returns only).
    Void,
    /// Pointer to a target type.
    Pointer(Box<Type>),
    /// Array of elements; a size is required for storage allocation.
    Array(Box<Type>, Option<usize>),
    /// Function signature.
    Function {
        /// Return type.
        ret: Box<Type>,
        /// Parameter types, in order.
        params: Vec<Type>,
    },
}

/// Binary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    Le,
    /// `>=`
    Ge,
    /// `&&`
    LogicalAnd,
    /// `||`
    LogicalOr,
    /// `&` / `and`
    BitAnd,
    /// `|` / `or`
    BitOr,
    /// `^` / `xor`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
}

/// Unary operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    /// `-`
    Neg,
    /// `!`
    LogicalNot,
    /// `~` / `not`
    BitNot,
    /// `@`
    AddressOf,
    /// `*`
    Deref,
}

/// GPU built-in functions, lowered to drawing opcodes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GpuBuiltin {
    /// `drawLine(x1, y1, x2, y2)`
    DrawLine,
    /// `fillGrid(x, y, w, h)`
    FillGrid,
    /// `clearGrid(x, y, w, h)`
    ClearGrid,
    /// `loadSprite(id, data)`
    LoadSprite,
    /// `drawSprite(id, x, y)`
    DrawSprite,
    /// `loadText(id, data)`
    LoadText,
    /// `drawText(id, x, y)`
    DrawText,
    /// `scrollBuffer(offx, offy)`
    ScrollBuffer,
    /// `setGPUBuffer(buf_id, value)`
    SetGpuBuffer,
    /// `getGPUBuffer(buf_id)`
    GetGpuBuffer,
}

/// Compile-time memory management built-ins.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemBuiltin {
    /// `malloc(size)` with a compile-time constant size.
    Malloc,
    /// `free(ptr)`; resolved at compile time, a no-op in the output.
    Free,
}

/// An expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    /// Integer literal.
    Int(i64),
    /// Character literal (stored as its code point).
    Char(char),
    /// Variable or function reference.
    Ident(String),
    /// Binary operation.
    Binary {
        /// Operator.
        op: BinOp,
        /// Left operand.
        lhs: Box<Expr>,
        /// Right operand.
        rhs: Box<Expr>,
    },
    /// Unary operation.
    Unary {
        /// Operator.
        op: UnOp,
        /// Operand.
        operand: Box<Expr>,
    },
    /// Assignment; the target must be an lvalue.
    Assign {
        /// Assignment target.
        target: Box<Expr>,
        /// Value expression.
        value: Box<Expr>,
    },
    /// Function call.
    Call {
        /// The callee expression (an identifier or function pointer).
        callee: Box<Expr>,
        /// Argument expressions, left to right.
        args: Vec<Expr>,
    },
    /// GPU built-in call.
    GpuCall {
        /// Which built-in.
        builtin: GpuBuiltin,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// Memory built-in call.
    MemCall {
        /// Which built-in.
        builtin: MemBuiltin,
        /// Arguments.
        args: Vec<Expr>,
    },
    /// `asm("template", args…)`: the template is emitted with `%n`
    /// placeholders replaced by argument registers.
    AsmBlock {
        /// The assembly template, possibly multi-line.
        template: String,
        /// Argument expressions bound to `%0`, `%1`, ….
        args: Vec<Expr>,
    },
    /// `base[index]`.
    Index {
        /// Array or pointer expression.
        base: Box<Expr>,
        /// Index expression.
        index: Box<Expr>,
    },
    /// `{e0, e1, …}` array literal, only valid as an array initializer.
    ArrayLit(Vec<Expr>),
}

impl Expr {
    /// The literal integer value, if this expression is a compile-time
    /// constant literal.
    pub fn const_value(&self) -> Option<i64> {
        match self {
            Expr::Int(v) => Some(*v),
            Expr::Char(c) => Some(*c as i64),
            _ => None,
        }
    }
}

/// A variable declaration, local or global.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarDecl {
    /// Declared name.
    pub name: String,
    /// Declared type.
    pub ty: Type,
    /// Optional initializer.
    pub init: Option<Expr>,
}

/// A statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Stmt {
    /// An expression evaluated for its effects.
    Expr(Expr),
    /// Local variable declaration.
    Var(VarDecl),
    /// `{ … }`.
    Block(Vec<Stmt>),
    /// `if (cond) then else`.
    If {
        /// Condition.
        cond: Expr,
        /// Then branch.
        then_branch: Box<Stmt>,
        /// Optional else branch.
        else_branch: Option<Box<Stmt>>,
    },
    /// `while (cond) body`.
    While {
        /// Condition.
        cond: Expr,
        /// Loop body.
        body: Box<Stmt>,
    },
    /// `for (init; cond; step) body`.
    For {
        /// Optional initializer statement.
        init: Option<Box<Stmt>>,
        /// Optional condition.
        cond: Option<Expr>,
        /// Optional step expression.
        step: Option<Expr>,
        /// Loop body.
        body: Box<Stmt>,
    },
    /// `switch (scrutinee) { case …: … default: … }`.
    Switch {
        /// The compared expression.
        scrutinee: Expr,
        /// Cases in source order.
        cases: Vec<SwitchCase>,
    },
    /// `return e;`.
    Return(Option<Expr>),
    /// `break;`
    Break,
    /// `continue;`
    Continue,
}

/// One arm of a switch statement.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchCase {
    /// The case value; `None` is the default arm.
    pub value: Option<Expr>,
    /// Statements; control falls through to the next arm unless it breaks.
    pub body: Vec<Stmt>,
}

/// A function parameter.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub ty: Type,
}

/// A function declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FunctionDecl {
    /// Function name.
    pub name: String,
    /// Parameters in order.
    pub params: Vec<Param>,
    /// Return type.
    pub ret: Type,
    /// Body statements.
    pub body: Vec<Stmt>,
}

/// A top-level item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Item {
    /// Function definition.
    Function(FunctionDecl),
    /// Global variable.
    Global(VarDecl),
}

/// A whole parsed program.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Program {
    /// Top-level items in source order.
    pub items: Vec<Item>,
}
