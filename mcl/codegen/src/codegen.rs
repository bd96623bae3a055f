//! AST lowering: walks the program and emits the assembly listing.
//!
//! Storage plan:
//!
//! - Globals and arrays live in the static region, managed by the
//!   free-list allocator.
//! - Function locals and parameters live in the stack frame at
//!   FP-relative offsets, so every activation owns its values across
//!   calls and recursion.
//! - `main` is entered by a plain `JMP` with no frame discipline; its
//!   scalar locals are register-allocated and spill to static RAM under
//!   pressure.
//!
//! Register contents never carry across code the control flow may skip:
//! before any branch, join, or call, register-resident named values are
//! spilled back to their static slots, and operand values crossing a
//! subexpression boundary travel via the hardware stack.

use crate::error::CodegenError;
use crate::mem::MemoryManager;
use crate::regalloc::{
    RegisterAllocator, ALU_RESULT, EPILOGUE_SAVE, FRAME_POINTER, RETURN_ADDRESS, STACK_POINTER,
};
use crate::symtab::{Storage, SymbolKind, SymbolTable};
use log::debug;
use mcl_asm::{Inst, ListingBuilder, Opcode, Operand};
use mcl_frontend::{
    BinOp, Expr, FunctionDecl, GpuBuiltin, Item, MemBuiltin, Param, Program, Stmt, SwitchCase,
    Type, UnOp, VarDecl,
};

/// First word of the static region (globals, arrays, spill slots).
pub const STATIC_BASE: u16 = 0x1000;
/// Size of the static region in words.
pub const STATIC_SIZE: u16 = 0x0800;
/// First word of the heap region (compile-time `malloc`).
pub const HEAP_BASE: u16 = 0x1800;
/// Size of the heap region in words.
pub const HEAP_SIZE: u16 = 0x5800;
/// Initial stack pointer; the stack grows downward from here.
pub const STACK_TOP: u16 = 0x7FFF;

/// Compile a parsed program into assembly text.
pub fn compile(program: &Program) -> Result<String, CodegenError> {
    Compiler::new().run(program)
}

/// The code generator. One instance compiles one program.
pub struct Compiler {
    asm: ListingBuilder,
    symtab: SymbolTable,
    statics: MemoryManager,
    heap: MemoryManager,
    regs: RegisterAllocator,
    label_counter: u32,
    malloc_counter: u32,
    current_function: Option<String>,
    // Jump targets carry the frame depth at their label, so break and
    // continue can unwind stack slots allocated between here and there.
    break_targets: Vec<(String, i32)>,
    continue_targets: Vec<(String, i32)>,
    // Stack slots currently allocated in the open frame.
    frame_depth: i32,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn func_label(name: &str) -> String {
    format!("func_{name}")
}

impl Compiler {
    /// A fresh compiler with empty static and heap regions.
    pub fn new() -> Self {
        Self {
            asm: ListingBuilder::new(),
            symtab: SymbolTable::new(),
            statics: MemoryManager::new(STATIC_BASE, STATIC_SIZE),
            heap: MemoryManager::new(HEAP_BASE, HEAP_SIZE),
            regs: RegisterAllocator::new(),
            label_counter: 0,
            malloc_counter: 0,
            current_function: None,
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
            frame_depth: 0,
        }
    }

    /// Lower the whole program and return the listing text.
    pub fn run(mut self, program: &Program) -> Result<String, CodegenError> {
        // Functions first, so calls resolve regardless of order.
        let mut has_main = false;
        for item in &program.items {
            if let Item::Function(f) = item {
                has_main |= f.name == "main";
                let ty = Type::Function {
                    ret: Box::new(f.ret.clone()),
                    params: f.params.iter().map(|p| p.ty.clone()).collect(),
                };
                self.symtab
                    .declare(&f.name, ty, SymbolKind::Function, Storage::Label)?;
            }
        }
        if !has_main {
            return Err(CodegenError::MissingMain);
        }

        self.emit(
            Inst::new(
                Opcode::Mvr,
                [Operand::Imm(STACK_TOP as i64), Operand::Reg(STACK_POINTER)],
            )
            .with_comment("Initialize stack pointer"),
        );
        self.emit(
            Inst::new(
                Opcode::Mvr,
                [Operand::Imm(STACK_TOP as i64), Operand::Reg(FRAME_POINTER)],
            )
            .with_comment("Initialize frame pointer"),
        );

        for item in &program.items {
            if let Item::Global(decl) = item {
                self.gen_var_decl(decl)?;
            }
        }
        self.emit(
            Inst::new(Opcode::Jmp, [Operand::label(func_label("main"))])
                .with_comment("Enter main"),
        );

        for item in &program.items {
            if let Item::Function(f) = item {
                self.gen_function(f)?;
            }
        }

        debug!(
            "compiled: {} instructions, {} static words free",
            self.asm.inst_count(),
            self.statics.free_words()
        );
        Ok(self.asm.to_text())
    }

    // ----- small helpers ------------------------------------------------

    fn emit(&mut self, inst: Inst) {
        self.asm.push(inst);
    }

    fn new_label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    fn in_main(&self) -> bool {
        self.current_function.as_deref() == Some("main")
    }

    fn alloc_temp(&mut self) -> Result<u8, CodegenError> {
        self.regs.allocate_temporary(&mut self.statics, &mut self.asm)
    }

    fn alloc_protected(&mut self, protect: &[u8]) -> Result<u8, CodegenError> {
        self.regs
            .allocate_protected(protect, &mut self.statics, &mut self.asm)
    }

    fn save_alu(&mut self, pin_live: bool) -> Result<u8, CodegenError> {
        self.regs
            .save_alu_result(pin_live, &mut self.statics, &mut self.asm)
    }

    fn free_if_temp(&mut self, reg: u8) {
        if self.regs.is_temp(reg) {
            self.regs.free_temporary(reg);
        }
    }

    /// Spill register-resident named values back to static RAM. Emitted
    /// before calls, branches, and joins so register contents never carry
    /// across code the flow may skip.
    fn spill_named(&mut self) -> Result<(), CodegenError> {
        self.regs.spill_all_named(&mut self.statics, &mut self.asm)
    }

    /// Push a register's value onto the hardware stack. The SP update goes
    /// through R0, so the pushed register must not be R0 itself.
    fn emit_push(&mut self, reg: u8, comment: &str) {
        debug_assert_ne!(reg, ALU_RESULT, "push reads R0 after clobbering it");
        self.emit(Inst::new(
            Opcode::Sub,
            [Operand::Reg(STACK_POINTER), Operand::Imm(1)],
        ));
        self.emit(Inst::new(
            Opcode::Mvr,
            [Operand::Reg(ALU_RESULT), Operand::Reg(STACK_POINTER)],
        ));
        self.emit(
            Inst::new(Opcode::Load, [Operand::Reg(reg), Operand::Reg(STACK_POINTER)])
                .with_comment(comment),
        );
    }

    /// Pop the top of the hardware stack into `reg`.
    fn emit_pop_into(&mut self, reg: u8, comment: &str) {
        self.emit(
            Inst::new(Opcode::Read, [Operand::Reg(STACK_POINTER), Operand::Reg(reg)])
                .with_comment(comment),
        );
        self.emit(Inst::new(
            Opcode::Add,
            [Operand::Reg(STACK_POINTER), Operand::Imm(1)],
        ));
        self.emit(Inst::new(
            Opcode::Mvr,
            [Operand::Reg(ALU_RESULT), Operand::Reg(STACK_POINTER)],
        ));
    }

    /// Move SP up by `n` slots, releasing stack storage.
    fn emit_sp_release(&mut self, n: i64, comment: &str) {
        self.emit(
            Inst::new(Opcode::Add, [Operand::Reg(STACK_POINTER), Operand::Imm(n)])
                .with_comment(comment),
        );
        self.emit(Inst::new(
            Opcode::Mvr,
            [Operand::Reg(ALU_RESULT), Operand::Reg(STACK_POINTER)],
        ));
    }

    // ----- functions ----------------------------------------------------

    fn gen_function(&mut self, f: &FunctionDecl) -> Result<(), CodegenError> {
        debug!("compiling function '{}'", f.name);
        self.current_function = Some(f.name.clone());
        self.frame_depth = 0;
        self.asm.define_label(func_label(&f.name));

        self.symtab.enter_scope();
        self.regs.enter_scope();

        let is_main = f.name == "main";
        if !is_main {
            self.emit_push(RETURN_ADDRESS, "Save return address");
            self.emit_push(FRAME_POINTER, "Save caller frame pointer");
            self.emit(
                Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(STACK_POINTER), Operand::Reg(FRAME_POINTER)],
                )
                .with_comment("Set up frame pointer"),
            );
        }

        for (k, Param { name, ty }) in f.params.iter().enumerate() {
            // Parameter k sits above the saved frame pointer and return
            // address, pushed right-to-left by the caller.
            self.symtab.declare(
                name,
                ty.clone(),
                SymbolKind::Parameter,
                Storage::Stack(2 + k as i32),
            )?;
        }

        for stmt in &f.body {
            self.gen_stmt(stmt)?;
        }

        if !matches!(f.body.last(), Some(Stmt::Return(_))) {
            self.emit(
                Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(ALU_RESULT)])
                    .with_comment("Default return value"),
            );
            if is_main {
                self.emit(
                    Inst::new(Opcode::Halt, [] as [Operand; 0]).with_comment("Halt execution"),
                );
            } else {
                self.emit_epilogue();
            }
        }

        let scope = self.symtab.exit_scope();
        for symbol in scope.symbols.values() {
            if symbol.storage == Storage::Register {
                self.regs.forget_symbol(&symbol.scoped_name);
            }
        }
        self.regs.exit_scope();
        self.current_function = None;
        Ok(())
    }

    fn emit_epilogue(&mut self) {
        self.emit(
            Inst::new(Opcode::Mvr, [Operand::Reg(ALU_RESULT), Operand::Reg(EPILOGUE_SAVE)])
                .with_comment("Save return value"),
        );
        self.emit(
            Inst::new(
                Opcode::Mvr,
                [Operand::Reg(FRAME_POINTER), Operand::Reg(STACK_POINTER)],
            )
            .with_comment("Discard locals"),
        );
        self.emit_pop_into(FRAME_POINTER, "Restore caller frame pointer");
        self.emit_pop_into(RETURN_ADDRESS, "Restore return address");
        self.emit(
            Inst::new(Opcode::Mvr, [Operand::Reg(EPILOGUE_SAVE), Operand::Reg(ALU_RESULT)])
                .with_comment("Restore return value"),
        );
        self.emit(
            Inst::new(Opcode::Jmp, [Operand::Reg(RETURN_ADDRESS)]).with_comment("Return"),
        );
    }

    // ----- statements ---------------------------------------------------

    fn gen_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Expr(expr) => {
                let reg = self.gen_expr(expr)?;
                self.free_if_temp(reg);
                Ok(())
            }
            Stmt::Var(decl) => self.gen_var_decl(decl),
            Stmt::Block(stmts) => self.gen_block(stmts),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => self.gen_if(cond, then_branch, else_branch.as_deref()),
            Stmt::While { cond, body } => self.gen_while(cond, body),
            Stmt::For {
                init,
                cond,
                step,
                body,
            } => self.gen_for(init.as_deref(), cond.as_ref(), step.as_ref(), body),
            Stmt::Switch { scrutinee, cases } => self.gen_switch(scrutinee, cases),
            Stmt::Return(value) => self.gen_return(value.as_ref()),
            Stmt::Break => {
                let Some((label, depth)) = self.break_targets.last().cloned() else {
                    return Err(CodegenError::BreakOutsideLoop);
                };
                self.emit_unwind_jump(label, depth, "Break")
            }
            Stmt::Continue => {
                let Some((label, depth)) = self.continue_targets.last().cloned() else {
                    return Err(CodegenError::ContinueOutsideLoop);
                };
                self.emit_unwind_jump(label, depth, "Continue")
            }
        }
    }

    fn gen_block(&mut self, stmts: &[Stmt]) -> Result<(), CodegenError> {
        self.symtab.enter_scope();
        self.regs.enter_scope();
        for stmt in stmts {
            self.gen_stmt(stmt)?;
        }
        self.end_block_scope();
        Ok(())
    }

    /// Generate a control-flow substatement inside its own scope, so a
    /// declaration used as a bare branch body still balances the stack on
    /// every path.
    fn gen_scoped_stmt(&mut self, stmt: &Stmt) -> Result<(), CodegenError> {
        match stmt {
            Stmt::Block(stmts) => self.gen_block(stmts),
            _ => self.gen_block(std::slice::from_ref(stmt)),
        }
    }

    /// Jump to `label`, first releasing any stack slots allocated past the
    /// target's frame depth. The compile-time depth bookkeeping is left to
    /// the enclosing blocks, which release their own slots on the normal
    /// path.
    fn emit_unwind_jump(
        &mut self,
        label: String,
        target_depth: i32,
        comment: &str,
    ) -> Result<(), CodegenError> {
        self.spill_named()?;
        let delta = self.frame_depth - target_depth;
        if delta > 0 {
            self.emit(
                Inst::new(Opcode::Add, [Operand::Reg(STACK_POINTER), Operand::Imm(delta as i64)])
                    .with_comment("Unwind loop locals"),
            );
            self.emit(Inst::new(
                Opcode::Mvr,
                [Operand::Reg(ALU_RESULT), Operand::Reg(STACK_POINTER)],
            ));
        }
        self.emit(Inst::new(Opcode::Jmp, [Operand::label(label)]).with_comment(comment));
        Ok(())
    }

    /// Close the current scope: release its registers and spill slots, and
    /// give back its stack slots.
    fn end_block_scope(&mut self) {
        let scope = self.symtab.exit_scope();
        for symbol in scope.symbols.values() {
            if symbol.storage == Storage::Register {
                self.regs.forget_symbol(&symbol.scoped_name);
            }
        }
        if scope.stack_locals > 0 {
            self.emit_sp_release(scope.stack_locals as i64, "Release block locals");
            self.frame_depth -= scope.stack_locals as i32;
        }
        self.regs.exit_scope();
    }

    fn gen_var_decl(&mut self, decl: &VarDecl) -> Result<(), CodegenError> {
        let VarDecl { name, ty, init } = decl;

        if let Type::Array(_, size) = ty {
            let Some(size) = *size else {
                return Err(CodegenError::UnsizedArray(name.clone()));
            };
            return self.gen_array_decl(name, ty.clone(), size, init.as_ref());
        }

        if self.symtab.at_global_scope() {
            let scoped = self.symtab.scoped_name(name);
            let addr = self.alloc_static(&scoped, 1)?;
            self.symtab
                .declare(name, ty.clone(), SymbolKind::Variable, Storage::Ram(addr))?;
            if let Some(init) = init {
                let value = self.gen_expr(init)?;
                self.emit(
                    Inst::new(Opcode::Load, [Operand::Reg(value), Operand::Imm(addr as i64)])
                        .with_comment(format!("Initialize {name}")),
                );
                self.free_if_temp(value);
            }
            return Ok(());
        }

        if self.in_main() {
            // Register-resident local; spills to static RAM under pressure.
            let scoped = self.symtab.scoped_name(name);
            match self
                .regs
                .allocate_for_symbol(&scoped, &mut self.statics, &mut self.asm)
            {
                Ok(_) => {
                    self.symtab.declare(
                        name,
                        ty.clone(),
                        SymbolKind::Variable,
                        Storage::Register,
                    )?;
                }
                Err(CodegenError::NoSpillableRegister) => {
                    let addr = self.alloc_static(&scoped, 1)?;
                    self.symtab.declare(
                        name,
                        ty.clone(),
                        SymbolKind::Variable,
                        Storage::Ram(addr),
                    )?;
                }
                Err(e) => return Err(e),
            }
        } else {
            // Stack-frame slot, owned by this activation.
            let offset = -(self.frame_depth + 1);
            self.frame_depth += 1;
            self.symtab.note_stack_local();
            self.emit(
                Inst::new(Opcode::Sub, [Operand::Reg(STACK_POINTER), Operand::Imm(1)])
                    .with_comment(format!("Allocate stack slot for {name}")),
            );
            self.emit(Inst::new(
                Opcode::Mvr,
                [Operand::Reg(ALU_RESULT), Operand::Reg(STACK_POINTER)],
            ));
            self.symtab
                .declare(name, ty.clone(), SymbolKind::Variable, Storage::Stack(offset))?;
        }

        if let Some(init) = init {
            if matches!(init, Expr::ArrayLit(_)) {
                return Err(CodegenError::StrayArrayLiteral);
            }
            let value = self.gen_expr(init)?;
            let stored = self.store_to_ident(name, value, "Initialize")?;
            self.free_if_temp(stored);
            self.free_if_temp(value);
        }
        Ok(())
    }

    fn gen_array_decl(
        &mut self,
        name: &str,
        ty: Type,
        size: usize,
        init: Option<&Expr>,
    ) -> Result<(), CodegenError> {
        let scoped = self.symtab.scoped_name(name);
        let addr = self.alloc_static(&scoped, size)?;
        self.symtab
            .declare(name, ty, SymbolKind::Array, Storage::Ram(addr))?;

        match init {
            None => Ok(()),
            Some(Expr::ArrayLit(elements)) => {
                if elements.len() > size {
                    return Err(CodegenError::ArrayInitLength {
                        name: name.to_string(),
                        expected: size,
                        found: elements.len(),
                    });
                }
                // Elements are stored at the array's own address, not
                // through an indirection; subscripts compute base+index
                // with the base as an immediate.
                for (i, element) in elements.iter().enumerate() {
                    let value = self.gen_expr(element)?;
                    self.emit(
                        Inst::new(
                            Opcode::Load,
                            [Operand::Reg(value), Operand::Imm(addr as i64 + i as i64)],
                        )
                        .with_comment(format!("{name}[{i}]")),
                    );
                    self.free_if_temp(value);
                }
                Ok(())
            }
            Some(other) => {
                // A scalar initializer fills the first element.
                let value = self.gen_expr(other)?;
                self.emit(
                    Inst::new(Opcode::Load, [Operand::Reg(value), Operand::Imm(addr as i64)])
                        .with_comment(format!("Initialize {name}[0]")),
                );
                self.free_if_temp(value);
                Ok(())
            }
        }
    }

    fn alloc_static(&mut self, owner: &str, size: usize) -> Result<u16, CodegenError> {
        self.statics
            .allocate(owner, size)
            .ok_or(CodegenError::StaticMemoryOverflow {
                requested: size,
                free: self.statics.free_words(),
            })
    }

    fn gen_if(
        &mut self,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
    ) -> Result<(), CodegenError> {
        let cond_reg = self.gen_expr(cond)?;
        self.spill_named()?;
        let else_label = self.new_label("els");
        let end_label = self.new_label("endf");
        self.emit(
            Inst::new(
                Opcode::Jz,
                [Operand::label(else_label.clone()), Operand::Reg(cond_reg)],
            )
            .with_comment("If condition"),
        );
        self.free_if_temp(cond_reg);

        self.gen_scoped_stmt(then_branch)?;
        self.spill_named()?;
        self.emit(
            Inst::new(Opcode::Jmp, [Operand::label(end_label.clone())])
                .with_comment("Skip else"),
        );

        self.asm.define_label(else_label);
        if let Some(else_branch) = else_branch {
            self.gen_scoped_stmt(else_branch)?;
            self.spill_named()?;
        }
        self.asm.define_label(end_label);
        Ok(())
    }

    fn gen_while(&mut self, cond: &Expr, body: &Stmt) -> Result<(), CodegenError> {
        self.spill_named()?;
        let loop_label = self.new_label("wh_lp");
        let end_label = self.new_label("wh_lp_nd");
        let loop_depth = self.frame_depth;
        self.continue_targets.push((loop_label.clone(), loop_depth));
        self.break_targets.push((end_label.clone(), loop_depth));

        self.asm.define_label(loop_label.clone());
        let cond_reg = self.gen_expr(cond)?;
        self.spill_named()?;
        self.emit(
            Inst::new(
                Opcode::Jz,
                [Operand::label(end_label.clone()), Operand::Reg(cond_reg)],
            )
            .with_comment("While condition"),
        );
        self.free_if_temp(cond_reg);

        self.gen_scoped_stmt(body)?;
        self.spill_named()?;
        self.emit(Inst::new(Opcode::Jmp, [Operand::label(loop_label)]).with_comment("Loop back"));
        self.asm.define_label(end_label);

        self.continue_targets.pop();
        self.break_targets.pop();
        Ok(())
    }

    fn gen_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
    ) -> Result<(), CodegenError> {
        // The loop variable lives in a scope wrapping the whole statement.
        self.symtab.enter_scope();
        self.regs.enter_scope();

        if let Some(init) = init {
            self.gen_stmt(init)?;
        }
        self.spill_named()?;

        let loop_label = self.new_label("fr_lp");
        let continue_label = self.new_label("fr_cntnu");
        let end_label = self.new_label("fr_lp_nd");
        let loop_depth = self.frame_depth;
        self.continue_targets.push((continue_label.clone(), loop_depth));
        self.break_targets.push((end_label.clone(), loop_depth));

        self.asm.define_label(loop_label.clone());
        if let Some(cond) = cond {
            let cond_reg = self.gen_expr(cond)?;
            self.spill_named()?;
            self.emit(
                Inst::new(
                    Opcode::Jz,
                    [Operand::label(end_label.clone()), Operand::Reg(cond_reg)],
                )
                .with_comment("For condition"),
            );
            self.free_if_temp(cond_reg);
        }

        self.gen_scoped_stmt(body)?;
        // The continue label is a join; it must see the same all-spilled
        // state a continue jump leaves behind.
        self.spill_named()?;

        self.asm.define_label(continue_label);
        if let Some(step) = step {
            let reg = self.gen_expr(step)?;
            self.free_if_temp(reg);
        }
        self.spill_named()?;
        self.emit(
            Inst::new(Opcode::Jmp, [Operand::label(loop_label)]).with_comment("For loop back"),
        );
        self.asm.define_label(end_label);

        self.continue_targets.pop();
        self.break_targets.pop();
        self.end_block_scope();
        Ok(())
    }

    fn gen_switch(&mut self, scrutinee: &Expr, cases: &[SwitchCase]) -> Result<(), CodegenError> {
        let mut scrut = self.gen_expr(scrutinee)?;
        if scrut == ALU_RESULT {
            scrut = self.save_alu(false)?;
        } else if !self.regs.is_temp(scrut) {
            // Copy named values into a scratch register so later spills
            // cannot hand the register to someone else mid-dispatch.
            let copy = self.alloc_protected(&[scrut])?;
            self.emit(
                Inst::new(Opcode::Mvr, [Operand::Reg(scrut), Operand::Reg(copy)])
                    .with_comment("Switch scrutinee"),
            );
            scrut = copy;
        }
        self.spill_named()?;

        let end_label = self.new_label("swtch_nd");
        self.break_targets.push((end_label.clone(), self.frame_depth));

        let labels: Vec<String> = cases
            .iter()
            .map(|case| {
                if case.value.is_none() {
                    self.new_label("swtch_dflt")
                } else {
                    self.new_label("swtch_cse")
                }
            })
            .collect();

        let mut default_label: Option<String> = None;
        for (case, label) in cases.iter().zip(&labels) {
            match &case.value {
                Some(value) => {
                    let value_reg = self.gen_expr(value)?;
                    self.emit(
                        Inst::new(Opcode::Sub, [Operand::Reg(scrut), Operand::Reg(value_reg)])
                            .with_comment("Compare case"),
                    );
                    self.free_if_temp(value_reg);
                    self.spill_named()?;
                    self.emit(
                        Inst::new(
                            Opcode::Jz,
                            [Operand::label(label.clone()), Operand::Reg(ALU_RESULT)],
                        )
                        .with_comment("Case match"),
                    );
                }
                None => default_label = Some(label.clone()),
            }
        }
        let fallback = default_label.unwrap_or_else(|| end_label.clone());
        self.emit(
            Inst::new(Opcode::Jmp, [Operand::label(fallback)]).with_comment("No case matched"),
        );

        // Arms are laid out in source order; control falls through from one
        // arm into the next unless it breaks.
        for (case, label) in cases.iter().zip(&labels) {
            self.asm.define_label(label.clone());
            // Each arm owns a scope, so declarations inside it balance the
            // stack before control falls into the next arm.
            self.symtab.enter_scope();
            self.regs.enter_scope();
            for stmt in &case.body {
                self.gen_stmt(stmt)?;
            }
            self.end_block_scope();
            self.spill_named()?;
        }

        self.asm.define_label(end_label);
        self.break_targets.pop();
        self.free_if_temp(scrut);
        Ok(())
    }

    fn gen_return(&mut self, value: Option<&Expr>) -> Result<(), CodegenError> {
        match value {
            Some(value) => {
                let reg = self.gen_expr(value)?;
                if reg != ALU_RESULT {
                    self.emit(
                        Inst::new(Opcode::Mvr, [Operand::Reg(reg), Operand::Reg(ALU_RESULT)])
                            .with_comment("Set return value"),
                    );
                }
                self.free_if_temp(reg);
            }
            None => {
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(ALU_RESULT)])
                        .with_comment("Return zero"),
                );
            }
        }
        if self.in_main() {
            self.emit(Inst::new(Opcode::Halt, [] as [Operand; 0]).with_comment("Halt execution"));
        } else {
            self.emit_epilogue();
        }
        Ok(())
    }

    // ----- expressions --------------------------------------------------

    fn gen_expr(&mut self, expr: &Expr) -> Result<u8, CodegenError> {
        match expr {
            Expr::Int(v) => self.gen_literal(*v),
            Expr::Char(c) => self.gen_literal(*c as i64),
            Expr::Ident(name) => self.gen_ident(name),
            Expr::Binary { op, lhs, rhs } => self.gen_binary(*op, lhs, rhs),
            Expr::Unary { op, operand } => self.gen_unary(*op, operand),
            Expr::Assign { target, value } => self.gen_assign(target, value),
            Expr::Call { callee, args } => self.gen_call(callee, args),
            Expr::GpuCall { builtin, args } => self.gen_gpu_call(*builtin, args),
            Expr::MemCall { builtin, args } => self.gen_mem_call(*builtin, args),
            Expr::AsmBlock { template, args } => self.gen_asm_block(template, args),
            Expr::Index { base, index } => {
                let addr = self.gen_element_address(base, index)?;
                let dest = self.alloc_protected(&[addr])?;
                self.emit(
                    Inst::new(Opcode::Read, [Operand::Reg(addr), Operand::Reg(dest)])
                        .with_comment("Load element"),
                );
                self.free_if_temp(addr);
                Ok(dest)
            }
            Expr::ArrayLit(_) => Err(CodegenError::StrayArrayLiteral),
        }
    }

    fn gen_literal(&mut self, value: i64) -> Result<u8, CodegenError> {
        let reg = self.alloc_temp()?;
        self.emit(
            Inst::new(Opcode::Mvr, [Operand::Imm(value), Operand::Reg(reg)])
                .with_comment(format!("Load literal {value}")),
        );
        Ok(reg)
    }

    fn gen_ident(&mut self, name: &str) -> Result<u8, CodegenError> {
        let symbol = self
            .symtab
            .resolve(name)
            .cloned()
            .ok_or_else(|| CodegenError::Undefined(name.to_string()))?;
        match (symbol.kind, symbol.storage) {
            (SymbolKind::Function, _) => {
                let reg = self.alloc_temp()?;
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::label(func_label(name)), Operand::Reg(reg)],
                    )
                    .with_comment(format!("Function pointer {name}")),
                );
                Ok(reg)
            }
            (SymbolKind::Array, Storage::Ram(addr)) => {
                // Arrays decay to their base address.
                let reg = self.alloc_temp()?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Imm(addr as i64), Operand::Reg(reg)])
                        .with_comment(format!("Address of {name}")),
                );
                Ok(reg)
            }
            (_, Storage::Ram(addr)) => {
                let reg = self.alloc_temp()?;
                self.emit(
                    Inst::new(Opcode::Read, [Operand::Imm(addr as i64), Operand::Reg(reg)])
                        .with_comment(format!("Load {name}")),
                );
                Ok(reg)
            }
            (_, Storage::Register) => {
                self.regs
                    .access_symbol(&symbol.scoped_name, &mut self.statics, &mut self.asm)
            }
            (_, Storage::Stack(offset)) => {
                let dest = self.alloc_temp()?;
                self.emit(
                    Inst::new(
                        Opcode::Add,
                        [Operand::Reg(FRAME_POINTER), Operand::Imm(offset as i64)],
                    )
                    .with_comment(format!("Address of {name}")),
                );
                self.emit(
                    Inst::new(Opcode::Read, [Operand::Reg(ALU_RESULT), Operand::Reg(dest)])
                        .with_comment(format!("Load {name}")),
                );
                Ok(dest)
            }
            (_, Storage::Label) => Err(CodegenError::Undefined(name.to_string())),
        }
    }

    /// Evaluate a two-operand expression pair with the stack discipline:
    /// the left value rides the hardware stack while the right side runs,
    /// so nothing the right side does (spills, calls, reloads) can disturb
    /// it. Returns `(left, right)` where `left` is always a fresh scratch
    /// register owned by the caller.
    fn eval_operand_pair(&mut self, lhs: &Expr, rhs: &Expr) -> Result<(u8, u8), CodegenError> {
        let left = self.gen_expr(lhs)?;
        if left == ALU_RESULT {
            let saved = self.save_alu(false)?;
            self.emit_push(saved, "Push left operand");
            self.free_if_temp(saved);
        } else {
            self.emit_push(left, "Push left operand");
            self.free_if_temp(left);
        }

        let mut right = self.gen_expr(rhs)?;
        if right == ALU_RESULT {
            right = self.save_alu(true)?;
        }
        let left = self.alloc_protected(&[right])?;
        self.emit_pop_into(left, "Pop left operand");
        Ok((left, right))
    }

    fn gen_binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<u8, CodegenError> {
        if matches!(op, BinOp::LogicalAnd | BinOp::LogicalOr) {
            return self.gen_logical(op, lhs, rhs);
        }

        let (left, right) = self.eval_operand_pair(lhs, rhs)?;
        let result = match op {
            BinOp::Add => self.gen_simple_alu(Opcode::Add, left, right),
            BinOp::Sub => self.gen_simple_alu(Opcode::Sub, left, right),
            BinOp::Mul => self.gen_simple_alu(Opcode::Mult, left, right),
            BinOp::Div => self.gen_simple_alu(Opcode::Div, left, right),
            BinOp::BitAnd => self.gen_simple_alu(Opcode::And, left, right),
            BinOp::BitOr => self.gen_simple_alu(Opcode::Or, left, right),
            BinOp::BitXor => self.gen_simple_alu(Opcode::Xor, left, right),
            BinOp::Shl => self.gen_simple_alu(Opcode::Shl, left, right),
            BinOp::Shr => self.gen_simple_alu(Opcode::Shr, left, right),
            BinOp::Mod => self.gen_modulo(left, right),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                self.gen_comparison(op, left, right)
            }
            BinOp::LogicalAnd | BinOp::LogicalOr => unreachable!("handled above"),
        }?;
        self.regs.mark_consumed(right);
        self.free_if_temp(right);
        self.free_if_temp(left);
        Ok(result)
    }

    fn gen_simple_alu(&mut self, opcode: Opcode, left: u8, right: u8) -> Result<u8, CodegenError> {
        self.emit(Inst::new(opcode, [Operand::Reg(left), Operand::Reg(right)]));
        Ok(ALU_RESULT)
    }

    /// `a % b` as `a - (a / b) * b`, with the quotient and product parked
    /// in scratch registers.
    fn gen_modulo(&mut self, left: u8, right: u8) -> Result<u8, CodegenError> {
        let quotient = self.alloc_protected(&[left, right])?;
        let product = self.alloc_protected(&[left, right])?;
        self.emit(
            Inst::new(Opcode::Div, [Operand::Reg(left), Operand::Reg(right)])
                .with_comment("Modulo: a / b"),
        );
        self.emit(Inst::new(
            Opcode::Mvr,
            [Operand::Reg(ALU_RESULT), Operand::Reg(quotient)],
        ));
        self.emit(
            Inst::new(Opcode::Mult, [Operand::Reg(quotient), Operand::Reg(right)])
                .with_comment("Modulo: (a / b) * b"),
        );
        self.emit(Inst::new(
            Opcode::Mvr,
            [Operand::Reg(ALU_RESULT), Operand::Reg(product)],
        ));
        self.emit(
            Inst::new(Opcode::Sub, [Operand::Reg(left), Operand::Reg(product)])
                .with_comment("Modulo: a - (a / b) * b"),
        );
        self.free_if_temp(product);
        self.free_if_temp(quotient);
        Ok(ALU_RESULT)
    }

    /// Comparisons compute `left - right` and discriminate on the zero
    /// result and the sign bit.
    fn gen_comparison(&mut self, op: BinOp, left: u8, right: u8) -> Result<u8, CodegenError> {
        let result = self.alloc_protected(&[left, right])?;
        let needs_mask = !matches!(op, BinOp::Eq | BinOp::Ne);
        let mask = if needs_mask {
            Some(self.alloc_protected(&[left, right])?)
        } else {
            None
        };
        let true_label = self.new_label("tru");
        let end_label = self.new_label("cmp_nd");

        self.emit(
            Inst::new(Opcode::Sub, [Operand::Reg(left), Operand::Reg(right)])
                .with_comment("Comparison"),
        );

        let emit_sign_test = |this: &mut Self, mask: u8| {
            this.emit(
                Inst::new(Opcode::Mvr, [Operand::Imm(0x8000), Operand::Reg(mask)])
                    .with_comment("Sign bit mask"),
            );
            this.emit(Inst::new(
                Opcode::And,
                [Operand::Reg(ALU_RESULT), Operand::Reg(mask)],
            ));
        };

        match op {
            BinOp::Eq => {
                self.emit(Inst::new(
                    Opcode::Jz,
                    [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                ));
            }
            BinOp::Ne => {
                self.emit(Inst::new(
                    Opcode::Jnz,
                    [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                ));
            }
            BinOp::Lt => {
                let mask = mask.expect("mask allocated for ordered comparison");
                emit_sign_test(self, mask);
                self.emit(
                    Inst::new(
                        Opcode::Jnz,
                        [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Negative difference means less"),
                );
            }
            BinOp::Gt => {
                let mask = mask.expect("mask allocated for ordered comparison");
                let not_greater = self.new_label("nt_grtr");
                self.emit(
                    Inst::new(
                        Opcode::Jz,
                        [Operand::label(not_greater.clone()), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Equal is not greater"),
                );
                emit_sign_test(self, mask);
                self.emit(
                    Inst::new(
                        Opcode::Jz,
                        [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Positive difference means greater"),
                );
                self.asm.define_label(not_greater);
            }
            BinOp::Le => {
                let mask = mask.expect("mask allocated for ordered comparison");
                self.emit(Inst::new(
                    Opcode::Jz,
                    [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                ));
                emit_sign_test(self, mask);
                self.emit(Inst::new(
                    Opcode::Jnz,
                    [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                ));
            }
            BinOp::Ge => {
                let mask = mask.expect("mask allocated for ordered comparison");
                self.emit(Inst::new(
                    Opcode::Jz,
                    [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                ));
                emit_sign_test(self, mask);
                self.emit(Inst::new(
                    Opcode::Jz,
                    [Operand::label(true_label.clone()), Operand::Reg(ALU_RESULT)],
                ));
            }
            _ => unreachable!("not a comparison"),
        }

        self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(result)]));
        self.emit(Inst::new(Opcode::Jmp, [Operand::label(end_label.clone())]));
        self.asm.define_label(true_label);
        self.emit(
            Inst::new(Opcode::Mvr, [Operand::Imm(1), Operand::Reg(result)])
                .with_comment("Comparison true"),
        );
        self.asm.define_label(end_label);

        if let Some(mask) = mask {
            self.free_if_temp(mask);
        }
        Ok(result)
    }

    /// `&&` / `||`: both operands are evaluated, then a branch chain turns
    /// the pair into 0 or 1.
    fn gen_logical(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<u8, CodegenError> {
        let (left, right) = self.eval_operand_pair(lhs, rhs)?;
        let result = self.alloc_protected(&[left, right])?;
        let end_label = self.new_label("lgc_nd");

        match op {
            BinOp::LogicalAnd => {
                let false_label = self.new_label("lgc_fls");
                self.emit(
                    Inst::new(
                        Opcode::Jz,
                        [Operand::label(false_label.clone()), Operand::Reg(left)],
                    )
                    .with_comment("Logical AND: left zero"),
                );
                self.emit(
                    Inst::new(
                        Opcode::Jz,
                        [Operand::label(false_label.clone()), Operand::Reg(right)],
                    )
                    .with_comment("Logical AND: right zero"),
                );
                self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(1), Operand::Reg(result)]));
                self.emit(Inst::new(Opcode::Jmp, [Operand::label(end_label.clone())]));
                self.asm.define_label(false_label);
                self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(result)]));
            }
            BinOp::LogicalOr => {
                let true_label = self.new_label("lgc_tru");
                self.emit(
                    Inst::new(
                        Opcode::Jnz,
                        [Operand::label(true_label.clone()), Operand::Reg(left)],
                    )
                    .with_comment("Logical OR: left nonzero"),
                );
                self.emit(
                    Inst::new(
                        Opcode::Jnz,
                        [Operand::label(true_label.clone()), Operand::Reg(right)],
                    )
                    .with_comment("Logical OR: right nonzero"),
                );
                self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(result)]));
                self.emit(Inst::new(Opcode::Jmp, [Operand::label(end_label.clone())]));
                self.asm.define_label(true_label);
                self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(1), Operand::Reg(result)]));
            }
            _ => unreachable!("not a logical operator"),
        }
        self.asm.define_label(end_label);

        self.regs.mark_consumed(right);
        self.free_if_temp(right);
        self.free_if_temp(left);
        Ok(result)
    }

    fn gen_unary(&mut self, op: UnOp, operand: &Expr) -> Result<u8, CodegenError> {
        match op {
            UnOp::Neg => {
                let value = self.gen_expr(operand)?;
                let zero = self.alloc_protected(&[value])?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(zero)])
                        .with_comment("Negate"),
                );
                self.emit(Inst::new(
                    Opcode::Sub,
                    [Operand::Reg(zero), Operand::Reg(value)],
                ));
                self.free_if_temp(zero);
                self.free_if_temp(value);
                Ok(ALU_RESULT)
            }
            UnOp::BitNot => {
                let value = self.gen_expr(operand)?;
                let dest = self.alloc_protected(&[value])?;
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(value), Operand::Reg(dest)],
                ));
                self.emit(
                    Inst::new(Opcode::Not, [Operand::Reg(dest)]).with_comment("Bitwise NOT"),
                );
                self.free_if_temp(value);
                Ok(dest)
            }
            UnOp::LogicalNot => {
                let value = self.gen_expr(operand)?;
                let result = self.alloc_protected(&[value])?;
                let true_label = self.new_label("lgc_nt_tru");
                let end_label = self.new_label("lgc_nt_nd");
                self.emit(
                    Inst::new(
                        Opcode::Jz,
                        [Operand::label(true_label.clone()), Operand::Reg(value)],
                    )
                    .with_comment("Logical NOT"),
                );
                self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(result)]));
                self.emit(Inst::new(Opcode::Jmp, [Operand::label(end_label.clone())]));
                self.asm.define_label(true_label);
                self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(1), Operand::Reg(result)]));
                self.asm.define_label(end_label);
                self.free_if_temp(value);
                Ok(result)
            }
            UnOp::AddressOf => match operand {
                Expr::Ident(name) => self.gen_address_of(name),
                _ => Err(CodegenError::InvalidAddressOf),
            },
            UnOp::Deref => {
                let pointer = self.gen_expr(operand)?;
                let dest = self.alloc_protected(&[pointer])?;
                self.emit(
                    Inst::new(Opcode::Read, [Operand::Reg(pointer), Operand::Reg(dest)])
                        .with_comment("Dereference"),
                );
                self.free_if_temp(pointer);
                Ok(dest)
            }
        }
    }

    fn gen_address_of(&mut self, name: &str) -> Result<u8, CodegenError> {
        let symbol = self
            .symtab
            .resolve(name)
            .cloned()
            .ok_or_else(|| CodegenError::Undefined(name.to_string()))?;
        match symbol.storage {
            Storage::Stack(offset) => {
                let dest = self.alloc_temp()?;
                self.emit(
                    Inst::new(
                        Opcode::Add,
                        [Operand::Reg(FRAME_POINTER), Operand::Imm(offset as i64)],
                    )
                    .with_comment(format!("Address of {name}")),
                );
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(dest)],
                ));
                Ok(dest)
            }
            Storage::Ram(addr) => {
                let dest = self.alloc_temp()?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Imm(addr as i64), Operand::Reg(dest)])
                        .with_comment(format!("Address of {name}")),
                );
                Ok(dest)
            }
            Storage::Register => {
                // A register has no address: migrate the value to a static
                // slot and rebind the symbol there for good.
                let reg =
                    self.regs
                        .access_symbol(&symbol.scoped_name, &mut self.statics, &mut self.asm)?;
                let home = format!("home${}", symbol.scoped_name);
                let addr = self.alloc_static(&home, 1)?;
                self.emit(
                    Inst::new(Opcode::Load, [Operand::Reg(reg), Operand::Imm(addr as i64)])
                        .with_comment(format!("Move {name} to memory")),
                );
                self.regs.free_register(reg);
                if let Some(entry) = self.symtab.resolve_mut(name) {
                    entry.storage = Storage::Ram(addr);
                }
                let dest = self.alloc_temp()?;
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Imm(addr as i64), Operand::Reg(dest)],
                ));
                Ok(dest)
            }
            Storage::Label => {
                let dest = self.alloc_temp()?;
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::label(func_label(name)), Operand::Reg(dest)],
                    )
                    .with_comment(format!("Address of {name}")),
                );
                Ok(dest)
            }
        }
    }

    fn gen_assign(&mut self, target: &Expr, value: &Expr) -> Result<u8, CodegenError> {
        match target {
            Expr::Ident(name) => {
                let reg = self.gen_expr(value)?;
                self.store_to_ident(name, reg, "Assign to")
            }
            Expr::Index { base, index } => {
                let mut reg = self.gen_expr(value)?;
                if reg == ALU_RESULT {
                    reg = self.save_alu(false)?;
                }
                self.emit_push(reg, "Save assigned value");
                self.free_if_temp(reg);

                let addr = self.gen_element_address(base, index)?;
                let restored = self.alloc_protected(&[addr])?;
                self.emit_pop_into(restored, "Recover assigned value");
                self.emit(
                    Inst::new(Opcode::Load, [Operand::Reg(restored), Operand::Reg(addr)])
                        .with_comment("Store element"),
                );
                self.free_if_temp(addr);
                Ok(restored)
            }
            Expr::Unary {
                op: UnOp::Deref,
                operand,
            } => {
                let mut reg = self.gen_expr(value)?;
                if reg == ALU_RESULT {
                    reg = self.save_alu(false)?;
                }
                self.emit_push(reg, "Save assigned value");
                self.free_if_temp(reg);

                let pointer = self.gen_expr(operand)?;
                let restored = self.alloc_protected(&[pointer])?;
                self.emit_pop_into(restored, "Recover assigned value");
                self.emit(
                    Inst::new(Opcode::Load, [Operand::Reg(restored), Operand::Reg(pointer)])
                        .with_comment("Store through pointer"),
                );
                self.free_if_temp(pointer);
                Ok(restored)
            }
            _ => Err(CodegenError::InvalidAssignTarget),
        }
    }

    /// Store `value` into the named variable, wherever it lives. Returns a
    /// register that still holds the stored value afterwards (the address
    /// computation for stack slots goes through R0, so an R0-held value is
    /// parked in a scratch register first).
    fn store_to_ident(&mut self, name: &str, value: u8, verb: &str) -> Result<u8, CodegenError> {
        let symbol = self
            .symtab
            .resolve(name)
            .cloned()
            .ok_or_else(|| CodegenError::Undefined(name.to_string()))?;
        match symbol.storage {
            Storage::Register => {
                let dest =
                    self.regs
                        .access_symbol(&symbol.scoped_name, &mut self.statics, &mut self.asm)?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Reg(value), Operand::Reg(dest)])
                        .with_comment(format!("{verb} {name}")),
                );
                self.free_if_temp(value);
                Ok(dest)
            }
            Storage::Ram(addr) => {
                self.emit(
                    Inst::new(Opcode::Load, [Operand::Reg(value), Operand::Imm(addr as i64)])
                        .with_comment(format!("{verb} {name}")),
                );
                Ok(value)
            }
            Storage::Stack(offset) => {
                let source = if value == ALU_RESULT {
                    self.save_alu(false)?
                } else {
                    value
                };
                let addr = self.alloc_protected(&[source])?;
                self.emit(
                    Inst::new(
                        Opcode::Add,
                        [Operand::Reg(FRAME_POINTER), Operand::Imm(offset as i64)],
                    )
                    .with_comment(format!("Slot address of {name}")),
                );
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(addr)],
                ));
                self.emit(
                    Inst::new(Opcode::Load, [Operand::Reg(source), Operand::Reg(addr)])
                        .with_comment(format!("Store {name}")),
                );
                self.free_if_temp(addr);
                Ok(source)
            }
            Storage::Label => Err(CodegenError::InvalidAssignTarget),
        }
    }

    /// Compute the address of `base[index]` into a scratch register.
    fn gen_element_address(&mut self, base: &Expr, index: &Expr) -> Result<u8, CodegenError> {
        // Arrays contribute their base address as an immediate.
        if let Expr::Ident(name) = base {
            let symbol = self
                .symtab
                .resolve(name)
                .cloned()
                .ok_or_else(|| CodegenError::Undefined(name.to_string()))?;
            if let (SymbolKind::Array, Storage::Ram(addr)) = (symbol.kind, symbol.storage) {
                let index_reg = self.gen_expr(index)?;
                self.emit(
                    Inst::new(
                        Opcode::Add,
                        [Operand::Imm(addr as i64), Operand::Reg(index_reg)],
                    )
                    .with_comment(format!("Element address in {name}")),
                );
                let dest = self.alloc_protected(&[index_reg])?;
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(dest)],
                ));
                self.free_if_temp(index_reg);
                return Ok(dest);
            }
        }

        // Pointer arithmetic: base + index, both evaluated.
        let (base_reg, index_reg) = self.eval_operand_pair(base, index)?;
        self.emit(
            Inst::new(Opcode::Add, [Operand::Reg(base_reg), Operand::Reg(index_reg)])
                .with_comment("Element address"),
        );
        let dest = self.alloc_protected(&[base_reg, index_reg])?;
        self.emit(Inst::new(
            Opcode::Mvr,
            [Operand::Reg(ALU_RESULT), Operand::Reg(dest)],
        ));
        self.regs.mark_consumed(index_reg);
        self.free_if_temp(index_reg);
        self.free_if_temp(base_reg);
        Ok(dest)
    }

    fn gen_call(&mut self, callee: &Expr, args: &[Expr]) -> Result<u8, CodegenError> {
        // Arguments go right to left, each pushed as soon as it is
        // evaluated, so values already computed ride the stack while later
        // arguments (and their nested calls) run.
        for arg in args.iter().rev() {
            let mut reg = self.gen_expr(arg)?;
            if reg == ALU_RESULT {
                reg = self.save_alu(false)?;
            }
            self.emit_push(reg, "Push argument");
            self.free_if_temp(reg);
        }

        let callee_name = match callee {
            Expr::Ident(name) => {
                let symbol = self
                    .symtab
                    .resolve(name)
                    .ok_or_else(|| CodegenError::Undefined(name.clone()))?;
                if symbol.kind == SymbolKind::Function {
                    Some(name.clone())
                } else {
                    None
                }
            }
            _ => None,
        };

        let result = match callee_name {
            Some(name) => {
                self.spill_named()?;
                self.emit(
                    Inst::new(Opcode::Jal, [Operand::label(func_label(&name))])
                        .with_comment(format!("Call {name}")),
                );
                let result = self.alloc_temp()?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Reg(ALU_RESULT), Operand::Reg(result)])
                        .with_comment("Save return value"),
                );
                result
            }
            None => {
                // Function pointer call: the target address is a value.
                let mut pointer = self.gen_expr(callee)?;
                if pointer == ALU_RESULT {
                    pointer = self.save_alu(false)?;
                }
                self.spill_named()?;
                self.emit(
                    Inst::new(Opcode::Jal, [Operand::Reg(pointer)])
                        .with_comment("Call through pointer"),
                );
                self.free_if_temp(pointer);
                let result = self.alloc_temp()?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Reg(ALU_RESULT), Operand::Reg(result)])
                        .with_comment("Save return value"),
                );
                result
            }
        };

        if !args.is_empty() {
            self.emit_sp_release(args.len() as i64, "Drop arguments");
        }
        Ok(result)
    }

    fn gen_gpu_call(&mut self, builtin: GpuBuiltin, args: &[Expr]) -> Result<u8, CodegenError> {
        let (name, opcode, arity): (&'static str, Option<Opcode>, usize) = match builtin {
            GpuBuiltin::DrawLine => ("drawLine", Some(Opcode::Drline), 4),
            GpuBuiltin::FillGrid => ("fillGrid", Some(Opcode::Drgrd), 4),
            GpuBuiltin::ClearGrid => ("clearGrid", Some(Opcode::Clrgrid), 4),
            GpuBuiltin::LoadSprite => ("loadSprite", Some(Opcode::Ldspr), 2),
            GpuBuiltin::DrawSprite => ("drawSprite", Some(Opcode::Drspr), 3),
            GpuBuiltin::LoadText => ("loadText", Some(Opcode::Ldtxt), 2),
            GpuBuiltin::DrawText => ("drawText", Some(Opcode::Drtxt), 3),
            GpuBuiltin::ScrollBuffer => ("scrollBuffer", Some(Opcode::Scrlbfr), 2),
            GpuBuiltin::SetGpuBuffer => ("setGPUBuffer", None, 2),
            GpuBuiltin::GetGpuBuffer => ("getGPUBuffer", None, 1),
        };
        if args.len() != arity {
            return Err(CodegenError::BuiltinArity {
                builtin: name,
                expected: arity,
                found: args.len(),
            });
        }

        match builtin {
            GpuBuiltin::SetGpuBuffer => self.gen_set_gpu_buffer(&args[0], &args[1]),
            GpuBuiltin::GetGpuBuffer => self.gen_get_gpu_buffer(&args[0]),
            _ => self.gen_gpu_draw(name, opcode.expect("drawing opcode"), args),
        }
    }

    fn gen_gpu_draw(
        &mut self,
        name: &str,
        opcode: Opcode,
        args: &[Expr],
    ) -> Result<u8, CodegenError> {
        // Constant arguments become immediates; the rest travel the stack
        // so nested evaluation cannot disturb them, then pop into scratch
        // registers right before the command.
        let mut pushed = 0usize;
        for arg in args.iter().rev() {
            if arg.const_value().is_some() {
                continue;
            }
            let mut reg = self.gen_expr(arg)?;
            if reg == ALU_RESULT {
                reg = self.save_alu(false)?;
            }
            self.emit_push(reg, "Push drawing operand");
            self.free_if_temp(reg);
            pushed += 1;
        }

        let mut operands = Vec::with_capacity(args.len());
        let mut scratch = Vec::new();
        for arg in args {
            match arg.const_value() {
                Some(v) => operands.push(Operand::Imm(v)),
                None => {
                    let reg = self.alloc_temp()?;
                    self.emit_pop_into(reg, "Pop drawing operand");
                    scratch.push(reg);
                    operands.push(Operand::Reg(reg));
                }
            }
        }
        debug_assert_eq!(scratch.len(), pushed);

        self.emit(Inst::new(opcode, operands).with_comment(format!("GPU: {name}")));
        for reg in scratch {
            self.free_if_temp(reg);
        }
        Ok(ALU_RESULT)
    }

    /// `setGPUBuffer(selector, value)`: read-modify-write of the GPU
    /// control register. Selector 0 is the edit-buffer bit (bit 1),
    /// selector 1 the display-buffer bit (bit 0).
    fn gen_set_gpu_buffer(&mut self, selector: &Expr, value: &Expr) -> Result<u8, CodegenError> {
        use mcl_asm::SpecialReg;

        match selector.const_value() {
            Some(v) if v == 0 || v == 1 => {
                let mut value_reg = self.gen_expr(value)?;
                if value_reg == ALU_RESULT {
                    value_reg = self.save_alu(false)?;
                }
                let keep = self.alloc_protected(&[value_reg])?;
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::Special(SpecialReg::Gpu), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Read GPU register"),
                );
                if v == 0 {
                    self.emit(
                        Inst::new(
                            Opcode::And,
                            [Operand::Reg(ALU_RESULT), Operand::Imm(0xFFFF_FFFD)],
                        )
                        .with_comment("Clear edit-buffer bit"),
                    );
                    self.emit(Inst::new(
                        Opcode::Mvr,
                        [Operand::Reg(ALU_RESULT), Operand::Reg(keep)],
                    ));
                    self.emit(
                        Inst::new(Opcode::Shl, [Operand::Reg(value_reg), Operand::Imm(1)])
                            .with_comment("Shift value to bit 1"),
                    );
                    self.emit(Inst::new(
                        Opcode::Or,
                        [Operand::Reg(ALU_RESULT), Operand::Reg(keep)],
                    ));
                } else {
                    self.emit(
                        Inst::new(
                            Opcode::And,
                            [Operand::Reg(ALU_RESULT), Operand::Imm(0xFFFF_FFFE)],
                        )
                        .with_comment("Clear display-buffer bit"),
                    );
                    self.emit(Inst::new(
                        Opcode::Mvr,
                        [Operand::Reg(ALU_RESULT), Operand::Reg(keep)],
                    ));
                    self.emit(Inst::new(
                        Opcode::Or,
                        [Operand::Reg(keep), Operand::Reg(value_reg)],
                    ));
                }
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::Reg(ALU_RESULT), Operand::Special(SpecialReg::Gpu)],
                    )
                    .with_comment("Write GPU register"),
                );
                self.free_if_temp(keep);
                self.free_if_temp(value_reg);
                Ok(ALU_RESULT)
            }
            Some(_) => Err(CodegenError::InvalidBufferId),
            None => {
                // Runtime selector: clear both bits, then set bit
                // `1 - selector` to the value.
                let (sel, value_reg) = self.eval_operand_pair(selector, value)?;
                let keep = self.alloc_protected(&[sel, value_reg])?;
                let flip = self.alloc_protected(&[sel, value_reg, keep])?;
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::Special(SpecialReg::Gpu), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Read GPU register"),
                );
                self.emit(
                    Inst::new(
                        Opcode::And,
                        [Operand::Reg(ALU_RESULT), Operand::Imm(0xFFFF_FFFC)],
                    )
                    .with_comment("Clear both buffer bits"),
                );
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(keep)],
                ));
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Imm(1), Operand::Reg(flip)])
                        .with_comment("Bit position = 1 - selector"),
                );
                self.emit(Inst::new(Opcode::Sub, [Operand::Reg(flip), Operand::Reg(sel)]));
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(flip)],
                ));
                self.emit(Inst::new(
                    Opcode::Shl,
                    [Operand::Reg(value_reg), Operand::Reg(flip)],
                ));
                self.emit(Inst::new(
                    Opcode::Or,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(keep)],
                ));
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::Reg(ALU_RESULT), Operand::Special(SpecialReg::Gpu)],
                    )
                    .with_comment("Write GPU register"),
                );
                self.free_if_temp(flip);
                self.free_if_temp(keep);
                self.regs.mark_consumed(value_reg);
                self.free_if_temp(value_reg);
                self.free_if_temp(sel);
                Ok(ALU_RESULT)
            }
        }
    }

    /// `getGPUBuffer(selector)`: read and mask one bit of the GPU control
    /// register.
    fn gen_get_gpu_buffer(&mut self, selector: &Expr) -> Result<u8, CodegenError> {
        use mcl_asm::SpecialReg;

        match selector.const_value() {
            Some(0) => {
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::Special(SpecialReg::Gpu), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Read GPU register"),
                );
                self.emit(Inst::new(
                    Opcode::Shr,
                    [Operand::Reg(ALU_RESULT), Operand::Imm(1)],
                ));
                self.emit(
                    Inst::new(Opcode::And, [Operand::Reg(ALU_RESULT), Operand::Imm(1)])
                        .with_comment("Edit-buffer bit"),
                );
            }
            Some(1) => {
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::Special(SpecialReg::Gpu), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Read GPU register"),
                );
                self.emit(
                    Inst::new(Opcode::And, [Operand::Reg(ALU_RESULT), Operand::Imm(1)])
                        .with_comment("Display-buffer bit"),
                );
            }
            Some(_) => return Err(CodegenError::InvalidBufferId),
            None => {
                let mut sel = self.gen_expr(selector)?;
                if sel == ALU_RESULT {
                    sel = self.save_alu(false)?;
                }
                // Selector 0 -> bit 1, selector 1 -> bit 0.
                let flip = self.alloc_protected(&[sel])?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Imm(1), Operand::Reg(flip)])
                        .with_comment("Bit position = 1 - selector"),
                );
                self.emit(Inst::new(Opcode::Sub, [Operand::Reg(flip), Operand::Reg(sel)]));
                self.emit(Inst::new(
                    Opcode::Mvr,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(flip)],
                ));
                self.emit(
                    Inst::new(
                        Opcode::Mvr,
                        [Operand::Special(SpecialReg::Gpu), Operand::Reg(ALU_RESULT)],
                    )
                    .with_comment("Read GPU register"),
                );
                self.emit(Inst::new(
                    Opcode::Shr,
                    [Operand::Reg(ALU_RESULT), Operand::Reg(flip)],
                ));
                self.emit(Inst::new(
                    Opcode::And,
                    [Operand::Reg(ALU_RESULT), Operand::Imm(1)],
                ));
                self.free_if_temp(flip);
                self.free_if_temp(sel);
            }
        }
        Ok(ALU_RESULT)
    }

    fn gen_mem_call(&mut self, builtin: MemBuiltin, args: &[Expr]) -> Result<u8, CodegenError> {
        match builtin {
            MemBuiltin::Malloc => {
                if args.len() != 1 {
                    return Err(CodegenError::BuiltinArity {
                        builtin: "malloc",
                        expected: 1,
                        found: args.len(),
                    });
                }
                let Some(size) = args[0].const_value() else {
                    return Err(CodegenError::RuntimeMallocSize);
                };
                let owner = format!("malloc{}", self.malloc_counter);
                self.malloc_counter += 1;
                let addr = self.heap.allocate(&owner, size.max(0) as usize).ok_or(
                    CodegenError::HeapExhausted {
                        requested: size.max(0) as usize,
                        free: self.heap.free_words(),
                    },
                )?;
                let reg = self.alloc_temp()?;
                self.emit(
                    Inst::new(Opcode::Mvr, [Operand::Imm(addr as i64), Operand::Reg(reg)])
                        .with_comment(format!("malloc({size}) -> {addr:#06x}")),
                );
                Ok(reg)
            }
            MemBuiltin::Free => {
                if args.len() != 1 {
                    return Err(CodegenError::BuiltinArity {
                        builtin: "free",
                        expected: 1,
                        found: args.len(),
                    });
                }
                // Deallocation is a compile-time affair; the runtime only
                // sees a note. The argument still runs for its effects.
                let reg = self.gen_expr(&args[0])?;
                self.free_if_temp(reg);
                self.asm.comment("free: storage reclaimed at compile time");
                let reg = self.alloc_temp()?;
                self.emit(Inst::new(Opcode::Mvr, [Operand::Imm(0), Operand::Reg(reg)]));
                Ok(reg)
            }
        }
    }

    /// `asm("template", args…)`: each argument is evaluated into a
    /// register, `%n` placeholders are substituted longest-first, and the
    /// lines are assembled in place. The expression's value is whatever
    /// the template leaves in R0.
    fn gen_asm_block(&mut self, template: &str, args: &[Expr]) -> Result<u8, CodegenError> {
        let mut arg_regs = Vec::with_capacity(args.len());
        for arg in args {
            let mut reg = self.gen_expr(arg)?;
            if reg == ALU_RESULT {
                reg = self.save_alu(true)?;
            } else {
                self.regs.mark_live(reg);
            }
            arg_regs.push(reg);
        }

        // Longest placeholder first, so %10 is not eaten by %1.
        let mut text = template.to_string();
        let mut order: Vec<usize> = (0..arg_regs.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse((format!("%{i}").len(), i)));
        for i in order {
            text = text.replace(&format!("%{i}"), &arg_regs[i].to_string());
        }

        for line in text.lines() {
            let (label, inst) =
                mcl_asm::parse_line(line).map_err(|e| CodegenError::InlineAsm(e.message))?;
            if let Some(label) = label {
                self.asm.define_label(label);
            }
            if let Some(inst) = inst {
                self.emit(inst);
            }
        }

        for reg in arg_regs {
            self.regs.mark_consumed(reg);
            self.free_if_temp(reg);
        }
        Ok(ALU_RESULT)
    }
}
