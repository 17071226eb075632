//! Code generation: lower the resolved program into AT&T x86-64 assembly.
//!
//! The emitter uses a simple accumulator machine: every expression leaves its
//! value in `%rax`, and binary operators park the left operand on the stack
//! while the right one is computed. Locals, parameters and inline class
//! instances live in the stack frame and are addressed relative to `%rbp`.
//!
//! A class-typed expression evaluates to the address of its instance. For an
//! inline local that address is computed with `lea`; references and
//! parameters already hold it, so their slot is loaded like an integer.

use std::collections::HashMap;

use tracing::debug;

use crate::ast::{
  BinaryOp, BlockId, Callee, ClassId, Expr, FuncDef, FuncId, MAX_ARGS, Program, Stmt, UnaryOp,
  VarId,
};
use crate::error::{CompileError, CompileResult};
use crate::ty::{WORD, align_to, class_of, field_layout, field_offset, slot_size};

/// System V integer argument registers, in order.
const ARG_REGS: [&str; MAX_ARGS] = ["%rdi", "%rsi", "%rdx", "%rcx", "%r8", "%r9"];

/// Emit one routine per function and method of a resolved program.
pub fn generate(program: &Program, source: &str) -> CompileResult<String> {
  let mut emitter = Emitter {
    program,
    source,
    asm: String::new(),
    labels: 0,
  };
  for func in program.func_ids() {
    emitter.emit_function(func)?;
  }
  Ok(emitter.asm)
}

/// Stack slots of one routine, as positive offsets below `%rbp`.
#[derive(Debug, Default)]
struct Frame {
  offsets: HashMap<VarId, i64>,
  size: i64,
}

impl Frame {
  /// Every parameter and local gets its own slot; sibling blocks do not share.
  fn layout(program: &Program, func: &FuncDef) -> Self {
    let mut frame = Self::default();
    for &param in func.params.values() {
      frame.push(param, WORD);
    }
    frame.push_block(program, func.body);
    frame.size = align_to(frame.size, 16);
    frame
  }

  fn push(&mut self, var: VarId, size: i64) {
    self.size += size;
    self.offsets.insert(var, self.size);
  }

  fn push_block(&mut self, program: &Program, block: BlockId) {
    for stmt in &program.block(block).stmts {
      match stmt {
        Stmt::VarDecl(var) => self.push(*var, slot_size(program, program.var(*var))),
        Stmt::If {
          then, otherwise, ..
        } => {
          self.push_block(program, *then);
          if let Some(otherwise) = otherwise {
            self.push_block(program, *otherwise);
          }
        }
        Stmt::While { body, .. } => self.push_block(program, *body),
        Stmt::Block(inner) => self.push_block(program, *inner),
        Stmt::Expr(_) | Stmt::Return { .. } | Stmt::FuncDef(_) => {}
      }
    }
  }
}

/// The routine being emitted.
struct Routine<'a> {
  def: &'a FuncDef,
  frame: Frame,
}

impl Routine<'_> {
  fn offset(&self, program: &Program, var: VarId) -> CompileResult<i64> {
    self.frame.offsets.get(&var).copied().ok_or_else(|| {
      CompileError::codegen(format!(
        "`{}` has no stack slot in `{}`",
        program.var(var).name,
        self.def.label
      ))
    })
  }
}

struct Emitter<'a> {
  program: &'a Program,
  source: &'a str,
  asm: String,
  /// Shared by every routine so local labels stay unique in the output.
  labels: usize,
}

impl<'a> Emitter<'a> {
  fn emit(&mut self, insn: &str) {
    self.asm.push_str("    ");
    self.asm.push_str(insn);
    self.asm.push('\n');
  }

  fn label(&mut self, name: &str) {
    self.asm.push_str(name);
    self.asm.push_str(":\n");
  }

  fn next_label(&mut self) -> usize {
    let label = self.labels;
    self.labels += 1;
    label
  }

  fn emit_function(&mut self, id: FuncId) -> CompileResult<()> {
    let program = self.program;
    let def = program.func(id);
    let routine = Routine {
      def,
      frame: Frame::layout(program, def),
    };

    if program.entry == Some(id) {
      self.emit(&format!(".globl {}", def.label));
    }
    self.emit(".text");
    self.label(&def.label);
    self.emit("push %rbp");
    self.emit("mov %rsp, %rbp");
    if routine.frame.size > 0 {
      self.emit(&format!("sub ${}, %rsp", routine.frame.size));
    }

    for (index, &param) in def.params.values().enumerate() {
      let reg = ARG_REGS.get(index).ok_or_else(|| {
        CompileError::codegen(format!("`{}` has too many parameters", def.label))
      })?;
      let offset = routine.offset(program, param)?;
      self.emit(&format!("mov {reg}, -{offset}(%rbp)"));
    }

    self.emit_block(def.body, &routine)?;

    // Falling off the end returns 0.
    self.emit("mov $0, %rax");
    self.label(&format!(".L.return.{}", def.label));
    self.emit("mov %rbp, %rsp");
    self.emit("pop %rbp");
    self.emit("ret");

    debug!(routine = %def.label, frame = routine.frame.size, "emitted routine");
    Ok(())
  }

  fn emit_block(&mut self, block: BlockId, routine: &Routine) -> CompileResult<()> {
    let program = self.program;
    for stmt in &program.block(block).stmts {
      self.emit_stmt(stmt, routine)?;
    }
    Ok(())
  }

  fn emit_stmt(&mut self, stmt: &Stmt, routine: &Routine) -> CompileResult<()> {
    let program = self.program;
    match stmt {
      Stmt::VarDecl(var) => {
        let decl = program.var(*var);
        let offset = routine.offset(program, *var)?;
        match (decl.class, &decl.init) {
          (Some(class), None) if decl.embeds_instance() => {
            self.construct_instance(class, offset, routine)?;
          }
          (_, Some(init)) => {
            self.emit_expr(init, routine)?;
            self.emit(&format!("mov %rax, -{offset}(%rbp)"));
          }
          (_, None) => self.emit(&format!("movq $0, -{offset}(%rbp)")),
        }
      }
      Stmt::Expr(expr) => self.emit_expr(expr, routine)?,
      Stmt::Return { value, loc } => {
        let def = routine.def;
        match (value, def.returns_value()) {
          (Some(_), false) => {
            return Err(CompileError::return_type(
              self.source,
              *loc,
              &def.label,
              "cannot return a value from a `void` function",
            ));
          }
          (None, true) => {
            return Err(CompileError::return_type(
              self.source,
              *loc,
              &def.label,
              format!("missing return value in a function returning `{}`", def.return_type),
            ));
          }
          _ => {}
        }
        if let Some(value) = value {
          self.emit_expr(value, routine)?;
        }
        self.emit(&format!("jmp .L.return.{}", def.label));
      }
      Stmt::If {
        cond,
        then,
        otherwise,
      } => {
        let n = self.next_label();
        self.emit_expr(cond, routine)?;
        self.emit("cmp $0, %rax");
        self.emit(&format!("je .L.else.{n}"));
        self.emit_block(*then, routine)?;
        self.emit(&format!("jmp .L.end.{n}"));
        self.label(&format!(".L.else.{n}"));
        if let Some(otherwise) = otherwise {
          self.emit_block(*otherwise, routine)?;
        }
        self.label(&format!(".L.end.{n}"));
      }
      Stmt::While { cond, body } => {
        let n = self.next_label();
        self.label(&format!(".L.begin.{n}"));
        self.emit_expr(cond, routine)?;
        self.emit("cmp $0, %rax");
        self.emit(&format!("je .L.end.{n}"));
        self.emit_block(*body, routine)?;
        self.emit(&format!("jmp .L.begin.{n}"));
        self.label(&format!(".L.end.{n}"));
      }
      Stmt::Block(block) => self.emit_block(*block, routine)?,
      // Emitted as a routine of its own.
      Stmt::FuncDef(_) => {}
    }
    Ok(())
  }

  /// Initialise an inline instance whose first byte is at `-offset(%rbp)`:
  /// the header gets the instance address, nested inline instances are built
  /// recursively, and the remaining fields get their initializer or zero.
  fn construct_instance(
    &mut self,
    class: ClassId,
    offset: i64,
    routine: &Routine,
  ) -> CompileResult<()> {
    let program = self.program;
    self.emit(&format!("lea -{offset}(%rbp), %rax"));
    self.emit(&format!("mov %rax, -{offset}(%rbp)"));

    for (field, at) in field_layout(program, class) {
      let decl = program.var(field);
      let slot = offset - at;
      match (decl.class, &decl.init) {
        (Some(inner), None) if decl.embeds_instance() => {
          self.construct_instance(inner, slot, routine)?;
        }
        (_, Some(init)) => {
          self.emit_expr(init, routine)?;
          self.emit(&format!("mov %rax, -{slot}(%rbp)"));
        }
        (_, None) => self.emit(&format!("movq $0, -{slot}(%rbp)")),
      }
    }
    Ok(())
  }

  /// Emit code leaving the value of `expr` in `%rax`.
  fn emit_expr(&mut self, expr: &Expr, routine: &Routine) -> CompileResult<()> {
    let program = self.program;
    match expr {
      Expr::Num { value } => self.emit(&format!("mov ${value}, %rax")),
      Expr::Null { .. } => self.emit("mov $0, %rax"),
      Expr::Ident { var, .. } => {
        let offset = routine.offset(program, *var)?;
        if program.var(*var).embeds_instance() {
          self.emit(&format!("lea -{offset}(%rbp), %rax"));
        } else {
          self.emit(&format!("mov -{offset}(%rbp), %rax"));
        }
      }
      Expr::FieldAccess { target, field, .. } => {
        self.emit_addr(expr, routine)?;
        let class = self.class_of(target)?;
        let decl = program.var(program.class(class).fields[field.as_str()]);
        // An inline instance's value is its address, which is already in %rax.
        if !decl.embeds_instance() {
          self.emit("mov (%rax), %rax");
        }
      }
      Expr::Unary { op, operand } => {
        self.emit_expr(operand, routine)?;
        match op {
          UnaryOp::Neg => self.emit("neg %rax"),
          UnaryOp::Not => {
            self.emit("cmp $0, %rax");
            self.emit("sete %al");
            self.emit("movzb %al, %rax");
          }
        }
      }
      Expr::Binary {
        op: BinaryOp::And,
        lhs,
        rhs,
      } => {
        let n = self.next_label();
        self.emit_expr(lhs, routine)?;
        self.emit("cmp $0, %rax");
        self.emit(&format!("je .L.false.{n}"));
        self.emit_expr(rhs, routine)?;
        self.emit("cmp $0, %rax");
        self.emit(&format!("je .L.false.{n}"));
        self.emit("mov $1, %rax");
        self.emit(&format!("jmp .L.end.{n}"));
        self.label(&format!(".L.false.{n}"));
        self.emit("mov $0, %rax");
        self.label(&format!(".L.end.{n}"));
      }
      Expr::Binary {
        op: BinaryOp::Or,
        lhs,
        rhs,
      } => {
        let n = self.next_label();
        self.emit_expr(lhs, routine)?;
        self.emit("cmp $0, %rax");
        self.emit(&format!("jne .L.true.{n}"));
        self.emit_expr(rhs, routine)?;
        self.emit("cmp $0, %rax");
        self.emit(&format!("jne .L.true.{n}"));
        self.emit("mov $0, %rax");
        self.emit(&format!("jmp .L.end.{n}"));
        self.label(&format!(".L.true.{n}"));
        self.emit("mov $1, %rax");
        self.label(&format!(".L.end.{n}"));
      }
      Expr::Binary { op, lhs, rhs } => {
        self.emit_expr(lhs, routine)?;
        self.emit("push %rax");
        self.emit_expr(rhs, routine)?;
        self.emit("mov %rax, %rdi");
        self.emit("pop %rax");
        self.emit_arith(*op)?;
      }
      Expr::Assign { target, value, .. } => {
        self.emit_expr(value, routine)?;
        self.emit("push %rax");
        self.emit_addr(target, routine)?;
        self.emit("pop %rdi");
        self.emit("mov %rdi, (%rax)");
        self.emit("mov %rdi, %rax");
      }
      Expr::Call { callee, args, .. } => {
        if args.len() > ARG_REGS.len() {
          return Err(CompileError::codegen(format!(
            "call with {} arguments reached code generation",
            args.len()
          )));
        }
        let label = self.call_label(callee, args)?;
        for arg in args {
          self.emit_expr(arg, routine)?;
          self.emit("push %rax");
        }
        for reg in ARG_REGS[..args.len()].iter().rev() {
          self.emit(&format!("pop {reg}"));
        }
        self.emit(&format!("call {label}"));
      }
    }
    Ok(())
  }

  /// Apply `op` to `%rax` (left operand) and `%rdi` (right operand).
  fn emit_arith(&mut self, op: BinaryOp) -> CompileResult<()> {
    let set = match op {
      BinaryOp::Add => {
        self.emit("add %rdi, %rax");
        return Ok(());
      }
      BinaryOp::Sub => {
        self.emit("sub %rdi, %rax");
        return Ok(());
      }
      BinaryOp::Mul => {
        self.emit("imul %rdi, %rax");
        return Ok(());
      }
      BinaryOp::Div | BinaryOp::Rem => {
        self.emit("cqo");
        self.emit("idiv %rdi");
        if op == BinaryOp::Rem {
          self.emit("mov %rdx, %rax");
        }
        return Ok(());
      }
      BinaryOp::Eq => "sete",
      BinaryOp::Ne => "setne",
      BinaryOp::Lt => "setl",
      BinaryOp::Le => "setle",
      BinaryOp::Gt => "setg",
      BinaryOp::Ge => "setge",
      BinaryOp::And | BinaryOp::Or => {
        return Err(CompileError::codegen(
          "logical operator lowered without short-circuit",
        ));
      }
    };
    self.emit("cmp %rdi, %rax");
    self.emit(&format!("{set} %al"));
    self.emit("movzb %al, %rax");
    Ok(())
  }

  /// Emit code leaving the address of an lvalue in `%rax`.
  fn emit_addr(&mut self, expr: &Expr, routine: &Routine) -> CompileResult<()> {
    let program = self.program;
    match expr {
      Expr::Ident { var, .. } => {
        let offset = routine.offset(program, *var)?;
        self.emit(&format!("lea -{offset}(%rbp), %rax"));
        Ok(())
      }
      Expr::FieldAccess { target, field, .. } => {
        let class = self.class_of(target)?;
        let offset = field_offset(program, class, field).ok_or_else(|| {
          CompileError::codegen(format!(
            "class `{}` has no field `{field}`",
            program.class(class).name
          ))
        })?;
        // The target's value is the address of its instance.
        self.emit_expr(target, routine)?;
        self.emit(&format!("add ${offset}, %rax"));
        Ok(())
      }
      _ => Err(CompileError::codegen("expression is not an lvalue")),
    }
  }

  fn call_label(&self, callee: &Callee, args: &[Expr]) -> CompileResult<&'a str> {
    let program = self.program;
    let func = match callee {
      Callee::Function(func) => *func,
      Callee::Method(name) => {
        let receiver = args
          .first()
          .ok_or_else(|| CompileError::codegen(format!("method `{name}` called without receiver")))?;
        let class = self.class_of(receiver)?;
        *program.class(class).methods.get(name).ok_or_else(|| {
          CompileError::codegen(format!(
            "class `{}` has no method `{name}`",
            program.class(class).name
          ))
        })?
      }
    };
    Ok(program.func(func).label.as_str())
  }

  fn class_of(&self, expr: &Expr) -> CompileResult<ClassId> {
    class_of(self.program, expr)
      .ok_or_else(|| CompileError::codegen("member access on a value that is not a class instance"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::generate_assembly;

  fn asm(source: &str) -> String {
    generate_assembly(source).expect("compile")
  }

  #[test]
  fn entry_point_is_global_with_balanced_frame() {
    let asm = asm("int main() { return 2 + 3 * 4; }");
    assert!(asm.contains(".globl main\n"));
    assert!(asm.contains("main:\n"));
    assert!(asm.contains("imul %rdi, %rax"));
    assert_eq!(asm.matches("push %rbp").count(), 1);
    assert_eq!(asm.matches("pop %rbp").count(), 1);
    assert!(asm.contains("jmp .L.return.main"));
  }

  #[test]
  fn every_routine_gets_prologue_and_epilogue() {
    let source = "class P { int x; int get() { return x; } } \
                  int main() { int twice(int v) { return v * 2; } P p; p.x = 4; return twice(p.get()); }";
    let asm = asm(source);
    for label in ["P_get:", "main.twice:", "main:"] {
      assert!(asm.contains(label), "missing {label}");
    }
    assert_eq!(asm.matches("push %rbp").count(), 3);
    assert_eq!(asm.matches("\n    ret\n").count(), 3);
    assert!(asm.contains("call P_get"));
    assert!(asm.contains("call main.twice"));
    assert_eq!(asm.matches(".globl").count(), 1);
  }

  #[test]
  fn frame_holds_inline_instance() {
    // header + two ints = 24 bytes, plus one int local, rounded to 32.
    let asm = asm("class P { int x; int y; } int main() { P p; int n = 1; return n; }");
    assert!(asm.contains("sub $32, %rsp"));
    assert!(asm.contains("lea -24(%rbp), %rax\n    mov %rax, -24(%rbp)"));
    assert!(asm.contains("movq $0, -16(%rbp)"));
    assert!(asm.contains("movq $0, -8(%rbp)"));
    assert!(asm.contains("mov %rax, -32(%rbp)"));
  }

  #[test]
  fn inline_field_chain_adds_static_offsets() {
    let source = "class B { int x; } class A { int n; B b; } \
                  int main() { A a; a.b.x = 1; return a.b.x; }";
    let asm = asm(source);
    // a at -32: n at +8, b at +16, b.x at +8 within b.
    assert!(asm.contains("lea -32(%rbp), %rax\n    add $16, %rax\n    add $8, %rax"));
  }

  #[test]
  fn parameters_are_spilled_from_argument_registers() {
    let source = "int main() { int f(int a, int b, int c, int d, int e, int g) { return g; } \
                  return f(1, 2, 3, 4, 5, 6); }";
    let asm = asm(source);
    for (reg, offset) in ARG_REGS.iter().zip([8, 16, 24, 32, 40, 48]) {
      assert!(asm.contains(&format!("mov {reg}, -{offset}(%rbp)")));
    }
    let pops: Vec<_> = asm
      .lines()
      .filter(|line| line.trim_start().starts_with("pop %r") && !line.contains("%rbp"))
      .collect();
    assert_eq!(
      pops,
      vec![
        "    pop %r9",
        "    pop %r8",
        "    pop %rcx",
        "    pop %rdx",
        "    pop %rsi",
        "    pop %rdi"
      ]
    );
  }

  #[test]
  fn short_circuit_operators_branch() {
    let asm = asm("int main() { return 1 && 0 || 1; }");
    assert!(asm.contains("je .L.false.1"));
    assert!(asm.contains("jne .L.true.0"));
  }

  #[test]
  fn labels_are_unique_across_routines() {
    let source = "class C { int f(int v) { if (v) return 1; return 0; } } \
                  int main() { C c; if (1) return c.f(2); return 0; }";
    let asm = asm(source);
    assert_eq!(asm.matches(".L.else.0:").count(), 1);
    assert_eq!(asm.matches(".L.else.1:").count(), 1);
  }

  #[test]
  fn rejects_value_returned_from_void_function() {
    let err = generate_assembly("int main() { void f() { return 5; } f(); return 0; }")
      .unwrap_err();
    assert!(matches!(err, CompileError::ReturnType { .. }));
    assert!(err.to_string().contains("main.f"));
  }

  #[test]
  fn rejects_missing_value_in_int_function() {
    let err = generate_assembly("int main() { return; }").unwrap_err();
    assert!(matches!(err, CompileError::ReturnType { .. }));
    assert!(err.to_string().contains("missing return value"));
  }

  #[test]
  fn void_function_may_return_early() {
    asm("int main() { void f() { return; } f(); return 0; }");
  }

  #[test]
  fn reference_field_is_loaded_before_offset() {
    let source = "class N { int v; N next = null; } \
                  int main() { N a; N b; a.next = b; return a.next.v; }";
    let asm = asm(source);
    // a.next is a reference at +16; its value is loaded before adding v's offset.
    assert!(asm.contains("add $16, %rax\n    mov (%rax), %rax\n    add $8, %rax\n    mov (%rax), %rax"));
  }
}
