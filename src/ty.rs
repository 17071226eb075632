//! Storage layout of class instances and static class lookup for expressions.
//!
//! An instance starts with an 8-byte header that holds its own address,
//! followed by its fields in declaration order. `int` fields and reference
//! fields (class-typed fields initialized to `null`) take one word; inline
//! class fields take the full size of their class. Sizes are only well
//! defined once the resolver has rejected layout cycles.

use crate::ast::{Callee, ClassId, Expr, Program, VarDecl, VarId};

pub const WORD: i64 = 8;

/// Bytes reserved at offset 0 of every instance.
pub const HEADER_SIZE: i64 = 8;

pub fn class_size(program: &Program, class: ClassId) -> i64 {
  program
    .class(class)
    .fields
    .values()
    .map(|&field| slot_size(program, program.var(field)))
    .sum::<i64>()
    + HEADER_SIZE
}

/// Bytes a declaration occupies where it is stored: a whole instance when it
/// embeds one, one word otherwise.
pub fn slot_size(program: &Program, decl: &VarDecl) -> i64 {
  match decl.class {
    Some(class) if decl.embeds_instance() => class_size(program, class),
    _ => WORD,
  }
}

/// Fields of `class` with their byte offsets from the start of an instance.
pub fn field_layout(program: &Program, class: ClassId) -> Vec<(VarId, i64)> {
  let mut offset = HEADER_SIZE;
  let mut layout = Vec::new();
  for &field in program.class(class).fields.values() {
    layout.push((field, offset));
    offset += slot_size(program, program.var(field));
  }
  layout
}

pub fn field_offset(program: &Program, class: ClassId, name: &str) -> Option<i64> {
  let field = *program.class(class).fields.get(name)?;
  field_layout(program, class)
    .into_iter()
    .find_map(|(id, offset)| (id == field).then_some(offset))
}

/// Class of the value an expression produces, or `None` for integers.
pub fn class_of(program: &Program, expr: &Expr) -> Option<ClassId> {
  match expr {
    Expr::Ident { var, .. } => program.var(*var).class,
    Expr::FieldAccess { target, field, .. } => {
      let class = class_of(program, target)?;
      let field = *program.class(class).fields.get(field)?;
      program.var(field).class
    }
    Expr::Call { callee, args, .. } => {
      let func = match callee {
        Callee::Function(func) => *func,
        Callee::Method(name) => {
          let receiver = class_of(program, args.first()?)?;
          *program.class(receiver).methods.get(name)?
        }
      };
      program.return_class(func)
    }
    Expr::Assign { target, .. } => class_of(program, target),
    Expr::Num { .. } | Expr::Null { .. } | Expr::Unary { .. } | Expr::Binary { .. } => None,
  }
}

/// Round `n` up to the nearest multiple of `align`.
pub fn align_to(n: i64, align: i64) -> i64 {
  (n + align - 1) / align * align
}
