//! Second pass over the parsed program.
//!
//! The parser leaves type names as strings so classes can refer to classes
//! declared after them. This pass links every declaration in the variable
//! arena to its class, rejects layout cycles, and then checks the things
//! that need those links: field accesses, method calls, assignment targets
//! and the class of values stored into class-typed slots.

use tracing::debug;

use crate::ast::{Block, BlockId, Callee, ClassId, Expr, FuncId, INT, Program, Stmt, VOID, VarDecl};
use crate::cycle::check_cycles;
use crate::error::{CompileError, CompileResult};
use crate::ty::class_of;

pub fn resolve(program: &mut Program, source: &str) -> CompileResult<()> {
  resolve_types(program, source)?;
  check_field_initializers(program, source)?;
  check_cycles(program)?;

  let program: &Program = program;
  for func in program.func_ids() {
    let checker = Checker {
      program,
      source,
      func: Some(func),
    };
    checker.check_block(program.func(func).body)?;
  }
  let checker = Checker {
    program,
    source,
    func: None,
  };
  for class in program.classes.values() {
    for &field in class.fields.values() {
      if let Some(init) = &program.var(field).init {
        checker.check_expr(init)?;
      }
    }
  }
  Ok(())
}

/// Fill in `VarDecl::class` for every declaration and validate return types.
fn resolve_types(program: &mut Program, source: &str) -> CompileResult<()> {
  let mut resolved = 0;
  for index in 0..program.vars.len() {
    let decl = &program.vars[index];
    let class = match decl.type_name.as_str() {
      INT => None,
      VOID => {
        return Err(CompileError::resolution(
          source,
          decl.loc,
          format!("`{}` cannot be declared `{VOID}`", decl.name),
        ));
      }
      name => Some(program.class_id(name).ok_or_else(|| {
        CompileError::resolution(
          source,
          decl.loc,
          format!("unknown type `{name}` for `{}`", decl.name),
        )
      })?),
    };
    if class.is_some() {
      resolved += 1;
    }
    program.vars[index].class = class;
  }

  for func in &program.functions {
    let name = func.return_type.as_str();
    if name != INT && name != VOID && program.class_id(name).is_none() {
      return Err(CompileError::resolution(
        source,
        func.loc,
        format!("unknown return type `{name}` for `{}`", func.name),
      ));
    }
  }

  debug!(
    declarations = program.vars.len(),
    class_typed = resolved,
    "resolved declaration types"
  );
  Ok(())
}

/// A class-typed field may only start out as a null reference; anything else
/// would need code to run before the instance exists.
fn check_field_initializers(program: &Program, source: &str) -> CompileResult<()> {
  for class in program.classes.values() {
    for &field in class.fields.values() {
      let decl = program.var(field);
      if decl.class.is_some() && decl.init.is_some() && !decl.is_null_initialized() {
        return Err(CompileError::resolution(
          source,
          decl.loc,
          format!(
            "field `{}.{}` of class type may only be initialized to null",
            class.name, decl.name
          ),
        ));
      }
    }
  }
  Ok(())
}

struct Checker<'a> {
  program: &'a Program,
  source: &'a str,
  /// Routine whose body is being checked; `None` for field initializers.
  func: Option<FuncId>,
}

impl Checker<'_> {
  fn error(&self, loc: usize, message: impl Into<String>) -> CompileError {
    CompileError::resolution(self.source, loc, message)
  }

  fn class_name(&self, class: Option<ClassId>) -> &str {
    class.map_or(INT, |class| self.program.class(class).name.as_str())
  }

  fn check_block(&self, block: BlockId) -> CompileResult<()> {
    let Block { stmts, .. } = self.program.block(block);
    for stmt in stmts {
      self.check_stmt(stmt)?;
    }
    Ok(())
  }

  fn check_stmt(&self, stmt: &Stmt) -> CompileResult<()> {
    match stmt {
      Stmt::VarDecl(var) => {
        let decl = self.program.var(*var);
        if let Some(init) = &decl.init {
          self.check_expr(init)?;
          self.check_stored(decl, init, decl.loc)?;
        }
        Ok(())
      }
      Stmt::Expr(expr) => self.check_expr(expr),
      Stmt::Return {
        value: Some(value),
        loc,
      } => {
        self.check_expr(value)?;
        self.check_return(value, *loc)
      }
      Stmt::Return { value: None, .. } => Ok(()),
      Stmt::If {
        cond,
        then,
        otherwise,
      } => {
        self.check_expr(cond)?;
        self.check_block(*then)?;
        if let Some(otherwise) = otherwise {
          self.check_block(*otherwise)?;
        }
        Ok(())
      }
      Stmt::While { cond, body } => {
        self.check_expr(cond)?;
        self.check_block(*body)
      }
      Stmt::Block(block) => self.check_block(*block),
      // Nested routines are checked on their own.
      Stmt::FuncDef(_) => Ok(()),
    }
  }

  fn check_expr(&self, expr: &Expr) -> CompileResult<()> {
    match expr {
      Expr::Num { .. } | Expr::Null { .. } | Expr::Ident { .. } => Ok(()),
      Expr::Unary { operand, .. } => self.check_expr(operand),
      Expr::Binary { lhs, rhs, .. } => {
        self.check_expr(lhs)?;
        self.check_expr(rhs)
      }
      Expr::FieldAccess { target, field, loc } => {
        self.check_expr(target)?;
        let Some(class) = class_of(self.program, target) else {
          return Err(self.error(
            *loc,
            format!("cannot access field `{field}` of a value that is not a class instance"),
          ));
        };
        let class = self.program.class(class);
        if !class.fields.contains_key(field) {
          return Err(self.error(
            *loc,
            format!("class `{}` has no field `{field}`", class.name),
          ));
        }
        Ok(())
      }
      Expr::Call { callee, args, loc } => {
        for arg in args {
          self.check_expr(arg)?;
        }
        let func = match callee {
          Callee::Function(func) => *func,
          Callee::Method(name) => self.method(name, args, *loc)?,
        };
        let params = &self.program.func(func).params;
        // The receiver is checked by `method`; only the declared parameters remain.
        let skip = usize::from(matches!(callee, Callee::Method(_)));
        for (&param, arg) in params.values().zip(args).skip(skip) {
          self.check_stored(self.program.var(param), arg, *loc)?;
        }
        Ok(())
      }
      Expr::Assign { target, value, loc } => {
        self.check_expr(target)?;
        self.check_expr(value)?;
        let decl = match &**target {
          Expr::Ident { var, .. } => self.program.var(*var),
          Expr::FieldAccess { target, field, .. } => {
            let class = class_of(self.program, target)
              .ok_or_else(|| self.error(*loc, "invalid assignment target"))?;
            let field = self.program.class(class).fields[field.as_str()];
            self.program.var(field)
          }
          _ => return Err(self.error(*loc, "invalid assignment target")),
        };
        if decl.embeds_instance() {
          return Err(self.error(
            *loc,
            format!(
              "cannot assign to `{}`: it stores a `{}` instance inline",
              decl.name, decl.type_name
            ),
          ));
        }
        self.check_stored(decl, value, *loc)
      }
    }
  }

  /// Look up the method called on the class of the receiver (`args[0]`).
  fn method(&self, name: &str, args: &[Expr], loc: usize) -> CompileResult<FuncId> {
    let Some(class) = args.first().and_then(|receiver| class_of(self.program, receiver)) else {
      return Err(self.error(
        loc,
        format!("cannot call method `{name}` on a value that is not a class instance"),
      ));
    };
    let class = self.program.class(class);
    let Some(&func) = class.methods.get(name) else {
      return Err(self.error(
        loc,
        format!("class `{}` has no method `{name}`", class.name),
      ));
    };
    let expected = self.program.func(func).params.len() - 1;
    let given = args.len() - 1;
    if expected != given {
      return Err(self.error(
        loc,
        format!(
          "`{}.{name}` expects {expected} arguments, but {given} were given",
          class.name
        ),
      ));
    }
    Ok(func)
  }

  /// A returned value must have the routine's return class and must not
  /// live in the routine's own frame. Value/`void` mismatches are reported
  /// by the code generator.
  fn check_return(&self, value: &Expr, loc: usize) -> CompileResult<()> {
    let Some(func) = self.func else {
      return Ok(());
    };
    let def = self.program.func(func);
    if !def.returns_value() || matches!(value, Expr::Null { .. }) {
      return Ok(());
    }

    let expected = self.program.return_class(func);
    let found = class_of(self.program, value);
    if found != expected {
      return Err(CompileError::return_type(
        self.source,
        loc,
        &def.label,
        format!(
          "return value is `{}`, but the function returns `{}`",
          self.class_name(found),
          self.class_name(expected)
        ),
      ));
    }
    if self.in_own_frame(value) {
      return Err(CompileError::return_type(
        self.source,
        loc,
        &def.label,
        "cannot return an instance stored in the function's own stack frame",
      ));
    }
    Ok(())
  }

  /// True for an inline local, or an inline field reached from one.
  fn in_own_frame(&self, expr: &Expr) -> bool {
    match expr {
      Expr::Ident { var, .. } => self.program.var(*var).embeds_instance(),
      Expr::FieldAccess { target, field, .. } => {
        let Some(class) = class_of(self.program, target) else {
          return false;
        };
        let Some(&field) = self.program.class(class).fields.get(field) else {
          return false;
        };
        self.program.var(field).embeds_instance() && self.in_own_frame(target)
      }
      _ => false,
    }
  }

  /// A value stored into a declaration must have the declaration's class;
  /// `null` fits any class-typed slot and reads as 0 in an `int`.
  fn check_stored(&self, decl: &VarDecl, value: &Expr, loc: usize) -> CompileResult<()> {
    if matches!(value, Expr::Null { .. }) {
      return Ok(());
    }
    let found = class_of(self.program, value);
    if found != decl.class {
      return Err(self.error(
        loc,
        format!(
          "type mismatch for `{}`: expected `{}`, found `{}`",
          decl.name,
          self.class_name(decl.class),
          self.class_name(found)
        ),
      ));
    }
    Ok(())
  }
}
