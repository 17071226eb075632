//! Recursive-descent parser producing the program tree, with names resolved
//! as they are read.
//!
//! Expressions use one helper per precedence level with a thin statement
//! layer on top. The parser also owns scoping: every identifier is bound to
//! its declaration at the point of use by walking the chain of open blocks
//! outward and then the parameters of the enclosing routine, so a local can
//! never be used before it is declared. Type names stay plain strings until the resolver
//! runs, which is what allows a class to mention a class declared later.
//!
//! All state lives in an explicit [`Context`] threaded through the helpers.

use std::collections::HashSet;

use tracing::debug;

use crate::ast::{
  BinaryOp, Block, BlockId, BlockOwner, Callee, ClassDef, ClassId, Expr, FuncDef, FuncId,
  MAX_ARGS, Program, Stmt, UnaryOp, VarDecl, VarId, VarKind,
};
use crate::error::{CompileError, CompileResult, locate};
use crate::tokenizer::{Token, TokenKind, describe_token, token_text, token_window};

/// Tokens shown on each side of the offending token in parse errors.
const WINDOW_RADIUS: usize = 5;

/// Name of the implicit receiver parameter of methods.
pub const THIS: &str = "this";

/// Name of the program entry point.
pub const ENTRY: &str = "main";

/// Parse a whole program from the token stream.
pub fn parse(tokens: Vec<Token>, source: &str) -> CompileResult<Program> {
  let mut cx = Context::new(tokens, source);

  while !cx.stream.is_eof() {
    if cx.stream.is("class") {
      parse_class(&mut cx)?;
      continue;
    }

    if starts_function(&cx.stream) {
      let name = cx.stream.text_at(1);
      if name != ENTRY {
        return Err(cx.stream.error_at(
          cx.stream.pos() + 1,
          format!("only `{ENTRY}` may be declared at program scope, found function `{name}`"),
        ));
      }
      if cx.program.entry.is_some() {
        return Err(cx.stream.error_at(
          cx.stream.pos() + 1,
          format!("duplicate entry point `{ENTRY}`"),
        ));
      }
      parse_function(&mut cx, FuncOwner::Program)?;
      continue;
    }

    if cx.stream.peek_kind(0) == Some(TokenKind::Type) {
      return Err(cx
        .stream
        .error("variables cannot be declared at program scope"));
    }

    let got = describe_token(cx.stream.peek(), source);
    return Err(cx.stream.error(format!(
      "expected a class or the `{ENTRY}` function, but got \"{got}\""
    )));
  }

  if cx.program.entry.is_none() {
    return Err(cx.stream.error(format!(
      "missing entry point: declare `int {ENTRY}()`"
    )));
  }

  debug!(
    classes = cx.program.classes.len(),
    functions = cx.program.functions.len(),
    variables = cx.program.vars.len(),
    "parsed program"
  );
  Ok(cx.program)
}

/// Where a routine is being declared.
#[derive(Debug, Clone, Copy)]
enum FuncOwner {
  Program,
  Class(ClassId),
  Block(BlockId),
}

/// Parser state: the token cursor, the program under construction and the
/// scope currently open.
struct Context<'a> {
  stream: TokenStream<'a>,
  program: Program,
  /// Innermost open block, `None` outside routine bodies.
  block: Option<BlockId>,
  /// Routine whose body is being parsed.
  func: Option<FuncId>,
  /// Assembly labels already taken.
  labels: HashSet<String>,
}

impl<'a> Context<'a> {
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      stream: TokenStream::new(tokens, source),
      program: Program::default(),
      block: None,
      func: None,
      labels: HashSet::new(),
    }
  }

  fn new_block(&mut self, parent: Option<BlockId>, owner: BlockOwner) -> BlockId {
    let id = BlockId(self.program.blocks.len());
    self.program.blocks.push(Block::new(parent, owner));
    id
  }

  fn new_var(&mut self, decl: VarDecl) -> VarId {
    let id = VarId(self.program.vars.len());
    self.program.vars.push(decl);
    id
  }

  /// Find the variable `name` visible from the current block: locals of the
  /// open blocks innermost first, then the parameters of the routine.
  fn lookup_var(&self, name: &str) -> Option<VarId> {
    let mut current = self.block;
    while let Some(id) = current {
      let block = self.program.block(id);
      if let Some(&var) = block.locals.get(name) {
        return Some(var);
      }
      if let BlockOwner::Function(func) = block.owner {
        return self.program.func(func).params.get(name).copied();
      }
      current = block.parent;
    }
    None
  }

  /// Nested functions are visible across routine boundaries since they
  /// capture nothing.
  fn lookup_function(&self, name: &str) -> Option<FuncId> {
    let mut current = self.block;
    while let Some(id) = current {
      let block = self.program.block(id);
      if let Some(&func) = block.functions.get(name) {
        return Some(func);
      }
      current = block.parent;
    }
    None
  }

  /// Class and `this` parameter when parsing a method body.
  fn receiver(&self) -> Option<(ClassId, VarId)> {
    let func = self.program.func(self.func?);
    let class = func.class?;
    let this = *func.params.get(THIS)?;
    Some((class, this))
  }
}

fn starts_function(stream: &TokenStream) -> bool {
  stream.peek_kind(0) == Some(TokenKind::Type)
    && stream.peek_kind(1) == Some(TokenKind::Ident)
    && stream.peek_kind(2) == Some(TokenKind::Punctuator)
    && stream.text_at(2) == "("
}

fn parse_class(cx: &mut Context) -> CompileResult<()> {
  cx.stream.skip("class")?;
  let name_pos = cx.stream.pos();
  let (name, loc) = cx.stream.get_ident()?;
  if cx.program.classes.contains_key(&name) {
    return Err(
      cx.stream
        .error_at(name_pos, format!("class `{name}` is already defined")),
    );
  }

  let id = ClassId(cx.program.classes.len());
  cx.program.classes.insert(
    name.clone(),
    ClassDef {
      name: name.clone(),
      fields: Default::default(),
      methods: Default::default(),
      loc,
    },
  );

  cx.stream.skip("{")?;
  while !cx.stream.equal("}") {
    if starts_function(&cx.stream) {
      parse_function(cx, FuncOwner::Class(id))?;
    } else if cx.stream.peek_kind(0) == Some(TokenKind::Type) {
      parse_field(cx, id)?;
    } else {
      let got = describe_token(cx.stream.peek(), cx.stream.source);
      return Err(cx.stream.error(format!(
        "expected a field or method declaration in class `{name}`, but got \"{got}\""
      )));
    }
  }
  Ok(())
}

fn parse_field(cx: &mut Context, class: ClassId) -> CompileResult<()> {
  let (type_name, _) = cx.stream.get_type()?;
  let name_pos = cx.stream.pos();
  let (name, loc) = cx.stream.get_ident()?;
  let init = if cx.stream.equal("=") {
    Some(parse_expr(cx)?)
  } else {
    None
  };
  cx.stream.skip(";")?;

  if cx.program.class(class).fields.contains_key(&name) {
    let class_name = &cx.program.class(class).name;
    return Err(cx.stream.error_at(
      name_pos,
      format!("field `{name}` is already declared in class `{class_name}`"),
    ));
  }
  let var = cx.new_var(VarDecl {
    name: name.clone(),
    type_name,
    init,
    kind: VarKind::Field(class),
    class: None,
    loc,
  });
  cx.program.classes[class.0].fields.insert(name, var);
  Ok(())
}

fn parse_function(cx: &mut Context, owner: FuncOwner) -> CompileResult<FuncId> {
  let (return_type, _) = cx.stream.get_type()?;
  let name_pos = cx.stream.pos();
  let (name, loc) = cx.stream.get_ident()?;

  let label = match owner {
    FuncOwner::Program => name.clone(),
    FuncOwner::Class(class) => format!("{}_{name}", cx.program.class(class).name),
    FuncOwner::Block(block) => {
      if cx.program.block(block).functions.contains_key(&name) {
        return Err(cx.stream.error_at(
          name_pos,
          format!("function `{name}` is already defined in this block"),
        ));
      }
      let outer = cx
        .func
        .map(|func| cx.program.func(func).label.as_str())
        .unwrap_or(ENTRY);
      // Sibling blocks may each define their own `name`.
      let base = format!("{outer}.{name}");
      let mut label = base.clone();
      let mut n = 1;
      while cx.labels.contains(&label) {
        label = format!("{base}.{n}");
        n += 1;
      }
      label
    }
  };
  if !cx.labels.insert(label.clone()) {
    return Err(
      cx.stream
        .error_at(name_pos, format!("routine `{label}` is already defined")),
    );
  }

  let id = FuncId(cx.program.functions.len());
  let parent = match owner {
    FuncOwner::Block(block) => Some(block),
    _ => None,
  };
  let body = cx.new_block(parent, BlockOwner::Function(id));
  let class = match owner {
    FuncOwner::Class(class) => Some(class),
    _ => None,
  };
  cx.program.functions.push(FuncDef {
    name: name.clone(),
    label,
    params: Default::default(),
    return_type,
    body,
    class,
    loc,
  });

  // Register before the body so the routine can call itself.
  match owner {
    FuncOwner::Program => cx.program.entry = Some(id),
    FuncOwner::Class(class) => {
      cx.program.classes[class.0].methods.insert(name.clone(), id);
    }
    FuncOwner::Block(block) => {
      cx.program.blocks[block.0].functions.insert(name.clone(), id);
    }
  }

  if let Some(class) = class {
    let class_name = cx.program.class(class).name.clone();
    declare_param(cx, id, class_name, THIS.to_string(), loc, name_pos)?;
  }

  cx.stream.skip("(")?;
  if !cx.stream.equal(")") {
    loop {
      let (type_name, _) = cx.stream.get_type()?;
      let param_pos = cx.stream.pos();
      let (param, param_loc) = cx.stream.get_ident()?;
      declare_param(cx, id, type_name, param, param_loc, param_pos)?;
      if cx.stream.equal(")") {
        break;
      }
      cx.stream.skip(",")?;
    }
  }

  let count = cx.program.func(id).params.len();
  if count > MAX_ARGS {
    return Err(cx.stream.error_at(
      name_pos,
      format!("`{name}` takes {count} parameters, but at most {MAX_ARGS} are supported"),
    ));
  }

  let outer_block = cx.block.replace(body);
  let outer_func = cx.func.replace(id);
  let result = parse_block_items(cx, body);
  cx.block = outer_block;
  cx.func = outer_func;
  result?;

  Ok(id)
}

fn declare_param(
  cx: &mut Context,
  func: FuncId,
  type_name: String,
  name: String,
  loc: usize,
  pos: usize,
) -> CompileResult<()> {
  if cx.program.func(func).params.contains_key(&name) {
    return Err(
      cx.stream
        .error_at(pos, format!("duplicate parameter `{name}`")),
    );
  }
  let var = cx.new_var(VarDecl {
    name: name.clone(),
    type_name,
    init: None,
    kind: VarKind::Param(func),
    class: None,
    loc,
  });
  cx.program.functions[func.0].params.insert(name, var);
  Ok(())
}

/// Parse `{ stmt* }` into an already created block.
fn parse_block_items(cx: &mut Context, block: BlockId) -> CompileResult<()> {
  cx.stream.skip("{")?;
  let outer = cx.block.replace(block);
  let result = parse_stmts_until_close(cx, block);
  cx.block = outer;
  result
}

fn parse_stmts_until_close(cx: &mut Context, block: BlockId) -> CompileResult<()> {
  while !cx.stream.equal("}") {
    if cx.stream.is_eof() {
      return Err(cx.stream.error("expected \"}\", but reached end of input"));
    }
    let stmt = parse_stmt(cx)?;
    cx.program.blocks[block.0].stmts.push(stmt);
  }
  Ok(())
}

/// Body of `if`/`else`/`while`: a braced block, or a single statement given
/// a block of its own.
fn parse_body(cx: &mut Context, owner: BlockOwner) -> CompileResult<BlockId> {
  let block = cx.new_block(cx.block, owner);
  if cx.stream.is("{") {
    parse_block_items(cx, block)?;
    return Ok(block);
  }

  let outer = cx.block.replace(block);
  let stmt = parse_stmt(cx);
  cx.block = outer;
  cx.program.blocks[block.0].stmts.push(stmt?);
  Ok(block)
}

fn parse_stmt(cx: &mut Context) -> CompileResult<Stmt> {
  let loc = cx.stream.loc();

  if cx.stream.equal("return") {
    let value = if cx.stream.is(";") {
      None
    } else {
      Some(parse_expr(cx)?)
    };
    cx.stream.skip(";")?;
    return Ok(Stmt::Return { value, loc });
  }

  if cx.stream.equal("if") {
    cx.stream.skip("(")?;
    let cond = parse_expr(cx)?;
    cx.stream.skip(")")?;
    let then = parse_body(cx, BlockOwner::Then)?;
    let otherwise = if cx.stream.equal("else") {
      Some(parse_body(cx, BlockOwner::Else)?)
    } else {
      None
    };
    return Ok(Stmt::If {
      cond,
      then,
      otherwise,
    });
  }

  if cx.stream.equal("while") {
    cx.stream.skip("(")?;
    let cond = parse_expr(cx)?;
    cx.stream.skip(")")?;
    let body = parse_body(cx, BlockOwner::Loop)?;
    return Ok(Stmt::While { cond, body });
  }

  if cx.stream.is("{") {
    let block = cx.new_block(cx.block, BlockOwner::Nested);
    parse_block_items(cx, block)?;
    return Ok(Stmt::Block(block));
  }

  if cx.stream.is("class") {
    return Err(
      cx.stream
        .error("class declarations are only permitted at program scope"),
    );
  }

  if starts_function(&cx.stream) {
    let Some(block) = cx.block else {
      return Err(cx.stream.error("function declared outside of a block"));
    };
    let func = parse_function(cx, FuncOwner::Block(block))?;
    return Ok(Stmt::FuncDef(func));
  }

  if cx.stream.peek_kind(0) == Some(TokenKind::Type) {
    return parse_local(cx);
  }

  let expr = parse_expr(cx)?;
  cx.stream.skip(";")?;
  Ok(Stmt::Expr(expr))
}

fn parse_local(cx: &mut Context) -> CompileResult<Stmt> {
  let Some(block) = cx.block else {
    return Err(cx.stream.error("local variable declared outside of a block"));
  };
  let (type_name, _) = cx.stream.get_type()?;
  let name_pos = cx.stream.pos();
  let (name, loc) = cx.stream.get_ident()?;

  // The initializer is parsed first: a variable is not in scope inside it.
  let init = if cx.stream.equal("=") {
    Some(parse_expr(cx)?)
  } else {
    None
  };
  cx.stream.skip(";")?;

  if cx.program.block(block).locals.contains_key(&name) {
    return Err(cx.stream.error_at(
      name_pos,
      format!("`{name}` is already declared in this block"),
    ));
  }
  let var = cx.new_var(VarDecl {
    name: name.clone(),
    type_name,
    init,
    kind: VarKind::Local(block),
    class: None,
    loc,
  });
  cx.program.blocks[block.0].locals.insert(name, var);
  Ok(Stmt::VarDecl(var))
}

fn parse_expr(cx: &mut Context) -> CompileResult<Expr> {
  parse_assign(cx)
}

fn parse_assign(cx: &mut Context) -> CompileResult<Expr> {
  let start = cx.stream.pos();
  let loc = cx.stream.loc();
  let node = parse_or(cx)?;

  if cx.stream.equal("=") {
    if !node.is_lvalue() {
      return Err(cx.stream.error_at(
        start,
        "invalid assignment target: expected a variable or field access",
      ));
    }
    let value = parse_assign(cx)?;
    return Ok(Expr::assign(node, value, loc));
  }

  Ok(node)
}

/// Consume the current token if it is one of the operators in `table`.
fn binary_op(cx: &mut Context, table: &[(&str, BinaryOp)]) -> Option<BinaryOp> {
  let op = table
    .iter()
    .find(|(symbol, _)| cx.stream.is(symbol))
    .map(|&(_, op)| op)?;
  cx.stream.pos += 1;
  Some(op)
}

fn parse_or(cx: &mut Context) -> CompileResult<Expr> {
  let mut node = parse_and(cx)?;
  while cx.stream.equal("||") {
    let rhs = parse_and(cx)?;
    node = Expr::binary(BinaryOp::Or, node, rhs);
  }
  Ok(node)
}

fn parse_and(cx: &mut Context) -> CompileResult<Expr> {
  let mut node = parse_equality(cx)?;
  while cx.stream.equal("&&") {
    let rhs = parse_equality(cx)?;
    node = Expr::binary(BinaryOp::And, node, rhs);
  }
  Ok(node)
}

fn parse_equality(cx: &mut Context) -> CompileResult<Expr> {
  let mut node = parse_relational(cx)?;
  while let Some(op) = binary_op(cx, &[("==", BinaryOp::Eq), ("!=", BinaryOp::Ne)]) {
    let rhs = parse_relational(cx)?;
    node = Expr::binary(op, node, rhs);
  }
  Ok(node)
}

fn parse_relational(cx: &mut Context) -> CompileResult<Expr> {
  let mut node = parse_add(cx)?;
  while let Some(op) = binary_op(
    cx,
    &[
      ("<", BinaryOp::Lt),
      ("<=", BinaryOp::Le),
      (">", BinaryOp::Gt),
      (">=", BinaryOp::Ge),
    ],
  ) {
    let rhs = parse_add(cx)?;
    node = Expr::binary(op, node, rhs);
  }
  Ok(node)
}

fn parse_add(cx: &mut Context) -> CompileResult<Expr> {
  let mut node = parse_mul(cx)?;
  while let Some(op) = binary_op(cx, &[("+", BinaryOp::Add), ("-", BinaryOp::Sub)]) {
    let rhs = parse_mul(cx)?;
    node = Expr::binary(op, node, rhs);
  }
  Ok(node)
}

fn parse_mul(cx: &mut Context) -> CompileResult<Expr> {
  let mut node = parse_unary(cx)?;
  while let Some(op) = binary_op(
    cx,
    &[
      ("*", BinaryOp::Mul),
      ("/", BinaryOp::Div),
      ("%", BinaryOp::Rem),
    ],
  ) {
    let rhs = parse_unary(cx)?;
    node = Expr::binary(op, node, rhs);
  }
  Ok(node)
}

fn parse_unary(cx: &mut Context) -> CompileResult<Expr> {
  if cx.stream.equal("+") {
    return parse_unary(cx);
  }

  if cx.stream.equal("-") {
    let operand = parse_unary(cx)?;
    return Ok(Expr::unary(UnaryOp::Neg, operand));
  }

  if cx.stream.equal("!") {
    let operand = parse_unary(cx)?;
    return Ok(Expr::unary(UnaryOp::Not, operand));
  }

  parse_postfix(cx)
}

/// Primary expression followed by any chain of `.field` and `.method(...)`.
fn parse_postfix(cx: &mut Context) -> CompileResult<Expr> {
  let mut node = parse_primary(cx)?;

  while cx.stream.equal(".") {
    let member_pos = cx.stream.pos();
    let (member, loc) = cx.stream.get_ident()?;
    if cx.stream.is("(") {
      let args = parse_args(cx, vec![node], member_pos)?;
      node = Expr::Call {
        callee: Callee::Method(member),
        args,
        loc,
      };
    } else {
      node = Expr::field(node, member, loc);
    }
  }

  Ok(node)
}

fn parse_primary(cx: &mut Context) -> CompileResult<Expr> {
  let loc = cx.stream.loc();

  if cx.stream.equal("(") {
    let node = parse_expr(cx)?;
    cx.stream.skip(")")?;
    return Ok(node);
  }

  if cx.stream.equal("true") {
    return Ok(Expr::number(1));
  }

  if cx.stream.equal("false") {
    return Ok(Expr::number(0));
  }

  if cx.stream.equal("null") {
    return Ok(Expr::Null { loc });
  }

  if cx.stream.peek_kind(0) == Some(TokenKind::Ident) {
    let pos = cx.stream.pos();
    let (name, loc) = cx.stream.get_ident()?;
    if cx.stream.is("(") {
      return parse_call(cx, name, loc, pos);
    }
    return resolve_ident(cx, &name, loc);
  }

  if cx.stream.peek_kind(0) == Some(TokenKind::Num) {
    let value = cx.stream.get_number()?;
    return Ok(Expr::number(value));
  }

  let got = describe_token(cx.stream.peek(), cx.stream.source);
  Err(
    cx.stream
      .error(format!("expected an expression, but got \"{got}\"")),
  )
}

/// Bind an identifier to its declaration. Inside a method, a name that is
/// neither a local nor a parameter may be a field of the receiver.
fn resolve_ident(cx: &Context, name: &str, loc: usize) -> CompileResult<Expr> {
  if let Some(var) = cx.lookup_var(name) {
    return Ok(Expr::Ident { var, loc });
  }

  if let Some((class, this)) = cx.receiver()
    && cx.program.class(class).fields.contains_key(name)
  {
    let receiver = Expr::Ident { var: this, loc };
    return Ok(Expr::field(receiver, name, loc));
  }

  Err(CompileError::resolution(
    cx.stream.source,
    loc,
    format!("`{name}` is not declared in this scope"),
  ))
}

fn parse_call(cx: &mut Context, name: String, loc: usize, pos: usize) -> CompileResult<Expr> {
  if let Some(func) = cx.lookup_function(&name) {
    let args = parse_args(cx, Vec::new(), pos)?;
    let expected = cx.program.func(func).params.len();
    if args.len() != expected {
      return Err(cx.stream.error_at(
        pos,
        format!("`{name}` expects {expected} arguments, but {} were given", args.len()),
      ));
    }
    return Ok(Expr::Call {
      callee: Callee::Function(func),
      args,
      loc,
    });
  }

  if let Some((_, this)) = cx.receiver() {
    let receiver = Expr::Ident { var: this, loc };
    let args = parse_args(cx, vec![receiver], pos)?;
    return Ok(Expr::Call {
      callee: Callee::Method(name),
      args,
      loc,
    });
  }

  Err(CompileError::resolution(
    cx.stream.source,
    loc,
    format!("function `{name}` is not declared in this scope"),
  ))
}

/// Parse `( expr, ... )`, appending to `args` (which may already hold a receiver).
fn parse_args(cx: &mut Context, mut args: Vec<Expr>, call_pos: usize) -> CompileResult<Vec<Expr>> {
  cx.stream.skip("(")?;
  if !cx.stream.equal(")") {
    loop {
      args.push(parse_expr(cx)?);
      if cx.stream.equal(")") {
        break;
      }
      cx.stream.skip(",")?;
    }
  }

  if args.len() > MAX_ARGS {
    return Err(cx.stream.error_at(
      call_pos,
      format!(
        "call passes {} arguments, but at most {MAX_ARGS} are supported",
        args.len()
      ),
    ));
  }
  Ok(args)
}

/// Lightweight cursor over the token vector.
struct TokenStream<'a> {
  tokens: Vec<Token>,
  source: &'a str,
  pos: usize,
}

impl<'a> TokenStream<'a> {
  /// Take ownership of the token stream; the parser will advance `pos` as it consumes input.
  fn new(tokens: Vec<Token>, source: &'a str) -> Self {
    Self {
      tokens,
      source,
      pos: 0,
    }
  }

  fn pos(&self) -> usize {
    self.pos
  }

  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn peek_kind(&self, offset: usize) -> Option<TokenKind> {
    self.tokens.get(self.pos + offset).map(|token| token.kind)
  }

  /// Source text of the token `offset` places ahead, empty past the end.
  fn text_at(&self, offset: usize) -> &'a str {
    self
      .tokens
      .get(self.pos + offset)
      .map_or("", |token| token_text(token, self.source))
  }

  /// Byte offset of the current token.
  fn loc(&self) -> usize {
    self.peek().map_or(self.source.len(), |token| token.loc)
  }

  /// Whether the current token is the punctuator or keyword `op`.
  fn is(&self, op: &str) -> bool {
    self.peek().is_some_and(|token| {
      matches!(token.kind, TokenKind::Punctuator | TokenKind::Keyword)
        && token.len == op.len()
        && token_text(token, self.source) == op
    })
  }

  /// Consume the current token if it matches the provided punctuator or keyword.
  fn equal(&mut self, op: &str) -> bool {
    if self.is(op) {
      self.pos += 1;
      return true;
    }
    false
  }

  fn skip(&mut self, s: &str) -> CompileResult<()> {
    if self.equal(s) {
      Ok(())
    } else {
      Err(self.error(format!("expected \"{s}\", but got {}", self.describe_current())))
    }
  }

  /// Parse the current token as an integer literal.
  fn get_number(&mut self) -> CompileResult<i64> {
    if let Some(token) = self.peek()
      && token.kind == TokenKind::Num
      && let Some(value) = token.value
    {
      self.pos += 1;
      return Ok(value);
    }
    Err(self.error(format!(
      "expected a number, but got {}",
      self.describe_current()
    )))
  }

  /// Parse the current token as an identifier, returning its text and location.
  fn get_ident(&mut self) -> CompileResult<(String, usize)> {
    self.get_kind(TokenKind::Ident, "an identifier")
  }

  /// Parse the current token as a type name.
  fn get_type(&mut self) -> CompileResult<(String, usize)> {
    self.get_kind(TokenKind::Type, "a type")
  }

  fn get_kind(&mut self, kind: TokenKind, what: &str) -> CompileResult<(String, usize)> {
    if let Some(token) = self.peek()
      && token.kind == kind
    {
      let text = token_text(token, self.source).to_string();
      let loc = token.loc;
      self.pos += 1;
      return Ok((text, loc));
    }
    Err(self.error(format!(
      "expected {what}, but got {}",
      self.describe_current()
    )))
  }

  fn is_eof(&self) -> bool {
    matches!(self.peek_kind(0), Some(TokenKind::Eof) | None)
  }

  fn describe_current(&self) -> String {
    match self.peek() {
      Some(token) => format!(
        "{:?} \"{}\"",
        token.kind,
        describe_token(Some(token), self.source)
      ),
      None => "EOF".to_string(),
    }
  }

  fn error(&self, message: impl Into<String>) -> CompileError {
    self.error_at(self.pos, message)
  }

  fn error_at(&self, pos: usize, message: impl Into<String>) -> CompileError {
    let loc = self
      .tokens
      .get(pos)
      .map_or(self.source.len(), |token| token.loc);
    CompileError::Parse {
      message: message.into(),
      location: locate(self.source, loc),
      window: token_window(&self.tokens, self.source, pos, WINDOW_RADIUS),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::tokenizer::tokenize;

  fn parse_source(source: &str) -> CompileResult<Program> {
    parse(tokenize(source)?, source)
  }

  fn entry_body(program: &Program) -> &Block {
    let entry = program.entry.expect("entry");
    program.block(program.func(entry).body)
  }

  #[test]
  fn parses_entry_point() {
    let program = parse_source("int main() { return 2 + 3 * 4; }").expect("parse");
    let body = entry_body(&program);
    assert_eq!(body.stmts.len(), 1);
    let Stmt::Return {
      value: Some(Expr::Binary { op, rhs, .. }),
      ..
    } = &body.stmts[0]
    else {
      panic!("unexpected statement {:?}", body.stmts[0]);
    };
    assert_eq!(*op, BinaryOp::Add);
    assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
  }

  #[test]
  fn subtraction_is_left_associative() {
    let program = parse_source("int main() { return 10 - 3 - 2; }").expect("parse");
    let Stmt::Return {
      value: Some(Expr::Binary { lhs, rhs, .. }),
      ..
    } = &entry_body(&program).stmts[0]
    else {
      panic!("expected return");
    };
    assert!(matches!(**lhs, Expr::Binary { op: BinaryOp::Sub, .. }));
    assert_eq!(**rhs, Expr::number(2));
  }

  #[test]
  fn binds_identifiers_to_declarations() {
    let program = parse_source("int main() { int x = 1; x = x + 1; return x; }").expect("parse");
    let body = entry_body(&program);
    let Stmt::VarDecl(x) = body.stmts[0] else {
      panic!("expected declaration");
    };
    let Stmt::Return {
      value: Some(Expr::Ident { var, .. }),
      ..
    } = &body.stmts[2]
    else {
      panic!("expected return of identifier");
    };
    assert_eq!(*var, x);
  }

  #[test]
  fn inner_block_shadows_outer_local() {
    let source = "int main() { int x = 1; { int x = 2; x = 3; } return x; }";
    let program = parse_source(source).expect("parse");
    let body = entry_body(&program);
    let Stmt::VarDecl(outer) = body.stmts[0] else {
      panic!("expected declaration");
    };
    let Stmt::Block(inner) = body.stmts[1] else {
      panic!("expected block");
    };
    let inner = program.block(inner);
    let Stmt::VarDecl(shadow) = inner.stmts[0] else {
      panic!("expected declaration");
    };
    assert_ne!(outer, shadow);
    let Stmt::Expr(Expr::Assign { target, .. }) = &inner.stmts[1] else {
      panic!("expected assignment");
    };
    assert!(matches!(**target, Expr::Ident { var, .. } if var == shadow));
  }

  #[test]
  fn rejects_use_before_declaration() {
    let err = parse_source("int main() { x = 1; int x; return x; }").unwrap_err();
    assert!(matches!(err, CompileError::Resolution { .. }));
    assert!(err.to_string().contains("`x` is not declared"));
  }

  #[test]
  fn rejects_initializer_referring_to_itself() {
    let err = parse_source("int main() { int x = x; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::Resolution { .. }));
  }

  #[test]
  fn rejects_duplicate_local_in_same_block() {
    let err = parse_source("int main() { int x; int x; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
    assert!(err.to_string().contains("already declared"));
  }

  #[test]
  fn methods_get_class_prefixed_labels_and_receiver() {
    let source = "class Counter { int n; int bump(int by) { n = n + by; return n; } } \
                  int main() { Counter c; return c.bump(2); }";
    let program = parse_source(source).expect("parse");
    let class = program.class(ClassId(0));
    let method = program.func(class.methods["bump"]);
    assert_eq!(method.label, "Counter_bump");
    let params: Vec<_> = method.params.keys().cloned().collect();
    assert_eq!(params, vec!["this", "by"]);
  }

  #[test]
  fn bare_field_in_method_reads_through_receiver() {
    let source = "class P { int x; int get() { return x; } } int main() { return 0; }";
    let program = parse_source(source).expect("parse");
    let method = program.func(program.class(ClassId(0)).methods["get"]);
    let Stmt::Return {
      value: Some(Expr::FieldAccess { target, field, .. }),
      ..
    } = &program.block(method.body).stmts[0]
    else {
      panic!("expected field access");
    };
    assert_eq!(field, "x");
    assert!(matches!(**target, Expr::Ident { var, .. } if var == method.params["this"]));
  }

  #[test]
  fn nested_function_is_hoisted_and_callable() {
    let source = "int main() { int sub(int a, int b) { return a - b; } return sub(8, 5); }";
    let program = parse_source(source).expect("parse");
    let body = entry_body(&program);
    let Stmt::FuncDef(sub) = body.stmts[0] else {
      panic!("expected nested function");
    };
    assert_eq!(program.func(sub).label, "main.sub");
    assert!(matches!(
      &body.stmts[1],
      Stmt::Return { value: Some(Expr::Call { callee: Callee::Function(f), .. }), .. } if *f == sub
    ));
  }

  #[test]
  fn sibling_blocks_may_define_same_function() {
    let source = "int main() { { int f() { return 1; } f(); } { int f() { return 2; } return f(); } }";
    let program = parse_source(source).expect("parse");
    let labels: Vec<_> = program.functions.iter().map(|f| f.label.as_str()).collect();
    assert_eq!(labels, vec!["main", "main.f", "main.f.1"]);
  }

  #[test]
  fn rejects_duplicate_function_in_same_block() {
    let source = "int main() { int f() { return 1; } int f() { return 2; } return f(); }";
    let err = parse_source(source).unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
    assert!(err.to_string().contains("function `f` is already defined in this block"));
  }

  #[test]
  fn nested_function_does_not_capture_locals() {
    let source = "int main() { int x = 1; int f() { return x; } return f(); }";
    let err = parse_source(source).unwrap_err();
    assert!(matches!(err, CompileError::Resolution { .. }));
  }

  #[test]
  fn nested_function_may_recurse() {
    let source = "int main() { int fact(int n) { if (n < 2) return 1; return n * fact(n - 1); } return fact(5); }";
    parse_source(source).expect("parse");
  }

  #[test]
  fn else_if_chain_nests_to_the_right() {
    let source = "int main() { int x = 2; if (x == 1) return 1; else if (x == 2) return 2; else return 3; }";
    let program = parse_source(source).expect("parse");
    let Stmt::If {
      otherwise: Some(else_block),
      ..
    } = &entry_body(&program).stmts[1]
    else {
      panic!("expected if");
    };
    let else_block = program.block(*else_block);
    assert_eq!(else_block.owner, BlockOwner::Else);
    assert!(matches!(
      else_block.stmts[..],
      [Stmt::If {
        otherwise: Some(_),
        ..
      }]
    ));
  }

  #[test]
  fn records_null_initializer_on_field() {
    let source = "class A { A next = null; } int main() { return 0; }";
    let program = parse_source(source).expect("parse");
    let field = program.var(program.class(ClassId(0)).fields["next"]);
    assert!(field.is_null_initialized());
  }

  #[test]
  fn rejects_second_entry_point() {
    let err = parse_source("int main() { return 0; } int main() { return 1; }").unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
    assert!(err.to_string().contains("duplicate entry point"));
  }

  #[test]
  fn rejects_other_free_function() {
    let err = parse_source("int helper() { return 0; } int main() { return 0; }").unwrap_err();
    assert!(err.to_string().contains("only `main` may be declared"));
  }

  #[test]
  fn rejects_missing_entry_point() {
    let err = parse_source("class A { int x; }").unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
    assert!(err.to_string().contains("missing entry point"));
  }

  #[test]
  fn rejects_class_inside_function() {
    let err = parse_source("int main() { class A { int x; } return 0; }").unwrap_err();
    assert!(err.to_string().contains("only permitted at program scope"));
  }

  #[test]
  fn rejects_global_variable() {
    let err = parse_source("int x; int main() { return 0; }").unwrap_err();
    assert!(err.to_string().contains("program scope"));
  }

  #[test]
  fn rejects_seven_parameters() {
    let source = "int main() { int f(int a, int b, int c, int d, int e, int g, int h) { return a; } return 0; }";
    let err = parse_source(source).unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
    assert!(err.to_string().contains("at most 6"));
  }

  #[test]
  fn method_receiver_counts_against_parameter_limit() {
    let source = "class A { int f(int a, int b, int c, int d, int e, int g) { return a; } } \
                  int main() { return 0; }";
    let err = parse_source(source).unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
  }

  #[test]
  fn rejects_seven_arguments() {
    let source = "class A { int f(int a) { return a; } } \
                  int main() { A a; return a.f(1, 2, 3, 4, 5, 6); }";
    let err = parse_source(source).unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
    assert!(err.to_string().contains("call passes 7 arguments"));
  }

  #[test]
  fn rejects_wrong_argument_count_for_nested_function() {
    let source = "int main() { int f(int a) { return a; } return f(1, 2); }";
    let err = parse_source(source).unwrap_err();
    assert!(err.to_string().contains("expects 1 arguments, but 2 were given"));
  }

  #[test]
  fn rejects_invalid_assignment_target() {
    let err = parse_source("int main() { 1 = 2; return 0; }").unwrap_err();
    assert!(matches!(err, CompileError::Parse { .. }));
    assert!(err.to_string().contains("invalid assignment target"));
  }

  #[test]
  fn parse_error_shows_expected_and_found_with_window() {
    let err = parse_source("int main() { return 1 }").unwrap_err();
    let message = err.to_string();
    assert!(message.contains("expected \";\", but got Punctuator \"}\""));
    assert!(message.contains("[Punctuator] \"}\"  <-- current"));
  }
}
