//! Syntax tree produced by the parser.
//!
//! Declarations, routines and blocks live in arenas owned by [`Program`] and
//! refer to each other through small index handles. That keeps the tree
//! free of reference cycles while still letting a block know its enclosing
//! block, and a variable know the scope that declared it. Expressions and
//! statements are plain owned enums.
//!
//! The only mutation after parsing is the resolver filling in
//! [`VarDecl::class`].

use indexmap::IndexMap;

macro_rules! handle {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    pub struct $name(pub usize);
  };
}

handle!(
  /// Index into [`Program::classes`].
  ClassId
);
handle!(
  /// Index into [`Program::functions`].
  FuncId
);
handle!(
  /// Index into [`Program::blocks`].
  BlockId
);
handle!(
  /// Index into [`Program::vars`].
  VarId
);

/// Name of the primitive integer type.
pub const INT: &str = "int";
/// Name of the "no value" return type.
pub const VOID: &str = "void";
/// Parameters (receiver included) that fit in argument registers.
pub const MAX_ARGS: usize = 6;

#[derive(Debug, Default)]
pub struct Program {
  /// Class registry in declaration order.
  pub classes: IndexMap<String, ClassDef>,
  pub functions: Vec<FuncDef>,
  pub blocks: Vec<Block>,
  /// Every field, parameter and local of the program.
  pub vars: Vec<VarDecl>,
  pub entry: Option<FuncId>,
}

impl Program {
  pub fn class(&self, id: ClassId) -> &ClassDef {
    &self.classes[id.0]
  }

  pub fn class_id(&self, name: &str) -> Option<ClassId> {
    self.classes.get_index_of(name).map(ClassId)
  }

  pub fn func(&self, id: FuncId) -> &FuncDef {
    &self.functions[id.0]
  }

  pub fn block(&self, id: BlockId) -> &Block {
    &self.blocks[id.0]
  }

  pub fn var(&self, id: VarId) -> &VarDecl {
    &self.vars[id.0]
  }

  /// Handles of every routine in emission order.
  pub fn func_ids(&self) -> impl Iterator<Item = FuncId> + '_ {
    (0..self.functions.len()).map(FuncId)
  }

  /// Class a routine returns, when its declared return type names one.
  pub fn return_class(&self, func: FuncId) -> Option<ClassId> {
    self.class_id(&self.func(func).return_type)
  }
}

#[derive(Debug)]
pub struct ClassDef {
  pub name: String,
  /// Declaration order is the memory layout order.
  pub fields: IndexMap<String, VarId>,
  pub methods: IndexMap<String, FuncId>,
  pub loc: usize,
}

#[derive(Debug)]
pub struct FuncDef {
  /// Name as written in the source.
  pub name: String,
  /// Assembly symbol: `main`, `Class_method`, or `outer.inner` for nested functions.
  pub label: String,
  /// Parameters in register order; methods start with the `this` receiver.
  pub params: IndexMap<String, VarId>,
  pub return_type: String,
  pub body: BlockId,
  /// Owning class for methods.
  pub class: Option<ClassId>,
  pub loc: usize,
}

impl FuncDef {
  pub fn returns_value(&self) -> bool {
    self.return_type != VOID
  }
}

/// What a block is the body of.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOwner {
  Function(FuncId),
  Nested,
  Then,
  Else,
  Loop,
}

#[derive(Debug)]
pub struct Block {
  pub stmts: Vec<Stmt>,
  pub locals: IndexMap<String, VarId>,
  /// Nested functions declared directly in this block.
  pub functions: IndexMap<String, FuncId>,
  /// Lexically enclosing block; `None` only for a top-level routine body.
  pub parent: Option<BlockId>,
  pub owner: BlockOwner,
}

impl Block {
  pub fn new(parent: Option<BlockId>, owner: BlockOwner) -> Self {
    Self {
      stmts: Vec::new(),
      locals: IndexMap::new(),
      functions: IndexMap::new(),
      parent,
      owner,
    }
  }
}

/// The scope a variable was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
  Field(ClassId),
  Param(FuncId),
  Local(BlockId),
}

#[derive(Debug)]
pub struct VarDecl {
  pub name: String,
  pub type_name: String,
  pub init: Option<Expr>,
  pub kind: VarKind,
  /// Resolved class of `type_name`; `None` means `int`.
  pub class: Option<ClassId>,
  pub loc: usize,
}

impl VarDecl {
  /// True when the declaration stores a whole class instance inline rather
  /// than an integer or a reference. Parameters are always references; an
  /// initializer (`= null` for fields) also turns the slot into a reference.
  pub fn embeds_instance(&self) -> bool {
    self.class.is_some() && self.init.is_none() && !matches!(self.kind, VarKind::Param(_))
  }

  pub fn is_null_initialized(&self) -> bool {
    matches!(self.init, Some(Expr::Null { .. }))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
  Add,
  Sub,
  Mul,
  Div,
  Rem,
  Eq,
  Ne,
  Lt,
  Le,
  Gt,
  Ge,
  And,
  Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
  Neg,
  Not,
}

/// Routine targeted by a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
  /// A nested function, resolved while parsing.
  Function(FuncId),
  /// A method looked up on the class of the first argument (the receiver).
  Method(String),
}

/// Expression tree produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
  Num {
    value: i64,
  },
  Null {
    loc: usize,
  },
  Ident {
    var: VarId,
    loc: usize,
  },
  Unary {
    op: UnaryOp,
    operand: Box<Expr>,
  },
  Binary {
    op: BinaryOp,
    lhs: Box<Expr>,
    rhs: Box<Expr>,
  },
  FieldAccess {
    target: Box<Expr>,
    field: String,
    loc: usize,
  },
  Call {
    callee: Callee,
    args: Vec<Expr>,
    loc: usize,
  },
  Assign {
    target: Box<Expr>,
    value: Box<Expr>,
    loc: usize,
  },
}

impl Expr {
  pub fn number(value: i64) -> Self {
    Self::Num { value }
  }

  pub fn unary(op: UnaryOp, operand: Expr) -> Self {
    Self::Unary {
      op,
      operand: Box::new(operand),
    }
  }

  pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
    Self::Binary {
      op,
      lhs: Box::new(lhs),
      rhs: Box::new(rhs),
    }
  }

  pub fn field(target: Expr, field: impl Into<String>, loc: usize) -> Self {
    Self::FieldAccess {
      target: Box::new(target),
      field: field.into(),
      loc,
    }
  }

  pub fn assign(target: Expr, value: Expr, loc: usize) -> Self {
    Self::Assign {
      target: Box::new(target),
      value: Box::new(value),
      loc,
    }
  }

  pub fn is_lvalue(&self) -> bool {
    matches!(self, Self::Ident { .. } | Self::FieldAccess { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stmt {
  VarDecl(VarId),
  Expr(Expr),
  Return {
    value: Option<Expr>,
    loc: usize,
  },
  /// `else if` chains nest as an else-block holding a single `If`.
  If {
    cond: Expr,
    then: BlockId,
    otherwise: Option<BlockId>,
  },
  While {
    cond: Expr,
    body: BlockId,
  },
  Block(BlockId),
  /// Declaration point of a nested function; its code is emitted separately.
  FuncDef(FuncId),
}
