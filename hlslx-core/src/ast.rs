//! Typed syntax tree.
//!
//! Every node lives in an arena owned by [`SyntaxTree`] and is addressed by a
//! small copyable id. Dropping the tree releases all nodes at once. Expression
//! nodes carry the type the parser resolved for them; generators read it and
//! never re-infer.

use crate::error::{CompilerError, Location, Result};
use crate::intrinsics::Intrinsic;
use crate::types::Type;

macro_rules! define_id {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u32);

            impl $name {
                pub fn index(self) -> usize {
                    self.0 as usize
                }
            }
        )*
    };
}

define_id!(
    /// Expression node in [`SyntaxTree::exprs`].
    ExprId,
    /// Statement node in [`SyntaxTree::stmts`].
    StmtId,
    StructId,
    BufferId,
    GlobalId,
    FunctionId,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamModifier {
    In,
    Out,
    InOut,
    Uniform,
}

impl ParamModifier {
    pub fn is_output(self) -> bool {
        matches!(self, ParamModifier::Out | ParamModifier::InOut)
    }
}

/// Where the storage behind a variable reference lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageClass {
    Local,
    Parameter(ParamModifier),
    Global(GlobalId),
    BufferField(BufferId, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

impl UnaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::BitNot => "~",
            UnaryOp::PreInc | UnaryOp::PostInc => "++",
            UnaryOp::PreDec | UnaryOp::PostDec => "--",
        }
    }

    pub fn is_postfix(self) -> bool {
        matches!(self, UnaryOp::PostInc | UnaryOp::PostDec)
    }

    pub fn mutates(self) -> bool {
        matches!(self, UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    LogicalAnd,
    LogicalOr,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Shl => "<<",
            BinaryOp::Shr => ">>",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::LogicalAnd | BinaryOp::LogicalOr)
    }

    pub fn is_bitwise(self) -> bool {
        matches!(
            self,
            BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
}

impl AssignOp {
    pub fn symbol(self) -> &'static str {
        match self {
            AssignOp::Assign => "=",
            AssignOp::Add => "+=",
            AssignOp::Sub => "-=",
            AssignOp::Mul => "*=",
            AssignOp::Div => "/=",
            AssignOp::Mod => "%=",
            AssignOp::Shl => "<<=",
            AssignOp::Shr => ">>=",
            AssignOp::BitAnd => "&=",
            AssignOp::BitOr => "|=",
            AssignOp::BitXor => "^=",
        }
    }

    /// The binary operator a compound assignment applies, if any.
    pub fn binary_op(self) -> Option<BinaryOp> {
        Some(match self {
            AssignOp::Assign => return None,
            AssignOp::Add => BinaryOp::Add,
            AssignOp::Sub => BinaryOp::Sub,
            AssignOp::Mul => BinaryOp::Mul,
            AssignOp::Div => BinaryOp::Div,
            AssignOp::Mod => BinaryOp::Mod,
            AssignOp::Shl => BinaryOp::Shl,
            AssignOp::Shr => BinaryOp::Shr,
            AssignOp::BitAnd => BinaryOp::BitAnd,
            AssignOp::BitOr => BinaryOp::BitOr,
            AssignOp::BitXor => BinaryOp::BitXor,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callee {
    Function(FunctionId),
    Intrinsic(Intrinsic),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Variable { name: String, storage: StorageClass },
    Unary { op: UnaryOp, operand: ExprId },
    Binary { op: BinaryOp, lhs: ExprId, rhs: ExprId },
    Conditional { cond: ExprId, then_expr: ExprId, else_expr: ExprId },
    Call { callee: Callee, args: Vec<ExprId> },
    /// `float3(a, b)`; the constructed type is the node's type.
    Constructor { args: Vec<ExprId> },
    /// Explicit `(T)e`; `(Struct)0` is a cast of a zero literal to a struct.
    Cast { operand: ExprId },
    /// Implicit conversion inserted by the parser.
    Conversion { operand: ExprId },
    Member { base: ExprId, name: String, field: u32 },
    /// Component indices, each in `0..4`.
    Swizzle { base: ExprId, components: Vec<u8> },
    Index { base: ExprId, index: ExprId },
    InitList { elements: Vec<ExprId> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub ty: Type,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalDecl {
    pub name: String,
    pub ty: Type,
    pub is_const: bool,
    pub is_static: bool,
    pub init: Option<ExprId>,
}

/// Statement attribute such as `[unroll(4)]`.
#[derive(Debug, Clone, PartialEq)]
pub struct StmtAttribute {
    pub name: String,
    pub argument: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Expr(ExprId),
    Declaration(Vec<LocalDecl>),
    Assign { op: AssignOp, target: ExprId, value: ExprId },
    If { cond: ExprId, then_branch: StmtId, else_branch: Option<StmtId> },
    /// `init` is a declaration, assignment or expression statement; `step`
    /// an assignment or expression statement.
    For { init: Option<StmtId>, cond: Option<ExprId>, step: Option<StmtId>, body: StmtId },
    While { cond: ExprId, body: StmtId },
    DoWhile { body: StmtId, cond: ExprId },
    Return(Option<ExprId>),
    Break,
    Continue,
    Discard,
    Block(Vec<StmtId>),
    Empty,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub attributes: Vec<StmtAttribute>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
    pub semantic: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<Field>,
    pub line: u32,
}

impl StructDecl {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

/// Explicit `register(b0)` style binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Register {
    pub class: char,
    pub slot: u32,
}

impl Register {
    /// Parse `b0`, `s3`, `c12`.
    pub fn parse(text: &str) -> Option<Register> {
        let mut chars = text.chars();
        let class = chars.next()?.to_ascii_lowercase();
        if !class.is_ascii_alphabetic() {
            return None;
        }
        let slot = chars.as_str().parse().ok()?;
        Some(Register { class, slot })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Constant,
    Texture,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BufferDecl {
    pub name: String,
    pub kind: BufferKind,
    pub register: Option<Register>,
    pub fields: Vec<Field>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalDecl {
    pub name: String,
    pub ty: Type,
    pub is_static: bool,
    pub is_const: bool,
    pub semantic: Option<String>,
    pub register: Option<Register>,
    pub init: Option<ExprId>,
    pub line: u32,
}

impl GlobalDecl {
    /// Non-static globals are uniforms supplied by the host.
    pub fn is_uniform(&self) -> bool {
        !self.is_static
    }

    /// A `static const` with an initializer folds into a file-scope constant.
    pub fn is_constant(&self) -> bool {
        self.is_static && self.is_const && self.init.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: Type,
    pub modifier: ParamModifier,
    pub semantic: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: Type,
    pub return_semantic: Option<String>,
    /// `None` for a prototype.
    pub body: Option<Vec<StmtId>>,
    pub line: u32,
}

impl FunctionDecl {
    pub fn is_definition(&self) -> bool {
        self.body.is_some()
    }
}

/// Top-level declaration in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Item {
    Struct(StructId),
    Buffer(BufferId),
    Global(GlobalId),
    Function(FunctionId),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntaxTree {
    pub file: String,
    pub exprs: Vec<Expr>,
    pub stmts: Vec<Stmt>,
    pub structs: Vec<StructDecl>,
    pub buffers: Vec<BufferDecl>,
    pub globals: Vec<GlobalDecl>,
    pub functions: Vec<FunctionDecl>,
    pub items: Vec<Item>,
}

impl SyntaxTree {
    pub fn new(file: impl Into<String>) -> Self {
        SyntaxTree {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        &self.exprs[id.index()]
    }

    pub fn stmt(&self, id: StmtId) -> &Stmt {
        &self.stmts[id.index()]
    }

    pub fn struct_decl(&self, id: StructId) -> &StructDecl {
        &self.structs[id.index()]
    }

    pub fn buffer(&self, id: BufferId) -> &BufferDecl {
        &self.buffers[id.index()]
    }

    pub fn global(&self, id: GlobalId) -> &GlobalDecl {
        &self.globals[id.index()]
    }

    pub fn function(&self, id: FunctionId) -> &FunctionDecl {
        &self.functions[id.index()]
    }

    pub fn add_expr(&mut self, kind: ExprKind, ty: Type, line: u32) -> ExprId {
        let id = ExprId(self.exprs.len() as u32);
        self.exprs.push(Expr { kind, ty, line });
        id
    }

    pub fn add_stmt(&mut self, kind: StmtKind, attributes: Vec<StmtAttribute>, line: u32) -> StmtId {
        let id = StmtId(self.stmts.len() as u32);
        self.stmts.push(Stmt { kind, attributes, line });
        id
    }

    pub fn add_struct(&mut self, decl: StructDecl) -> StructId {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(decl);
        self.items.push(Item::Struct(id));
        id
    }

    pub fn add_buffer(&mut self, decl: BufferDecl) -> BufferId {
        let id = BufferId(self.buffers.len() as u32);
        self.buffers.push(decl);
        self.items.push(Item::Buffer(id));
        id
    }

    pub fn add_global(&mut self, decl: GlobalDecl) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(decl);
        self.items.push(Item::Global(id));
        id
    }

    pub fn add_function(&mut self, decl: FunctionDecl) -> FunctionId {
        let id = FunctionId(self.functions.len() as u32);
        self.functions.push(decl);
        self.items.push(Item::Function(id));
        id
    }

    pub fn find_struct(&self, name: &str) -> Option<StructId> {
        self.structs.iter().position(|s| s.name == name).map(|i| StructId(i as u32))
    }

    pub fn functions_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = FunctionId> + 'a {
        self.functions
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.name == name)
            .map(|(i, _)| FunctionId(i as u32))
    }

    /// The unique function definition named `name`.
    pub fn find_entry(&self, name: &str) -> Result<FunctionId> {
        let definitions: Vec<FunctionId> =
            self.functions_named(name).filter(|id| self.function(*id).is_definition()).collect();
        match definitions.as_slice() {
            [id] => Ok(*id),
            [] => Err(CompilerError::SemanticError(
                format!("entry point '{}' not found", name),
                None,
            )),
            [_, second, ..] => Err(CompilerError::SemanticError(
                format!("entry point '{}' is defined more than once", name),
                Some(Location::new(self.file.clone(), self.function(*second).line)),
            )),
        }
    }

    /// HLSL spelling of a type, resolving struct names.
    pub fn type_name(&self, ty: &Type) -> String {
        ty.display_with(&|id: StructId| self.struct_decl(id).name.clone())
    }

    pub fn location(&self, line: u32) -> Location {
        Location::new(self.file.clone(), line)
    }

    /// Whether an expression designates assignable storage.
    pub fn is_lvalue(&self, id: ExprId) -> bool {
        match &self.expr(id).kind {
            ExprKind::Variable { .. } => true,
            ExprKind::Member { base, .. } | ExprKind::Index { base, .. } => self.is_lvalue(*base),
            ExprKind::Swizzle { base, components } => {
                let mut seen = [false; 4];
                let unique = components.iter().all(|&c| !std::mem::replace(&mut seen[c as usize], true));
                unique && self.is_lvalue(*base)
            }
            _ => false,
        }
    }

    /// Whether evaluating `id` can write state: calls and increments.
    pub fn has_side_effects(&self, id: ExprId) -> bool {
        let mut found = false;
        self.walk_expr(id, &mut |_, expr| {
            found |= match &expr.kind {
                ExprKind::Call { .. } => true,
                ExprKind::Unary { op, .. } => {
                    matches!(op, UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec)
                }
                _ => false,
            };
        });
        found
    }

    /// The variable an lvalue expression writes through.
    pub fn root_variable(&self, id: ExprId) -> Option<(&str, StorageClass)> {
        match &self.expr(id).kind {
            ExprKind::Variable { name, storage } => Some((name.as_str(), *storage)),
            ExprKind::Member { base, .. } | ExprKind::Index { base, .. } | ExprKind::Swizzle { base, .. } => {
                self.root_variable(*base)
            }
            _ => None,
        }
    }

    /// Direct sub-expressions of an expression, in evaluation order.
    pub fn expr_children(&self, id: ExprId) -> Vec<ExprId> {
        match &self.expr(id).kind {
            ExprKind::Literal(_) | ExprKind::Variable { .. } => Vec::new(),
            ExprKind::Unary { operand, .. }
            | ExprKind::Cast { operand }
            | ExprKind::Conversion { operand } => vec![*operand],
            ExprKind::Binary { lhs, rhs, .. } => vec![*lhs, *rhs],
            ExprKind::Conditional { cond, then_expr, else_expr } => vec![*cond, *then_expr, *else_expr],
            ExprKind::Call { args, .. } | ExprKind::Constructor { args } => args.clone(),
            ExprKind::Member { base, .. } | ExprKind::Swizzle { base, .. } => vec![*base],
            ExprKind::Index { base, index } => vec![*base, *index],
            ExprKind::InitList { elements } => elements.clone(),
        }
    }

    /// Direct expressions and sub-statements of a statement.
    pub fn stmt_children(&self, id: StmtId) -> (Vec<ExprId>, Vec<StmtId>) {
        match &self.stmt(id).kind {
            StmtKind::Expr(e) => (vec![*e], vec![]),
            StmtKind::Declaration(decls) => (decls.iter().filter_map(|d| d.init).collect(), vec![]),
            StmtKind::Assign { target, value, .. } => (vec![*target, *value], vec![]),
            StmtKind::If { cond, then_branch, else_branch } => {
                let mut stmts = vec![*then_branch];
                stmts.extend(else_branch.iter().copied());
                (vec![*cond], stmts)
            }
            StmtKind::For { init, cond, step, body } => {
                let mut stmts: Vec<StmtId> = init.iter().copied().collect();
                stmts.extend(step.iter().copied());
                stmts.push(*body);
                (cond.iter().copied().collect(), stmts)
            }
            StmtKind::While { cond, body } | StmtKind::DoWhile { body, cond } => (vec![*cond], vec![*body]),
            StmtKind::Return(value) => (value.iter().copied().collect(), vec![]),
            StmtKind::Block(stmts) => (vec![], stmts.clone()),
            StmtKind::Break | StmtKind::Continue | StmtKind::Discard | StmtKind::Empty => (vec![], vec![]),
        }
    }

    /// Visit every expression node under the given statements, parents first.
    pub fn walk_exprs<F: FnMut(ExprId, &Expr)>(&self, stmts: &[StmtId], f: &mut F) {
        for &stmt in stmts {
            let (exprs, children) = self.stmt_children(stmt);
            for expr in exprs {
                self.walk_expr(expr, f);
            }
            self.walk_exprs(&children, f);
        }
    }

    pub fn walk_expr<F: FnMut(ExprId, &Expr)>(&self, id: ExprId, f: &mut F) {
        f(id, self.expr(id));
        for child in self.expr_children(id) {
            self.walk_expr(child, f);
        }
    }

    /// Visit every statement under the given statements, parents first.
    pub fn walk_stmts<F: FnMut(StmtId, &Stmt)>(&self, stmts: &[StmtId], f: &mut F) {
        for &stmt in stmts {
            f(stmt, self.stmt(stmt));
            let (_, children) = self.stmt_children(stmt);
            self.walk_stmts(&children, f);
        }
    }
}
