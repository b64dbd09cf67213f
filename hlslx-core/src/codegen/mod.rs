//! Shared tree-walking emitter.
//!
//! Every generator drives an [`Emitter`] parameterized by a [`Dialect`]. The
//! emitter owns statement layout, operator precedence and implicit
//! conversions. The dialect supplies names, intrinsic mappings and the
//! handful of constructs each target spells differently.

pub mod bindings;
pub mod entry;
pub mod writer;

pub use writer::CodeWriter;

use crate::ast::{
    AssignOp, BinaryOp, Callee, ExprId, ExprKind, FunctionId, Literal, LocalDecl, ParamModifier, StmtAttribute,
    StmtId, StmtKind, StorageClass, StructId, SyntaxTree, UnaryOp,
};
use crate::error::{CompilerError, Result};
use crate::intrinsics::Intrinsic;
use crate::types::{SamplerDim, ScalarKind, Type};
use crate::{bail_semantic, Stage};
use std::borrow::Cow;

/// Binding strength of emitted text, C ordering. Higher binds tighter.
pub mod prec {
    pub const CONDITIONAL: u8 = 1;
    pub const LOGICAL_OR: u8 = 2;
    pub const LOGICAL_AND: u8 = 3;
    pub const BIT_OR: u8 = 4;
    pub const BIT_XOR: u8 = 5;
    pub const BIT_AND: u8 = 6;
    pub const EQUALITY: u8 = 7;
    pub const RELATIONAL: u8 = 8;
    pub const SHIFT: u8 = 9;
    pub const ADDITIVE: u8 = 10;
    pub const MULTIPLICATIVE: u8 = 11;
    pub const UNARY: u8 = 12;
    pub const POSTFIX: u8 = 13;
    pub const PRIMARY: u8 = 14;
}

pub fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::LogicalOr => prec::LOGICAL_OR,
        BinaryOp::LogicalAnd => prec::LOGICAL_AND,
        BinaryOp::BitOr => prec::BIT_OR,
        BinaryOp::BitXor => prec::BIT_XOR,
        BinaryOp::BitAnd => prec::BIT_AND,
        BinaryOp::Eq | BinaryOp::Ne => prec::EQUALITY,
        BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => prec::RELATIONAL,
        BinaryOp::Shl | BinaryOp::Shr => prec::SHIFT,
        BinaryOp::Add | BinaryOp::Sub => prec::ADDITIVE,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => prec::MULTIPLICATIVE,
    }
}

/// Target text of one expression together with its precedence.
#[derive(Debug, Clone, PartialEq)]
pub struct Emitted {
    pub text: String,
    pub prec: u8,
}

impl Emitted {
    pub fn new(text: impl Into<String>, prec: u8) -> Self {
        Emitted {
            text: text.into(),
            prec,
        }
    }

    pub fn primary(text: impl Into<String>) -> Self {
        Emitted::new(text, prec::PRIMARY)
    }

    /// `name(arg, arg)`
    pub fn call(name: &str, args: &[String]) -> Self {
        Emitted::new(format!("{}({})", name, args.join(", ")), prec::POSTFIX)
    }

    /// The text, parenthesized when it binds looser than `min`.
    pub fn wrap(&self, min: u8) -> String {
        if self.prec < min {
            format!("({})", self.text)
        } else {
            self.text.clone()
        }
    }

    /// `base.member`
    pub fn member(&self, member: &str) -> Emitted {
        Emitted::new(format!("{}.{}", self.wrap(prec::POSTFIX), member), prec::POSTFIX)
    }
}

/// Left-associative infix operator.
pub fn infix(lhs: &Emitted, op: &str, rhs: &Emitted, level: u8) -> Emitted {
    Emitted::new(format!("{} {} {}", lhs.wrap(level), op, rhs.wrap(level + 1)), level)
}

pub fn plain_binary(op: BinaryOp, lhs: &Emitted, rhs: &Emitted) -> Emitted {
    infix(lhs, op.symbol(), rhs, binary_precedence(op))
}

/// Float literal text that parses as a float in every target.
pub fn format_float(value: f64) -> String {
    if value.is_infinite() {
        return if value > 0.0 { "1e39".to_string() } else { "-1e39".to_string() };
    }
    format!("{:?}", value)
}

/// Swizzle letters for the first `count` components.
pub fn component_letters(components: &[u8]) -> String {
    components.iter().map(|&c| ['x', 'y', 'z', 'w'][usize::from(c & 3)]).collect()
}

/// Wrapper functions a dialect emits ahead of the translated code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Helper {
    /// HLSL `fmod`, which truncates toward zero.
    Fmod,
    Trunc,
    /// Texture fetch that packs its extra operand into `.w` of the coordinate.
    Texture(Intrinsic, ScalarKind),
}

impl Helper {
    pub fn name(self) -> String {
        match self {
            Helper::Fmod => "hlslx_fmod".to_string(),
            Helper::Trunc => "hlslx_trunc".to_string(),
            Helper::Texture(intrinsic, _) => format!("hlslx_{}", intrinsic.name()),
        }
    }
}

/// A resolved intrinsic call handed to the dialect.
#[derive(Debug, Clone)]
pub struct IntrinsicCall {
    pub intrinsic: Intrinsic,
    pub args: Vec<Emitted>,
    pub arg_types: Vec<Type>,
    /// Dialect name of the sampler variable, for texture fetches.
    pub sampler: Option<String>,
    pub ty: Type,
}

impl IntrinsicCall {
    pub fn unsupported(&self, dialect: &str) -> CompilerError {
        CompilerError::SemanticError(
            format!("intrinsic '{}' is not supported by {}", self.intrinsic.name(), dialect),
            None,
        )
    }

    /// The sampler variable, which split-sampler dialects require.
    pub fn sampler_name(&self) -> Result<&str> {
        match &self.sampler {
            Some(name) => Ok(name),
            None => bail_semantic!(
                "the sampler passed to '{}' must be a global or a parameter",
                self.intrinsic.name()
            ),
        }
    }

    /// Element kind of the sampled texture.
    pub fn texel_kind(&self) -> ScalarKind {
        match self.arg_types.first() {
            Some(Type::Sampler(_, kind)) => *kind,
            _ => ScalarKind::Float,
        }
    }
}

/// Per-target spelling used by the shared [`Emitter`].
pub trait Dialect {
    /// Target name used in diagnostics, such as `GLSL 1.40`.
    fn name(&self) -> String;

    fn scalar_name(&self, kind: ScalarKind) -> Result<&'static str>;
    fn vector_name(&self, kind: ScalarKind, n: u8) -> Result<String>;
    fn matrix_name(&self, kind: ScalarKind, rows: u8, cols: u8) -> Result<String>;
    fn sampler_type(&self, dim: SamplerDim, kind: ScalarKind) -> Result<String>;

    /// Source identifiers that collide with target keywords or built-ins.
    fn is_reserved(&self, name: &str) -> bool;

    fn identifier<'n>(&self, name: &'n str) -> Cow<'n, str> {
        if self.is_reserved(name) {
            Cow::Owned(format!("{}_", name))
        } else {
            Cow::Borrowed(name)
        }
    }

    fn variable(&self, tree: &SyntaxTree, name: &str, storage: StorageClass) -> String {
        let _ = (tree, storage);
        self.identifier(name).into_owned()
    }

    fn uint_literal(&self, value: u64) -> String {
        format!("{}u", value)
    }

    /// Explicit conversion of `operand` to the type spelled `type_text`.
    fn cast(&self, type_text: &str, operand: Emitted) -> Emitted {
        Emitted::call(type_text, &[operand.text])
    }

    /// `(S)0`; `None` builds a member-wise constructor instead.
    fn zero_struct(&self, type_text: &str) -> Option<Emitted> {
        let _ = type_text;
        None
    }

    fn init_list(&self, type_text: &str, ty: &Type, elements: Vec<String>) -> Result<Emitted>;

    fn binary(&mut self, op: BinaryOp, operands: [&Type; 2], ty: &Type, lhs: Emitted, rhs: Emitted) -> Result<Emitted> {
        let _ = (operands, ty);
        Ok(plain_binary(op, &lhs, &rhs))
    }

    /// `!v` on a bool vector.
    fn vector_not(&self, operand: Emitted) -> Result<Emitted> {
        Ok(Emitted::new(format!("!{}", operand.wrap(prec::UNARY)), prec::UNARY))
    }

    /// `c ? a : b` with a vector condition.
    fn select(&mut self, cond: Emitted, then_expr: Emitted, else_expr: Emitted) -> Result<Emitted>;

    fn intrinsic(&mut self, call: IntrinsicCall) -> Result<Emitted>;

    /// Statement text for `clip(x)`.
    fn clip(&mut self, ty: &Type, operand: Emitted) -> Result<String>;

    fn discard(&self) -> &'static str {
        "discard"
    }

    fn statement_attributes(&self, attributes: &[StmtAttribute]) -> Option<String> {
        let _ = attributes;
        None
    }

    /// Whether `const` survives on local declarations.
    fn const_locals(&self) -> bool {
        true
    }

    fn parameter(&self, modifier: ParamModifier, type_text: &str, name: &str, suffix: &str) -> String {
        let qualifier = match modifier {
            ParamModifier::Out => "out ",
            ParamModifier::InOut => "inout ",
            ParamModifier::In | ParamModifier::Uniform => "",
        };
        format!("{}{} {}{}", qualifier, type_text, name, suffix)
    }

    /// Whether samplers travel as a texture plus a sampler object.
    fn splits_samplers(&self) -> bool {
        false
    }

    fn sampler_parameters(&self, name: &str, dim: SamplerDim, kind: ScalarKind) -> Result<Vec<String>> {
        Ok(vec![format!("{} {}", self.sampler_type(dim, kind)?, name)])
    }

    fn sampler_arguments(&self, name: &str) -> Vec<String> {
        vec![name.to_string()]
    }

    fn parameter_semantic(&self, function: FunctionId, index: usize) -> Option<String> {
        let _ = (function, index);
        None
    }

    fn return_semantic(&self, function: FunctionId) -> Option<String> {
        let _ = function;
        None
    }

    fn field_semantic(&self, id: StructId, index: usize) -> Option<String> {
        let _ = (id, index);
        None
    }

    /// Whether `floatNxM(m)` truncates a larger matrix.
    fn truncates_matrix_by_cast(&self) -> bool {
        true
    }
}

/// Attach a location to errors raised without one.
pub fn locate(tree: &SyntaxTree, err: CompilerError, line: u32) -> CompilerError {
    match err {
        CompilerError::SemanticError(msg, None) => CompilerError::SemanticError(msg, Some(tree.location(line))),
        other => other,
    }
}

pub struct Emitter<'a, D> {
    pub tree: &'a SyntaxTree,
    pub stage: Stage,
    pub dialect: D,
    pub out: CodeWriter,
}

impl<'a, D: Dialect> Emitter<'a, D> {
    pub fn new(tree: &'a SyntaxTree, stage: Stage, dialect: D) -> Self {
        Emitter {
            tree,
            stage,
            dialect,
            out: CodeWriter::new(),
        }
    }

    // -- types ------------------------------------------------------------

    /// Name of a non-array type.
    pub fn type_name(&self, ty: &Type) -> Result<String> {
        match ty {
            Type::Void => Ok("void".to_string()),
            Type::Scalar(kind) => Ok(self.dialect.scalar_name(*kind)?.to_string()),
            Type::Vector(kind, n) => self.dialect.vector_name(*kind, *n),
            Type::Matrix(kind, rows, cols) => self.dialect.matrix_name(*kind, *rows, *cols),
            Type::Sampler(dim, kind) => self.dialect.sampler_type(*dim, *kind),
            Type::Struct(id) => Ok(self.dialect.identifier(&self.tree.struct_decl(*id).name).into_owned()),
            Type::Array(..) => {
                let (base, suffix) = self.split_type(ty)?;
                Ok(format!("{}{}", base, suffix))
            }
        }
    }

    /// Element type name and `[n]` suffixes, outermost first.
    pub fn split_type(&self, ty: &Type) -> Result<(String, String)> {
        let mut suffix = String::new();
        let mut current = ty;
        while let Type::Array(element, extent) = current {
            match extent {
                Some(n) => suffix.push_str(&format!("[{}]", n)),
                None => suffix.push_str("[]"),
            }
            current = element;
        }
        Ok((self.type_name(current)?, suffix))
    }

    /// `type name[n]`
    pub fn declarator(&self, ty: &Type, name: &str) -> Result<String> {
        let (base, suffix) = self.split_type(ty)?;
        Ok(format!("{} {}{}", base, name, suffix))
    }

    /// Zero value of a type, spelled with constructors.
    pub fn zero_value(&self, ty: &Type) -> Result<String> {
        match ty {
            Type::Scalar(kind) => Ok(match kind {
                ScalarKind::Bool => "false".to_string(),
                ScalarKind::Int => "0".to_string(),
                ScalarKind::Uint => self.dialect.uint_literal(0),
                ScalarKind::Half | ScalarKind::Float => "0.0".to_string(),
            }),
            Type::Vector(kind, _) | Type::Matrix(kind, ..) => {
                let zero = self.zero_value(&Type::Scalar(*kind))?;
                Ok(self.dialect.cast(&self.type_name(ty)?, Emitted::primary(zero)).text)
            }
            Type::Struct(id) => {
                let name = self.type_name(ty)?;
                if let Some(zero) = self.dialect.zero_struct(&name) {
                    return Ok(zero.text);
                }
                let fields = &self.tree.struct_decl(*id).fields;
                let values = fields.iter().map(|f| self.zero_value(&f.ty)).collect::<Result<Vec<_>>>()?;
                Ok(Emitted::call(&name, &values).text)
            }
            Type::Array(element, Some(n)) => {
                let value = self.zero_value(element)?;
                let values = vec![value; *n as usize];
                Ok(self.dialect.init_list(&self.type_name(ty)?, ty, values)?.text)
            }
            _ => bail_semantic!("type '{}' has no zero value", self.tree.type_name(ty)),
        }
    }

    // -- conversions ------------------------------------------------------

    /// Convert `value` from `from` to `to` with the target's constructors.
    pub fn convert(&self, from: &Type, to: &Type, value: Emitted) -> Result<Emitted> {
        if from == to {
            return Ok(value);
        }
        let kind_changes = from.scalar_kind() != to.scalar_kind();
        match (from, to) {
            (Type::Array(..), Type::Array(..)) => Ok(value),
            (_, Type::Scalar(kind)) => {
                let first = match from {
                    Type::Vector(..) => value.member("x"),
                    Type::Matrix(..) => Emitted::new(format!("{}[0][0]", value.wrap(prec::POSTFIX)), prec::POSTFIX),
                    _ => value,
                };
                if kind_changes {
                    Ok(self.dialect.cast(self.dialect.scalar_name(*kind)?, first))
                } else {
                    Ok(first)
                }
            }
            (Type::Scalar(_), Type::Matrix(kind, rows, cols)) => {
                let row = self.dialect.cast(&self.dialect.vector_name(*kind, *cols)?, value);
                let rows = vec![row.text; usize::from(*rows)];
                Ok(Emitted::call(&self.type_name(to)?, &rows))
            }
            (Type::Vector(_, n), Type::Vector(_, m)) if m < n => {
                let letters = component_letters(&(0..*m).collect::<Vec<u8>>());
                let truncated = value.member(&letters);
                if kind_changes {
                    Ok(self.dialect.cast(&self.type_name(to)?, truncated))
                } else {
                    Ok(truncated)
                }
            }
            (Type::Matrix(_, r, c), Type::Matrix(_, rows, cols))
                if (r, c) != (rows, cols) && !self.dialect.truncates_matrix_by_cast() =>
            {
                let letters = component_letters(&(0..*cols).collect::<Vec<u8>>());
                let base = value.wrap(prec::POSTFIX);
                let row_type = self.type_name(&Type::Vector(to.scalar_kind().unwrap_or(ScalarKind::Float), *cols))?;
                let rows = (0..*rows)
                    .map(|i| {
                        let row = Emitted::new(format!("{}[{}].{}", base, i, letters), prec::POSTFIX);
                        if kind_changes {
                            self.dialect.cast(&row_type, row).text
                        } else {
                            row.text
                        }
                    })
                    .collect::<Vec<_>>();
                Ok(Emitted::call(&self.type_name(to)?, &rows))
            }
            _ => Ok(self.dialect.cast(&self.type_name(to)?, value)),
        }
    }

    // -- expressions ------------------------------------------------------

    pub fn expr(&mut self, id: ExprId) -> Result<Emitted> {
        let line = self.tree.expr(id).line;
        self.expr_inner(id).map_err(|err| locate(self.tree, err, line))
    }

    pub fn expr_text(&mut self, id: ExprId) -> Result<String> {
        Ok(self.expr(id)?.text)
    }

    fn expr_inner(&mut self, id: ExprId) -> Result<Emitted> {
        let tree = self.tree;
        let expr = tree.expr(id);
        let ty = &expr.ty;
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(self.literal(literal)),
            ExprKind::Variable { name, storage } => {
                if ty.base_element().is_sampler() && self.dialect.splits_samplers() {
                    bail_semantic!(
                        "sampler '{}' can only be passed to texture functions and user functions on {}",
                        name,
                        self.dialect.name()
                    );
                }
                Ok(Emitted::primary(self.dialect.variable(tree, name, *storage)))
            }
            ExprKind::Unary { op, operand } => {
                let inner = self.expr(*operand)?;
                if *op == UnaryOp::Not && !tree.expr(*operand).ty.is_scalar() {
                    return self.dialect.vector_not(inner);
                }
                if op.is_postfix() {
                    return Ok(Emitted::new(format!("{}{}", inner.wrap(prec::POSTFIX), op.symbol()), prec::POSTFIX));
                }
                let operand = inner.wrap(prec::UNARY);
                let symbol = op.symbol();
                let glued = operand.starts_with(|c| c == '-' || c == '+') && matches!(op, UnaryOp::Neg | UnaryOp::Plus);
                let text = if glued {
                    format!("{} {}", symbol, operand)
                } else {
                    format!("{}{}", symbol, operand)
                };
                Ok(Emitted::new(text, prec::UNARY))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.expr(*lhs)?;
                let r = self.expr(*rhs)?;
                let operands = [&tree.expr(*lhs).ty, &tree.expr(*rhs).ty];
                self.dialect.binary(*op, operands, ty, l, r)
            }
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            } => {
                let c = self.expr(*cond)?;
                let t = self.expr(*then_expr)?;
                let e = self.expr(*else_expr)?;
                if !tree.expr(*cond).ty.is_scalar() {
                    return self.dialect.select(c, t, e);
                }
                Ok(Emitted::new(
                    format!(
                        "{} ? {} : {}",
                        c.wrap(prec::LOGICAL_OR),
                        t.wrap(prec::CONDITIONAL),
                        e.wrap(prec::CONDITIONAL)
                    ),
                    prec::CONDITIONAL,
                ))
            }
            ExprKind::Call { callee, args } => match callee {
                Callee::Function(function) => self.user_call(*function, args),
                Callee::Intrinsic(intrinsic) => self.intrinsic_call(*intrinsic, args, ty),
            },
            ExprKind::Constructor { args } => {
                let texts = args.iter().map(|a| self.expr_text(*a)).collect::<Result<Vec<_>>>()?;
                Ok(Emitted::call(&self.type_name(ty)?, &texts))
            }
            ExprKind::Cast { operand } | ExprKind::Conversion { operand } => {
                if let Type::Struct(_) = ty {
                    return Ok(Emitted::new(self.zero_value(ty)?, prec::POSTFIX));
                }
                let from = tree.expr(*operand).ty.clone();
                let value = self.expr(*operand)?;
                self.convert(&from, ty, value)
            }
            ExprKind::Member { base, name, .. } => {
                let base = self.expr(*base)?;
                Ok(base.member(&self.dialect.identifier(name)))
            }
            ExprKind::Swizzle { base, components } => {
                let base_ty = tree.expr(*base).ty.clone();
                let value = self.expr(*base)?;
                if base_ty.is_scalar() {
                    // Every component of a scalar swizzle is the scalar itself.
                    return self.convert(&base_ty, ty, value);
                }
                Ok(value.member(&component_letters(components)))
            }
            ExprKind::Index { base, index } => {
                let base = self.expr(*base)?;
                let index = self.expr_text(*index)?;
                Ok(Emitted::new(format!("{}[{}]", base.wrap(prec::POSTFIX), index), prec::POSTFIX))
            }
            ExprKind::InitList { elements } => {
                let texts = elements.iter().map(|e| self.expr_text(*e)).collect::<Result<Vec<_>>>()?;
                let type_text = self.type_name(ty)?;
                self.dialect.init_list(&type_text, ty, texts)
            }
        }
    }

    fn literal(&self, literal: &Literal) -> Emitted {
        let text = match literal {
            Literal::Bool(b) => b.to_string(),
            Literal::Int(n) => n.to_string(),
            Literal::Uint(n) => self.dialect.uint_literal(*n),
            Literal::Float(v) => format_float(*v),
        };
        if text.starts_with('-') {
            Emitted::new(text, prec::UNARY)
        } else {
            Emitted::primary(text)
        }
    }

    /// Sampler variable named by an argument, mapped through the dialect.
    fn sampler_variable(&self, arg: ExprId) -> Option<String> {
        match &self.tree.expr(arg).kind {
            ExprKind::Variable { name, .. } => Some(self.dialect.identifier(name).into_owned()),
            _ => None,
        }
    }

    fn user_call(&mut self, function: FunctionId, args: &[ExprId]) -> Result<Emitted> {
        let name = self.dialect.identifier(&self.tree.function(function).name).into_owned();
        let mut texts = Vec::with_capacity(args.len());
        for &arg in args {
            if self.tree.expr(arg).ty.is_sampler() && self.dialect.splits_samplers() {
                let Some(sampler) = self.sampler_variable(arg) else {
                    bail_semantic!("sampler arguments to '{}' must be globals or parameters", name);
                };
                texts.extend(self.dialect.sampler_arguments(&sampler));
            } else {
                texts.push(self.expr_text(arg)?);
            }
        }
        Ok(Emitted::call(&name, &texts))
    }

    fn intrinsic_call(&mut self, intrinsic: Intrinsic, args: &[ExprId], ty: &Type) -> Result<Emitted> {
        if intrinsic == Intrinsic::Clip {
            bail_semantic!("'clip' can only be used as a statement");
        }
        if self.stage == Stage::Vertex && intrinsic.is_fragment_only() {
            bail_semantic!("'{}' is only available in fragment shaders", intrinsic.name());
        }

        let mut call = IntrinsicCall {
            intrinsic,
            args: Vec::with_capacity(args.len()),
            arg_types: args.iter().map(|a| self.tree.expr(*a).ty.clone()).collect(),
            sampler: None,
            ty: ty.clone(),
        };
        for (i, &arg) in args.iter().enumerate() {
            if i == 0 && intrinsic.is_texture() {
                call.sampler = self.sampler_variable(arg);
                if self.dialect.splits_samplers() {
                    call.args.push(Emitted::primary(call.sampler.clone().unwrap_or_default()));
                    continue;
                }
            }
            call.args.push(self.expr(arg)?);
        }
        self.dialect.intrinsic(call)
    }

    // -- statements -------------------------------------------------------

    pub fn stmt(&mut self, id: StmtId) -> Result<()> {
        let line = self.tree.stmt(id).line;
        self.stmt_inner(id).map_err(|err| locate(self.tree, err, line))
    }

    fn stmt_inner(&mut self, id: StmtId) -> Result<()> {
        let tree = self.tree;
        let stmt = tree.stmt(id);
        if !stmt.attributes.is_empty() {
            if let Some(text) = self.dialect.statement_attributes(&stmt.attributes) {
                self.out.line(text);
            }
        }
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                if let ExprKind::Call {
                    callee: Callee::Intrinsic(Intrinsic::Clip),
                    args,
                } = &tree.expr(*expr).kind
                {
                    if self.stage == Stage::Vertex {
                        bail_semantic!("'clip' is only available in fragment shaders");
                    }
                    let arg = args.first().copied().ok_or_else(|| {
                        CompilerError::SemanticError("'clip' takes one argument".to_string(), None)
                    })?;
                    let arg_ty = tree.expr(arg).ty.clone();
                    let value = self.expr(arg)?;
                    let text = self.dialect.clip(&arg_ty, value)?;
                    self.out.line(text);
                } else {
                    let text = self.expr_text(*expr)?;
                    self.out.line(format!("{};", text));
                }
            }
            StmtKind::Declaration(_) | StmtKind::Assign { .. } => {
                let text = self.simple_stmt(id)?;
                self.out.line(format!("{};", text));
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.if_chain(*cond, *then_branch, *else_branch)?,
            StmtKind::For {
                init,
                cond,
                step,
                body,
            } => {
                let init = match init {
                    Some(s) => self.simple_stmt(*s)?,
                    None => String::new(),
                };
                let cond = match cond {
                    Some(c) => format!(" {}", self.expr_text(*c)?),
                    None => String::new(),
                };
                let step = match step {
                    Some(s) => format!(" {}", self.simple_stmt(*s)?),
                    None => String::new(),
                };
                self.out.open(format!("for ({};{};{})", init, cond, step));
                self.body(*body)?;
                self.out.close("");
            }
            StmtKind::While { cond, body } => {
                let cond = self.expr_text(*cond)?;
                self.out.open(format!("while ({})", cond));
                self.body(*body)?;
                self.out.close("");
            }
            StmtKind::DoWhile { body, cond } => {
                self.out.open("do");
                self.body(*body)?;
                let cond = self.expr_text(*cond)?;
                self.out.close(&format!(" while ({});", cond));
            }
            StmtKind::Return(value) => match value {
                Some(value) => {
                    let text = self.expr_text(*value)?;
                    self.out.line(format!("return {};", text));
                }
                None => self.out.line("return;"),
            },
            StmtKind::Break => self.out.line("break;"),
            StmtKind::Continue => self.out.line("continue;"),
            StmtKind::Discard => {
                if self.stage == Stage::Vertex {
                    bail_semantic!("'discard' is only available in fragment shaders");
                }
                self.out.line(format!("{};", self.dialect.discard()));
            }
            StmtKind::Block(stmts) => {
                self.out.open("");
                for s in stmts {
                    self.stmt(*s)?;
                }
                self.out.close("");
            }
            StmtKind::Empty => {}
        }
        Ok(())
    }

    /// Contents of a loop or branch body; the caller writes the braces.
    fn body(&mut self, id: StmtId) -> Result<()> {
        let tree = self.tree;
        match &tree.stmt(id).kind {
            StmtKind::Block(stmts) if tree.stmt(id).attributes.is_empty() => {
                for s in stmts {
                    self.stmt(*s)?;
                }
                Ok(())
            }
            _ => self.stmt(id),
        }
    }

    fn if_chain(&mut self, cond: ExprId, then_branch: StmtId, else_branch: Option<StmtId>) -> Result<()> {
        let cond = self.expr_text(cond)?;
        self.out.open(format!("if ({})", cond));
        self.body(then_branch)?;
        let tree = self.tree;
        let mut next = else_branch;
        while let Some(branch) = next {
            let stmt = tree.stmt(branch);
            match &stmt.kind {
                StmtKind::If {
                    cond,
                    then_branch,
                    else_branch,
                } if stmt.attributes.is_empty() => {
                    let cond = self.expr_text(*cond)?;
                    self.out.dedent();
                    self.out.line(format!("}} else if ({}) {{", cond));
                    self.out.indent();
                    self.body(*then_branch)?;
                    next = *else_branch;
                }
                _ => {
                    self.out.dedent();
                    self.out.line("} else {");
                    self.out.indent();
                    self.body(branch)?;
                    next = None;
                }
            }
        }
        self.out.close("");
        Ok(())
    }

    /// Declaration, assignment or expression statement without the `;`, as
    /// it appears in `for` headers.
    fn simple_stmt(&mut self, id: StmtId) -> Result<String> {
        let tree = self.tree;
        match &tree.stmt(id).kind {
            StmtKind::Declaration(decls) => self.declaration(decls),
            StmtKind::Assign { op, target, value } => self.assignment(*op, *target, *value),
            StmtKind::Expr(expr) => self.expr_text(*expr),
            _ => bail_semantic!("unsupported statement in a 'for' header"),
        }
    }

    fn declaration(&mut self, decls: &[LocalDecl]) -> Result<String> {
        let mut parts = Vec::with_capacity(decls.len());
        let mut base_type = String::new();
        for decl in decls {
            let ty = match (&decl.ty, decl.init) {
                (Type::Array(_, None), Some(init)) => self.tree.expr(init).ty.clone(),
                (ty, _) => ty.clone(),
            };
            let (base, suffix) = self.split_type(&ty)?;
            if !parts.is_empty() && base != base_type {
                bail_semantic!("declarations of different types in one statement are not supported");
            }
            base_type = base;
            let name = self.dialect.identifier(&decl.name).into_owned();
            let part = match decl.init {
                Some(init) => format!("{}{} = {}", name, suffix, self.expr_text(init)?),
                None => format!("{}{}", name, suffix),
            };
            parts.push(part);
        }
        let constant = decls.iter().all(|d| d.is_const) && self.dialect.const_locals();
        let qualifier = if constant { "const " } else { "" };
        Ok(format!("{}{} {}", qualifier, base_type, parts.join(", ")))
    }

    fn assignment(&mut self, op: AssignOp, target: ExprId, value: ExprId) -> Result<String> {
        let lhs = self.expr(target)?;
        let rhs = self.expr(value)?;
        let Some(binary) = op.binary_op() else {
            return Ok(format!("{} = {}", lhs.text, rhs.text));
        };

        // Compound forms stay compound only when the dialect spells the
        // operator as the plain infix symbol.
        let tree = self.tree;
        let target_ty = tree.expr(target).ty.clone();
        let operands = [&target_ty, &tree.expr(value).ty];
        let plain = plain_binary(binary, &lhs, &rhs);
        let mapped = self.dialect.binary(binary, operands, &target_ty, lhs.clone(), rhs.clone())?;
        if mapped == plain {
            Ok(format!("{} {} {}", lhs.text, op.symbol(), rhs.text))
        } else if tree.has_side_effects(target) {
            bail_semantic!(
                "operator '{}' must be expanded for this target and its target must not have side effects",
                op.symbol()
            )
        } else {
            Ok(format!("{} = {}", lhs.text, mapped.text))
        }
    }

    // -- declarations -----------------------------------------------------

    pub fn struct_decl(&mut self, id: StructId) -> Result<()> {
        let tree = self.tree;
        let decl = tree.struct_decl(id);
        self.out.open(format!("struct {}", self.dialect.identifier(&decl.name)));
        for (index, field) in decl.fields.iter().enumerate() {
            let declarator = self.declarator(&field.ty, &self.dialect.identifier(&field.name))?;
            let semantic = self
                .dialect
                .field_semantic(id, index)
                .map(|s| format!(" : {}", s))
                .unwrap_or_default();
            self.out.line(format!("{}{};", declarator, semantic));
        }
        self.out.close(";");
        self.out.blank();
        Ok(())
    }

    pub fn signature(&self, id: FunctionId) -> Result<String> {
        let decl = self.tree.function(id);
        let mut params = Vec::with_capacity(decl.params.len());
        for (index, param) in decl.params.iter().enumerate() {
            let name = self.dialect.identifier(&param.name);
            if let Type::Sampler(dim, kind) = &param.ty {
                params.extend(self.dialect.sampler_parameters(&name, *dim, *kind)?);
                continue;
            }
            let (base, suffix) = self.split_type(&param.ty)?;
            let mut text = self.dialect.parameter(param.modifier, &base, &name, &suffix);
            if let Some(semantic) = self.dialect.parameter_semantic(id, index) {
                text.push_str(&format!(" : {}", semantic));
            }
            params.push(text);
        }
        let semantic = self
            .dialect
            .return_semantic(id)
            .map(|s| format!(" : {}", s))
            .unwrap_or_default();
        Ok(format!(
            "{} {}({}){}",
            self.type_name(&decl.return_type)?,
            self.dialect.identifier(&decl.name),
            params.join(", "),
            semantic
        ))
    }

    pub fn function(&mut self, id: FunctionId) -> Result<()> {
        let tree = self.tree;
        let decl = tree.function(id);
        let signature = self.signature(id).map_err(|err| locate(self.tree, err, decl.line))?;
        self.out.open(signature);
        for stmt in decl.body.as_deref().unwrap_or(&[]) {
            self.stmt(*stmt)?;
        }
        self.out.close("");
        self.out.blank();
        Ok(())
    }

    /// Access path of an entry varying, with field names mapped.
    pub fn varying_access(&self, root: &str, fields: &[String]) -> String {
        let mut path = root.to_string();
        for field in fields {
            path.push('.');
            path.push_str(&self.dialect.identifier(field));
        }
        path
    }

    /// Take the text written so far, leaving the writer empty.
    pub fn take_output(&mut self) -> CodeWriter {
        std::mem::take(&mut self.out)
    }
}
