use super::{Parser, describe};
use crate::ast::*;
use crate::error::Result;
use crate::intrinsics::Intrinsic;
use crate::lexer::TokenKind;
use crate::types::{ScalarKind, Type, combine_operands, conversion_rank, is_convertible, operand_target};
use crate::{bail_semantic_at, bail_syntax_at};
use log::trace;

/// Component indices selected by a swizzle such as `xyz` or `bgra`.
///
/// Letters must all come from one set (`xyzw` or `rgba`), there may be at
/// most four of them, and each must address a component below `arity`.
pub fn swizzle_components(name: &str, arity: u8) -> std::result::Result<Vec<u8>, String> {
    if name.is_empty() || name.len() > 4 {
        return Err(format!("invalid swizzle '{}'", name));
    }
    let position = |set: &str| -> Option<Vec<u8>> {
        name.chars().map(|c| set.find(c).map(|i| i as u8)).collect()
    };
    let components = match position("xyzw").or_else(|| position("rgba")) {
        Some(components) => components,
        None => return Err(format!("invalid swizzle '{}'", name)),
    };
    if let Some(c) = components.iter().find(|c| **c >= arity) {
        return Err(format!(
            "swizzle '{}' selects component {} of a {}-component value",
            name,
            c + 1,
            arity
        ));
    }
    Ok(components)
}

/// `(row, column)` pairs of a matrix member such as `_m01`, `_12` or `_m00_m11`.
/// `_mRC` is zero-based, `_RC` is one-based.
pub fn matrix_elements(name: &str, rows: u8, cols: u8) -> Option<Vec<(u8, u8)>> {
    let rest = name.strip_prefix('_')?;
    let mut elements = Vec::new();
    for part in rest.split('_') {
        let (zero_based, digits) = match part.strip_prefix('m') {
            Some(digits) => (true, digits),
            None => (false, part),
        };
        let bytes = digits.as_bytes();
        if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_digit) {
            return None;
        }
        let offset = if zero_based { 0 } else { 1 };
        let row = (bytes[0] - b'0').checked_sub(offset)?;
        let col = (bytes[1] - b'0').checked_sub(offset)?;
        if row >= rows || col >= cols {
            return None;
        }
        elements.push((row, col));
    }
    (!elements.is_empty() && elements.len() <= 4).then_some(elements)
}

fn convert_literal(literal: &Literal, kind: ScalarKind) -> Literal {
    let as_f64 = match literal {
        Literal::Bool(b) => f64::from(u8::from(*b)),
        Literal::Int(n) => *n as f64,
        Literal::Uint(n) => *n as f64,
        Literal::Float(v) => *v,
    };
    match kind {
        ScalarKind::Bool => Literal::Bool(as_f64 != 0.0),
        ScalarKind::Int => match literal {
            Literal::Int(n) => Literal::Int(*n),
            Literal::Uint(n) => Literal::Int(*n as i64),
            _ => Literal::Int(as_f64 as i64),
        },
        ScalarKind::Uint => match literal {
            Literal::Uint(n) => Literal::Uint(*n),
            Literal::Int(n) => Literal::Uint(*n as u64),
            _ => Literal::Uint(as_f64 as u64),
        },
        ScalarKind::Half | ScalarKind::Float => Literal::Float(as_f64),
    }
}

/// Candidate signature during overload resolution.
struct Candidate {
    callee: Callee,
    params: Vec<(Type, ParamModifier)>,
    ret: Type,
}

impl<'a> Parser<'a> {
    fn ty(&self, id: ExprId) -> Type {
        self.tree.expr(id).ty.clone()
    }

    fn type_name(&self, ty: &Type) -> String {
        self.tree.type_name(ty)
    }

    pub(super) fn parse_expression(&mut self) -> Result<ExprId> {
        trace!("parse_expression: next token = {:?}", self.peek());
        self.parse_conditional()
    }

    fn parse_conditional(&mut self) -> Result<ExprId> {
        let cond = self.parse_binary(0)?;
        if !self.check(&TokenKind::Question) {
            return Ok(cond);
        }
        let line = self.line();
        self.advance();
        let then_expr = self.parse_expression()?;
        self.expect(&TokenKind::Colon, "':'")?;
        let else_expr = self.parse_conditional()?;
        self.make_conditional(cond, then_expr, else_expr, line)
    }

    fn binary_operator(kind: &TokenKind) -> Option<(i32, BinaryOp)> {
        // Higher precedence binds tighter; all binary operators are left-associative.
        let entry = match kind {
            TokenKind::PipePipe => (1, BinaryOp::LogicalOr),
            TokenKind::AmpAmp => (2, BinaryOp::LogicalAnd),
            TokenKind::Pipe => (3, BinaryOp::BitOr),
            TokenKind::Caret => (4, BinaryOp::BitXor),
            TokenKind::Amp => (5, BinaryOp::BitAnd),
            TokenKind::EqEq => (6, BinaryOp::Eq),
            TokenKind::NotEq => (6, BinaryOp::Ne),
            TokenKind::Lt => (7, BinaryOp::Lt),
            TokenKind::Gt => (7, BinaryOp::Gt),
            TokenKind::LtEq => (7, BinaryOp::Le),
            TokenKind::GtEq => (7, BinaryOp::Ge),
            TokenKind::Shl => (8, BinaryOp::Shl),
            TokenKind::Shr => (8, BinaryOp::Shr),
            TokenKind::Plus => (9, BinaryOp::Add),
            TokenKind::Minus => (9, BinaryOp::Sub),
            TokenKind::Star => (10, BinaryOp::Mul),
            TokenKind::Slash => (10, BinaryOp::Div),
            TokenKind::Percent => (10, BinaryOp::Mod),
            _ => return None,
        };
        Some(entry)
    }

    fn parse_binary(&mut self, min_precedence: i32) -> Result<ExprId> {
        trace!("parse_binary({}): next token = {:?}", min_precedence, self.peek());
        let mut left = self.parse_unary()?;
        while let Some((precedence, op)) = Self::binary_operator(self.peek()) {
            if precedence < min_precedence {
                break;
            }
            let line = self.line();
            self.advance();
            let right = self.parse_binary(precedence + 1)?;
            left = self.make_binary(op, left, right, line)?;
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<ExprId> {
        trace!("parse_unary: next token = {:?}", self.peek());
        let line = self.line();
        if self.check(&TokenKind::LeftParen) && self.is_cast() {
            return self.parse_cast();
        }
        let op = match self.peek() {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            TokenKind::Tilde => UnaryOp::BitNot,
            TokenKind::PlusPlus => UnaryOp::PreInc,
            TokenKind::MinusMinus => UnaryOp::PreDec,
            _ => return self.parse_postfix(),
        };
        self.advance();
        let operand = self.parse_unary()?;
        self.make_unary(op, operand, line)
    }

    /// `(` followed by a complete type and `)`.
    fn is_cast(&mut self) -> bool {
        let starts_with_type = match self.peek_at(1) {
            TokenKind::Identifier(name) => self.is_type_name(name),
            TokenKind::Struct => true,
            _ => false,
        };
        if !starts_with_type {
            return false;
        }
        let saved = self.current;
        self.advance();
        let is_cast = self.parse_type().is_ok() && self.check(&TokenKind::RightParen);
        self.current = saved;
        is_cast
    }

    fn parse_cast(&mut self) -> Result<ExprId> {
        let line = self.line();
        self.expect(&TokenKind::LeftParen, "'('")?;
        let ty = self.parse_type()?;
        self.expect(&TokenKind::RightParen, "')'")?;
        let operand = self.parse_unary()?;
        self.make_cast(ty, operand, line)
    }

    fn parse_postfix(&mut self) -> Result<ExprId> {
        let mut expr = self.parse_primary()?;
        loop {
            let line = self.line();
            match self.peek() {
                TokenKind::Dot => {
                    self.advance();
                    let name = self.expect_identifier()?;
                    expr = self.make_member(expr, &name, line)?;
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RightBracket, "']'")?;
                    expr = self.make_index(expr, index, line)?;
                }
                TokenKind::PlusPlus => {
                    self.advance();
                    expr = self.make_unary(UnaryOp::PostInc, expr, line)?;
                }
                TokenKind::MinusMinus => {
                    self.advance();
                    expr = self.make_unary(UnaryOp::PostDec, expr, line)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<ExprId> {
        trace!("parse_primary: next token = {:?}", self.peek());
        let line = self.line();
        let (literal, ty) = match self.peek().clone() {
            TokenKind::IntLiteral(n) => (Literal::Int(n), Type::INT),
            TokenKind::UintLiteral(n) => (Literal::Uint(n), Type::Scalar(ScalarKind::Uint)),
            TokenKind::FloatLiteral(v) => (Literal::Float(v), Type::FLOAT),
            TokenKind::HalfLiteral(v) => (Literal::Float(v), Type::Scalar(ScalarKind::Half)),
            TokenKind::True => (Literal::Bool(true), Type::BOOL),
            TokenKind::False => (Literal::Bool(false), Type::BOOL),
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RightParen, "')'")?;
                return Ok(inner);
            }
            TokenKind::Identifier(name) => return self.parse_identifier_expression(name),
            other => bail_syntax_at!(self.loc(), "expected expression, found {}", describe(&other)),
        };
        self.advance();
        Ok(self.tree.add_expr(ExprKind::Literal(literal), ty, line))
    }

    fn parse_identifier_expression(&mut self, name: String) -> Result<ExprId> {
        let line = self.line();
        if self.is_type_name(&name) {
            let ty = self.parse_type()?;
            if !self.check(&TokenKind::LeftParen) {
                bail_syntax_at!(self.loc(), "expected '(' after type '{}'", self.type_name(&ty));
            }
            let args = self.parse_arguments()?;
            return self.make_constructor(ty, args, line);
        }

        self.advance();
        if self.check(&TokenKind::LeftParen) {
            let args = self.parse_arguments()?;
            return self.make_call(&name, args, line);
        }

        let symbol = match self.scopes.lookup(&name) {
            Some(symbol) => symbol.clone(),
            None => bail_semantic_at!(self.loc_at(line), "undeclared identifier '{}'", name),
        };
        Ok(self.tree.add_expr(
            ExprKind::Variable {
                name,
                storage: symbol.storage,
            },
            symbol.ty,
            line,
        ))
    }

    fn parse_arguments(&mut self) -> Result<Vec<ExprId>> {
        self.expect(&TokenKind::LeftParen, "'('")?;
        let mut args = Vec::new();
        if self.eat(&TokenKind::RightParen) {
            return Ok(args);
        }
        loop {
            args.push(self.parse_expression()?);
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "')'")?;
        Ok(args)
    }

    /// An initializer for a declaration of type `ty`: an expression or a
    /// brace list. Unsized arrays take their extent from the list.
    pub(super) fn parse_initializer(&mut self, ty: &Type) -> Result<ExprId> {
        if !self.check(&TokenKind::LeftBrace) {
            let value = self.parse_expression()?;
            return self.coerce(value, ty);
        }

        let line = self.line();
        self.advance();
        let mut elements = Vec::new();
        let mut resolved = ty.clone();
        match ty {
            Type::Array(elem, extent) => {
                while !self.check(&TokenKind::RightBrace) {
                    elements.push(self.parse_initializer(elem)?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                match extent {
                    Some(n) if *n as usize != elements.len() => bail_semantic_at!(
                        self.loc_at(line),
                        "initializer has {} elements, array '{}' needs {}",
                        elements.len(),
                        self.type_name(ty),
                        n
                    ),
                    Some(_) => {}
                    None => resolved = Type::Array(elem.clone(), Some(elements.len() as u32)),
                }
            }
            Type::Struct(id) => {
                let fields: Vec<Type> = self.tree.struct_decl(*id).fields.iter().map(|f| f.ty.clone()).collect();
                for field_ty in &fields {
                    if self.check(&TokenKind::RightBrace) {
                        break;
                    }
                    elements.push(self.parse_initializer(field_ty)?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                if elements.len() != fields.len() {
                    bail_semantic_at!(
                        self.loc_at(line),
                        "initializer has {} elements, struct '{}' has {} members",
                        elements.len(),
                        self.type_name(ty),
                        fields.len()
                    );
                }
            }
            _ => {
                let (Some(kind), Some(count)) = (ty.scalar_kind(), ty.component_count()) else {
                    bail_semantic_at!(self.loc_at(line), "cannot brace-initialize '{}'", self.type_name(ty));
                };
                let mut total = 0;
                while !self.check(&TokenKind::RightBrace) {
                    let element = self.parse_expression()?;
                    let element_ty = self.ty(element);
                    let Some(target) = element_ty.with_kind(kind) else {
                        bail_semantic_at!(
                            self.loc_at(line),
                            "cannot initialize '{}' from '{}'",
                            self.type_name(ty),
                            self.type_name(&element_ty)
                        );
                    };
                    total += element_ty.component_count().unwrap_or(0);
                    elements.push(self.coerce(element, &target)?);
                    if !self.eat(&TokenKind::Comma) {
                        break;
                    }
                }
                if total != count {
                    bail_semantic_at!(
                        self.loc_at(line),
                        "initializer has {} components, '{}' needs {}",
                        total,
                        self.type_name(ty),
                        count
                    );
                }
            }
        }
        self.expect(&TokenKind::RightBrace, "'}'")?;
        Ok(self.tree.add_expr(ExprKind::InitList { elements }, resolved, line))
    }

    // Typing

    /// Convert `expr` to `target`, inserting an implicit conversion node.
    /// Numeric literals are retyped in place of a conversion.
    pub(super) fn coerce(&mut self, expr: ExprId, target: &Type) -> Result<ExprId> {
        let from = self.ty(expr);
        if from == *target {
            return Ok(expr);
        }
        let line = self.tree.expr(expr).line;
        if !is_convertible(&from, target) {
            bail_semantic_at!(
                self.loc_at(line),
                "cannot convert from '{}' to '{}'",
                self.type_name(&from),
                self.type_name(target)
            );
        }

        let mut operand = expr;
        if let Some(kind) = target.scalar_kind() {
            if let Some(retyped) = self.retype_constant(expr, kind) {
                if self.ty(retyped) == *target {
                    return Ok(retyped);
                }
                operand = retyped;
            }
        }
        Ok(self.tree.add_expr(ExprKind::Conversion { operand }, target.clone(), line))
    }

    /// A scalar literal, or a negated one, rewritten with scalar kind `kind`.
    fn retype_constant(&mut self, expr: ExprId, kind: ScalarKind) -> Option<ExprId> {
        let node = self.tree.expr(expr).clone();
        match node.kind {
            ExprKind::Literal(literal) if node.ty.is_scalar() => {
                let literal = convert_literal(&literal, kind);
                Some(self.tree.add_expr(ExprKind::Literal(literal), Type::Scalar(kind), node.line))
            }
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } if kind != ScalarKind::Bool && kind != ScalarKind::Uint => {
                if !matches!(self.tree.expr(operand).kind, ExprKind::Literal(_)) {
                    return None;
                }
                let inner = self.retype_constant(operand, kind)?;
                Some(self.tree.add_expr(
                    ExprKind::Unary {
                        op: UnaryOp::Neg,
                        operand: inner,
                    },
                    Type::Scalar(kind),
                    node.line,
                ))
            }
            _ => None,
        }
    }

    fn make_unary(&mut self, op: UnaryOp, operand: ExprId, line: u32) -> Result<ExprId> {
        let ty = self.ty(operand);
        let Some(kind) = ty.scalar_kind() else {
            bail_semantic_at!(
                self.loc_at(line),
                "operator '{}' cannot be applied to '{}'",
                op.symbol(),
                self.type_name(&ty)
            );
        };

        let (operand, result) = match op {
            UnaryOp::Neg | UnaryOp::Plus if kind == ScalarKind::Bool => {
                let promoted = ty.with_kind(ScalarKind::Int).unwrap_or(Type::INT);
                (self.coerce(operand, &promoted)?, promoted)
            }
            UnaryOp::Neg | UnaryOp::Plus => (operand, ty),
            UnaryOp::Not => {
                let boolean = ty.with_kind(ScalarKind::Bool).unwrap_or(Type::BOOL);
                (self.coerce(operand, &boolean)?, boolean)
            }
            UnaryOp::BitNot => {
                if !kind.is_integer() {
                    bail_semantic_at!(self.loc_at(line), "operator '~' requires an integer operand");
                }
                (operand, ty)
            }
            UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec => {
                if kind == ScalarKind::Bool {
                    bail_semantic_at!(self.loc_at(line), "operator '{}' cannot be applied to 'bool'", op.symbol());
                }
                self.check_writable(operand, line)?;
                (operand, ty)
            }
        };
        Ok(self.tree.add_expr(ExprKind::Unary { op, operand }, result, line))
    }

    pub(super) fn make_binary(&mut self, op: BinaryOp, lhs: ExprId, rhs: ExprId, line: u32) -> Result<ExprId> {
        let lt = self.ty(lhs);
        let rt = self.ty(rhs);
        let mismatch = |this: &Self| {
            crate::error::CompilerError::SemanticError(
                format!(
                    "operator '{}' cannot be applied to '{}' and '{}'{}",
                    op.symbol(),
                    this.type_name(&lt),
                    this.type_name(&rt),
                    if op == BinaryOp::Mul && (lt.is_matrix() || rt.is_matrix()) {
                        "; use mul() for matrix products"
                    } else {
                        ""
                    }
                ),
                Some(this.loc_at(line)),
            )
        };

        let Some(common) = combine_operands(&lt, &rt, !(op.is_comparison() || op.is_logical())) else {
            return Err(mismatch(self));
        };

        if op.is_logical() {
            let boolean = common.with_kind(ScalarKind::Bool).unwrap_or(Type::BOOL);
            let lhs_target = operand_target(&boolean, &lt).unwrap_or(Type::BOOL);
            let rhs_target = operand_target(&boolean, &rt).unwrap_or(Type::BOOL);
            let lhs = self.coerce(lhs, &lhs_target)?;
            let rhs = self.coerce(rhs, &rhs_target)?;
            return Ok(self.tree.add_expr(ExprKind::Binary { op, lhs, rhs }, boolean, line));
        }

        if op.is_bitwise() && !common.scalar_kind().is_some_and(ScalarKind::is_integer) {
            bail_semantic_at!(self.loc_at(line), "operator '{}' requires integer operands", op.symbol());
        }

        let lhs_target = operand_target(&common, &lt).unwrap_or_else(|| common.clone());
        let rhs_target = operand_target(&common, &rt).unwrap_or_else(|| common.clone());
        let lhs = self.coerce(lhs, &lhs_target)?;
        let rhs = self.coerce(rhs, &rhs_target)?;
        let result = if op.is_comparison() {
            common.with_kind(ScalarKind::Bool).unwrap_or(Type::BOOL)
        } else {
            common
        };
        Ok(self.tree.add_expr(ExprKind::Binary { op, lhs, rhs }, result, line))
    }

    fn make_conditional(&mut self, cond: ExprId, then_expr: ExprId, else_expr: ExprId, line: u32) -> Result<ExprId> {
        let tt = self.ty(then_expr);
        let et = self.ty(else_expr);
        let common = if tt == et {
            tt.clone()
        } else {
            match combine_operands(&tt, &et, false) {
                Some(common) => common,
                None => bail_semantic_at!(
                    self.loc_at(line),
                    "conditional branches have incompatible types '{}' and '{}'",
                    self.type_name(&tt),
                    self.type_name(&et)
                ),
            }
        };

        let ct = self.ty(cond);
        let cond_target = match (&ct, &common) {
            (Type::Vector(_, n), Type::Vector(_, m)) if n == m => Type::Vector(ScalarKind::Bool, *n),
            _ => Type::BOOL,
        };
        let cond = self.coerce(cond, &cond_target)?;
        let then_expr = self.coerce(then_expr, &common)?;
        let else_expr = self.coerce(else_expr, &common)?;
        Ok(self.tree.add_expr(
            ExprKind::Conditional {
                cond,
                then_expr,
                else_expr,
            },
            common,
            line,
        ))
    }

    fn make_cast(&mut self, ty: Type, operand: ExprId, line: u32) -> Result<ExprId> {
        let from = self.ty(operand);
        if from == ty {
            return Ok(operand);
        }
        let allowed = match (&ty, &self.tree.expr(operand).kind) {
            (Type::Struct(_), ExprKind::Literal(Literal::Int(n))) => *n == 0,
            (Type::Struct(_), ExprKind::Literal(Literal::Float(v))) => *v == 0.0,
            (Type::Struct(_), _) => false,
            _ => is_convertible(&from, &ty),
        };
        if !allowed {
            bail_semantic_at!(
                self.loc_at(line),
                "cannot cast from '{}' to '{}'",
                self.type_name(&from),
                self.type_name(&ty)
            );
        }
        let mut operand = operand;
        if let Some(kind) = ty.scalar_kind() {
            if let Some(retyped) = self.retype_constant(operand, kind) {
                if ty.is_scalar() {
                    return Ok(retyped);
                }
                operand = retyped;
            }
        }
        Ok(self.tree.add_expr(ExprKind::Cast { operand }, ty, line))
    }

    fn make_constructor(&mut self, ty: Type, args: Vec<ExprId>, line: u32) -> Result<ExprId> {
        let (Some(kind), Some(count)) = (ty.scalar_kind(), ty.component_count()) else {
            bail_semantic_at!(
                self.loc_at(line),
                "type '{}' cannot be constructed; use an initializer list",
                self.type_name(&ty)
            );
        };

        if let [arg] = args.as_slice() {
            let arg_ty = self.ty(*arg);
            if arg_ty.component_count() != Some(count) {
                return self.make_cast(ty, *arg, line);
            }
        }

        let mut total = 0;
        let mut converted = Vec::with_capacity(args.len());
        for arg in args {
            let arg_ty = self.ty(arg);
            let Some(target) = arg_ty.with_kind(kind) else {
                bail_semantic_at!(
                    self.loc_at(line),
                    "cannot use '{}' to construct '{}'",
                    self.type_name(&arg_ty),
                    self.type_name(&ty)
                );
            };
            total += arg_ty.component_count().unwrap_or(0);
            converted.push(self.coerce(arg, &target)?);
        }
        if total != count {
            bail_semantic_at!(
                self.loc_at(line),
                "constructor for '{}' needs {} components, got {}",
                self.type_name(&ty),
                count,
                total
            );
        }
        Ok(self.tree.add_expr(ExprKind::Constructor { args: converted }, ty, line))
    }

    fn make_member(&mut self, base: ExprId, name: &str, line: u32) -> Result<ExprId> {
        let base_ty = self.ty(base);
        match &base_ty {
            Type::Struct(id) => {
                let decl = self.tree.struct_decl(*id);
                let Some(field) = decl.field_index(name) else {
                    bail_semantic_at!(self.loc_at(line), "'{}' has no member '{}'", decl.name, name);
                };
                let ty = decl.fields[field].ty.clone();
                Ok(self.tree.add_expr(
                    ExprKind::Member {
                        base,
                        name: name.to_string(),
                        field: field as u32,
                    },
                    ty,
                    line,
                ))
            }
            Type::Scalar(kind) | Type::Vector(kind, _) => {
                let arity = match base_ty {
                    Type::Vector(_, n) => n,
                    _ => 1,
                };
                let components = match swizzle_components(name, arity) {
                    Ok(components) => components,
                    Err(message) => bail_semantic_at!(self.loc_at(line), "{}", message),
                };
                let ty = Type::vector(*kind, components.len() as u8);
                Ok(self.tree.add_expr(ExprKind::Swizzle { base, components }, ty, line))
            }
            Type::Matrix(kind, rows, cols) => {
                let Some(elements) = matrix_elements(name, *rows, *cols) else {
                    bail_semantic_at!(self.loc_at(line), "invalid matrix member '{}'", name);
                };
                let kind = *kind;
                let mut scalars = Vec::with_capacity(elements.len());
                for (row, col) in elements.iter().copied() {
                    let row = self.tree.add_expr(ExprKind::Literal(Literal::Int(row as i64)), Type::INT, line);
                    let col = self.tree.add_expr(ExprKind::Literal(Literal::Int(col as i64)), Type::INT, line);
                    let row_expr = self.make_index(base, row, line)?;
                    scalars.push(self.make_index(row_expr, col, line)?);
                }
                match scalars.as_slice() {
                    [single] => Ok(*single),
                    _ => {
                        let ty = Type::Vector(kind, scalars.len() as u8);
                        Ok(self.tree.add_expr(ExprKind::Constructor { args: scalars }, ty, line))
                    }
                }
            }
            other => bail_semantic_at!(
                self.loc_at(line),
                "member '{}' accessed on non-struct type '{}'",
                name,
                self.type_name(other)
            ),
        }
    }

    fn make_index(&mut self, base: ExprId, index: ExprId, line: u32) -> Result<ExprId> {
        let base_ty = self.ty(base);
        let Some(result) = base_ty.index_result() else {
            bail_semantic_at!(self.loc_at(line), "cannot index a value of type '{}'", self.type_name(&base_ty));
        };

        let index_ty = self.ty(index);
        let index = match index_ty {
            Type::Scalar(ScalarKind::Int | ScalarKind::Uint) => index,
            Type::Scalar(_) => self.coerce(index, &Type::INT)?,
            other => bail_semantic_at!(self.loc_at(line), "index must be a scalar, found '{}'", self.type_name(&other)),
        };

        let bound = match &base_ty {
            Type::Vector(_, n) => Some(*n as i64),
            Type::Matrix(_, rows, _) => Some(*rows as i64),
            Type::Array(_, extent) => extent.map(i64::from),
            _ => None,
        };
        let constant = self.constant_index(index);
        if let (Some(bound), Some(n)) = (bound, constant) {
            if n < 0 || n >= bound {
                bail_semantic_at!(self.loc_at(line), "index {} is out of range for '{}'", n, self.type_name(&base_ty));
            }
        }
        Ok(self.tree.add_expr(ExprKind::Index { base, index }, result, line))
    }

    fn constant_index(&self, index: ExprId) -> Option<i64> {
        match self.tree.expr(index).kind {
            ExprKind::Literal(Literal::Int(n)) => Some(n),
            ExprKind::Literal(Literal::Uint(n)) => i64::try_from(n).ok(),
            ExprKind::Unary { op: UnaryOp::Neg, operand } => self.constant_index(operand).map(|n| -n),
            ExprKind::Unary { op: UnaryOp::Plus, operand } | ExprKind::Conversion { operand } => {
                self.constant_index(operand)
            }
            _ => None,
        }
    }

    fn make_call(&mut self, name: &str, args: Vec<ExprId>, line: u32) -> Result<ExprId> {
        let arg_types: Vec<Type> = args.iter().map(|a| self.ty(*a)).collect();
        let user: Vec<FunctionId> = self.tree.functions_named(name).collect();
        let candidates: Vec<Candidate> = if !user.is_empty() {
            user.into_iter()
                .map(|id| {
                    let f = self.tree.function(id);
                    Candidate {
                        callee: Callee::Function(id),
                        params: f.params.iter().map(|p| (p.ty.clone(), p.modifier)).collect(),
                        ret: f.return_type.clone(),
                    }
                })
                .collect()
        } else if let Some(intrinsic) = Intrinsic::from_name(name) {
            intrinsic
                .candidates(&arg_types)
                .into_iter()
                .map(|sig| Candidate {
                    callee: Callee::Intrinsic(intrinsic),
                    params: sig.params.into_iter().map(|t| (t, ParamModifier::In)).collect(),
                    ret: sig.ret,
                })
                .collect()
        } else {
            bail_semantic_at!(self.loc_at(line), "undeclared function '{}'", name);
        };

        let chosen = self.select_overload(name, &args, &arg_types, &candidates, line)?;
        let candidate = &candidates[chosen];
        let mut converted = Vec::with_capacity(args.len());
        for (arg, (param_ty, modifier)) in args.iter().zip(&candidate.params) {
            if modifier.is_output() {
                self.check_writable(*arg, line)?;
                converted.push(*arg);
            } else {
                converted.push(self.coerce(*arg, param_ty)?);
            }
        }
        Ok(self.tree.add_expr(
            ExprKind::Call {
                callee: candidate.callee,
                args: converted,
            },
            candidate.ret.clone(),
            line,
        ))
    }

    /// Index of the best viable candidate: fewest implicit conversions, then
    /// lowest total conversion rank. A tie for best is ambiguous.
    fn select_overload(
        &self,
        name: &str,
        args: &[ExprId],
        arg_types: &[Type],
        candidates: &[Candidate],
        line: u32,
    ) -> Result<usize> {
        let mut best: Option<(usize, (u32, u32))> = None;
        let mut tied = false;
        for (index, candidate) in candidates.iter().enumerate() {
            if candidate.params.len() != args.len() {
                continue;
            }
            let Some(score) = self.score(candidate, args, arg_types) else {
                continue;
            };
            match best {
                Some((_, current)) if score == current => tied = true,
                Some((_, current)) if score > current => {}
                _ => {
                    best = Some((index, score));
                    tied = false;
                }
            }
        }

        let signature = arg_types.iter().map(|t| self.type_name(t)).collect::<Vec<_>>().join(", ");
        match best {
            None => bail_semantic_at!(self.loc_at(line), "no matching overload for '{}({})'", name, signature),
            Some(_) if tied => bail_semantic_at!(self.loc_at(line), "ambiguous call to '{}({})'", name, signature),
            Some((index, _)) => Ok(index),
        }
    }

    fn score(&self, candidate: &Candidate, args: &[ExprId], arg_types: &[Type]) -> Option<(u32, u32)> {
        let mut conversions = 0;
        let mut rank = 0;
        for ((param, modifier), (arg, arg_ty)) in candidate.params.iter().zip(args.iter().zip(arg_types)) {
            if modifier.is_output() {
                if param != arg_ty || !self.tree.is_lvalue(*arg) {
                    return None;
                }
                continue;
            }
            let r = conversion_rank(arg_ty, param)?;
            if r > 0 {
                conversions += 1;
                rank += r;
            }
        }
        Some((conversions, rank))
    }

    /// Reject writes through rvalues, uniforms, buffer fields and constants.
    pub(super) fn check_writable(&self, target: ExprId, line: u32) -> Result<()> {
        if !self.tree.is_lvalue(target) {
            bail_semantic_at!(self.loc_at(line), "expression is not assignable");
        }
        let Some((name, storage)) = self.tree.root_variable(target) else {
            bail_semantic_at!(self.loc_at(line), "expression is not assignable");
        };
        let is_const = self.scopes.lookup(name).is_some_and(|s| s.is_const);
        match storage {
            StorageClass::BufferField(..) => {
                bail_semantic_at!(self.loc_at(line), "cannot assign to buffer member '{}'", name)
            }
            StorageClass::Global(id) if self.tree.global(id).is_uniform() => {
                bail_semantic_at!(self.loc_at(line), "cannot assign to uniform '{}'", name)
            }
            StorageClass::Parameter(ParamModifier::Uniform) => {
                bail_semantic_at!(self.loc_at(line), "cannot assign to uniform '{}'", name)
            }
            _ if is_const => bail_semantic_at!(self.loc_at(line), "cannot assign to constant '{}'", name),
            _ => Ok(()),
        }
    }

    pub(super) fn make_assignment(
        &mut self,
        op: AssignOp,
        target: ExprId,
        value: ExprId,
        line: u32,
    ) -> Result<StmtKind> {
        self.check_writable(target, line)?;
        let target_ty = self.ty(target);
        let Some(bin) = op.binary_op() else {
            let value = self.coerce(value, &target_ty)?;
            return Ok(StmtKind::Assign { op, target, value });
        };

        let value_ty = self.ty(value);
        let widened = combine_operands(&target_ty, &value_ty, true)
            .and_then(|common| Some(common.scalar_kind()? > target_ty.scalar_kind()?))
            .unwrap_or(false);
        if widened {
            // `i += 0.5` computes in float and converts back on store, which
            // evaluates the target twice.
            if self.tree.has_side_effects(target) {
                bail_semantic_at!(
                    self.loc_at(line),
                    "operator '{}' needs a conversion here and its target must not have side effects",
                    op.symbol()
                );
            }
            let combined = self.make_binary(bin, target, value, line)?;
            let value = self.coerce(combined, &target_ty)?;
            return Ok(StmtKind::Assign {
                op: AssignOp::Assign,
                target,
                value,
            });
        }

        // Type-check the operator itself, then store the converted operand.
        self.make_binary(bin, target, value, line)?;
        let Some(value_target) = operand_target(&target_ty, &value_ty) else {
            bail_semantic_at!(self.loc_at(line), "operator '{}' cannot be applied here", op.symbol());
        };
        let value = self.coerce(value, &value_target)?;
        Ok(StmtKind::Assign { op, target, value })
    }
}
