//! Single-pass recursive-descent parser.
//!
//! Declarations are bound and every expression is typed while it is parsed,
//! so the returned [`SyntaxTree`] needs no further semantic pass. Expression
//! parsing and typing live in `parser/expr.rs`.

use crate::ast::*;
use crate::error::{CompilerError, Location, Result};
use crate::lexer::{Token, TokenKind, tokenize};
use crate::logger::Logger;
use crate::scope::{ScopeStack, Symbol};
use crate::types::{ScalarKind, Type};
use crate::{bail_semantic_at, bail_syntax_at};
use log::{debug, trace};

mod expr;

pub use expr::{matrix_elements, swizzle_components};

/// Identifiers that qualify a declaration without changing how it translates.
const IGNORED_MODIFIERS: &[&str] = &[
    "row_major",
    "column_major",
    "precise",
    "linear",
    "centroid",
    "nointerpolation",
    "noperspective",
    "sample",
];

#[derive(Debug, Clone, Copy, Default)]
struct Modifiers {
    is_static: bool,
    is_const: bool,
    is_uniform: bool,
}

pub struct Parser<'a> {
    logger: &'a dyn Logger,
    file: String,
    source: &'a str,
    tokens: Vec<Token>,
    current: usize,
    tree: SyntaxTree,
    scopes: ScopeStack<Symbol>,
    return_type: Option<Type>,
    loop_depth: u32,
}

impl<'a> Parser<'a> {
    pub fn new(logger: &'a dyn Logger, file: &str, source: &'a str) -> Self {
        Parser {
            logger,
            file: file.to_string(),
            source,
            tokens: Vec::new(),
            current: 0,
            tree: SyntaxTree::new(file),
            scopes: ScopeStack::new(),
            return_type: None,
            loop_depth: 0,
        }
    }

    /// Parse the whole source. The first error is reported to the logger
    /// and returned; no partial tree escapes.
    pub fn parse(mut self) -> Result<SyntaxTree> {
        match self.parse_program() {
            Ok(()) => {
                debug!(
                    "parsed {}: {} functions, {} structs, {} buffers, {} globals",
                    self.file,
                    self.tree.functions.len(),
                    self.tree.structs.len(),
                    self.tree.buffers.len(),
                    self.tree.globals.len()
                );
                Ok(self.tree)
            }
            Err(err) => {
                self.logger.report_error(&err);
                Err(err)
            }
        }
    }

    fn parse_program(&mut self) -> Result<()> {
        self.tokens = tokenize(&self.file, self.source)?;
        self.current = 0;
        while !self.is_at_end() {
            self.parse_top_level()?;
        }
        Ok(())
    }

    fn parse_top_level(&mut self) -> Result<()> {
        trace!("parse_top_level: next token = {:?}", self.peek());
        match self.peek() {
            TokenKind::Semicolon => {
                self.advance();
                Ok(())
            }
            TokenKind::Struct => self.parse_struct(),
            TokenKind::Cbuffer | TokenKind::Tbuffer => self.parse_buffer(),
            TokenKind::LeftBracket => {
                // Function attributes such as [maxvertexcount(3)] carry nothing we translate.
                self.parse_stmt_attributes()?;
                Ok(())
            }
            _ => self.parse_global_or_function(),
        }
    }

    fn parse_struct(&mut self) -> Result<()> {
        trace!("parse_struct: next token = {:?}", self.peek());
        let line = self.line();
        self.expect(&TokenKind::Struct, "'struct'")?;
        let name = self.expect_identifier()?;
        if self.tree.find_struct(&name).is_some() || self.is_type_name(&name) {
            bail_semantic_at!(self.loc_at(line), "redefinition of type '{}'", name);
        }

        let fields = self.parse_field_list()?;
        self.expect(&TokenKind::Semicolon, "';' after struct")?;
        self.tree.add_struct(StructDecl { name, fields, line });
        Ok(())
    }

    /// `{ type name [: SEMANTIC]; ... }` shared by structs and buffers.
    fn parse_field_list(&mut self) -> Result<Vec<Field>> {
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let mut fields: Vec<Field> = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            self.parse_modifiers();
            let base = self.parse_type()?;
            loop {
                let line = self.line();
                let name = self.expect_identifier()?;
                let ty = self.parse_array_suffix(base.clone())?;
                let (semantic, _) = self.parse_annotations()?;
                if fields.iter().any(|f| f.name == name) {
                    bail_semantic_at!(self.loc_at(line), "duplicate member '{}'", name);
                }
                fields.push(Field { name, ty, semantic });
                if !self.eat(&TokenKind::Comma) {
                    break;
                }
            }
            self.expect(&TokenKind::Semicolon, "';' after member")?;
        }
        self.expect(&TokenKind::RightBrace, "'}'")?;
        Ok(fields)
    }

    fn parse_buffer(&mut self) -> Result<()> {
        trace!("parse_buffer: next token = {:?}", self.peek());
        let line = self.line();
        let kind = match self.advance().kind {
            TokenKind::Tbuffer => BufferKind::Texture,
            _ => BufferKind::Constant,
        };
        let name = self.expect_identifier()?;
        let (_, register) = self.parse_annotations()?;
        let fields = self.parse_field_list()?;
        self.eat(&TokenKind::Semicolon);

        for field in &fields {
            if self.scopes.is_defined(&field.name) {
                bail_semantic_at!(self.loc_at(line), "redefinition of '{}'", field.name);
            }
        }
        let symbols: Vec<(String, Type)> = fields.iter().map(|f| (f.name.clone(), f.ty.clone())).collect();
        let id = self.tree.add_buffer(BufferDecl {
            name,
            kind,
            register,
            fields,
            line,
        });
        for (index, (name, ty)) in symbols.into_iter().enumerate() {
            self.scopes.insert(
                name,
                Symbol {
                    ty,
                    storage: StorageClass::BufferField(id, index as u32),
                    is_const: false,
                    depth: 0,
                },
            );
        }
        Ok(())
    }

    fn parse_global_or_function(&mut self) -> Result<()> {
        trace!("parse_global_or_function: next token = {:?}", self.peek());
        let line = self.line();
        let modifiers = self.parse_modifiers();
        let ty = self.parse_type()?;
        let name = self.expect_identifier()?;
        if self.check(&TokenKind::LeftParen) {
            self.parse_function(ty, name, line)
        } else {
            self.parse_globals(modifiers, ty, name)
        }
    }

    fn parse_globals(&mut self, modifiers: Modifiers, base: Type, first: String) -> Result<()> {
        let mut name = first;
        loop {
            let line = self.line();
            let mut ty = self.parse_array_suffix(base.clone())?;
            let (semantic, register) = self.parse_annotations()?;
            let init = if self.eat(&TokenKind::Assign) {
                let init = self.parse_initializer(&ty)?;
                ty = self.tree.expr(init).ty.clone();
                Some(init)
            } else {
                None
            };
            if modifiers.is_static && modifiers.is_const && init.is_none() {
                bail_semantic_at!(self.loc_at(line), "constant '{}' must be initialized", name);
            }
            if self.scopes.is_defined(&name) {
                bail_semantic_at!(self.loc_at(line), "redefinition of '{}'", name);
            }

            let id = self.tree.add_global(GlobalDecl {
                name: name.clone(),
                ty: ty.clone(),
                is_static: modifiers.is_static && !modifiers.is_uniform,
                is_const: modifiers.is_const,
                semantic,
                register,
                init,
                line,
            });
            self.scopes.insert(
                name,
                Symbol {
                    ty,
                    storage: StorageClass::Global(id),
                    is_const: modifiers.is_const,
                    depth: 0,
                },
            );

            if !self.eat(&TokenKind::Comma) {
                break;
            }
            name = self.expect_identifier()?;
        }
        self.expect(&TokenKind::Semicolon, "';' after global declaration")
    }

    fn parse_function(&mut self, return_type: Type, name: String, line: u32) -> Result<()> {
        trace!("parse_function({}): next token = {:?}", name, self.peek());
        let params = self.parse_params()?;
        let (return_semantic, _) = self.parse_annotations()?;

        let signature: Vec<&Type> = params.iter().map(|p| &p.ty).collect();
        let existing = self
            .tree
            .functions_named(&name)
            .find(|id| self.tree.function(*id).params.iter().map(|p| &p.ty).eq(signature.iter().copied()));
        if let Some(id) = existing {
            if self.tree.function(id).return_type != return_type {
                bail_semantic_at!(self.loc_at(line), "function '{}' redeclared with a different return type", name);
            }
        }

        let decl = FunctionDecl {
            name: name.clone(),
            params,
            return_type: return_type.clone(),
            return_semantic,
            body: None,
            line,
        };

        if self.eat(&TokenKind::Semicolon) {
            if existing.is_none() {
                self.tree.add_function(decl);
            }
            return Ok(());
        }

        let id = match existing {
            Some(id) if self.tree.function(id).is_definition() => {
                bail_semantic_at!(self.loc_at(line), "redefinition of function '{}'", name)
            }
            Some(id) => {
                self.tree.functions[id.index()] = decl;
                id
            }
            None => self.tree.add_function(decl),
        };

        self.scopes.push_scope();
        let params = self.tree.function(id).params.clone();
        for param in params {
            let depth = self.scopes.depth();
            self.scopes.insert(
                param.name,
                Symbol {
                    ty: param.ty,
                    storage: StorageClass::Parameter(param.modifier),
                    is_const: false,
                    depth,
                },
            );
        }
        self.return_type = Some(return_type);
        let body = self.parse_block_contents();
        self.return_type = None;
        self.scopes.pop_scope();

        self.tree.functions[id.index()].body = Some(body?);
        Ok(())
    }

    fn parse_params(&mut self) -> Result<Vec<Param>> {
        self.expect(&TokenKind::LeftParen, "'('")?;
        let mut params: Vec<Param> = Vec::new();
        if matches!(self.peek(), TokenKind::Identifier(n) if n == "void") && self.peek_at(1) == &TokenKind::RightParen {
            self.advance();
        }
        if self.eat(&TokenKind::RightParen) {
            return Ok(params);
        }

        loop {
            let line = self.line();
            let mut modifier = ParamModifier::In;
            loop {
                modifier = match self.peek() {
                    TokenKind::In => ParamModifier::In,
                    TokenKind::Out => ParamModifier::Out,
                    TokenKind::InOut => ParamModifier::InOut,
                    TokenKind::Uniform => ParamModifier::Uniform,
                    TokenKind::Const => modifier,
                    _ => break,
                };
                self.advance();
            }
            self.parse_modifiers();
            let base = self.parse_type()?;
            let name = self.expect_identifier()?;
            let ty = self.parse_array_suffix(base)?;
            let (semantic, _) = self.parse_annotations()?;
            if self.check(&TokenKind::Assign) {
                bail_syntax_at!(self.loc(), "default parameter values are not supported");
            }
            if params.iter().any(|p| p.name == name) {
                bail_semantic_at!(self.loc_at(line), "duplicate parameter '{}'", name);
            }
            params.push(Param {
                name,
                ty,
                modifier,
                semantic,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::RightParen, "')'")?;
        Ok(params)
    }

    /// `static`, `const`, `uniform`, `extern`, `inline` and ignorable identifier modifiers.
    fn parse_modifiers(&mut self) -> Modifiers {
        let mut modifiers = Modifiers::default();
        loop {
            match self.peek() {
                TokenKind::Static => modifiers.is_static = true,
                TokenKind::Const => modifiers.is_const = true,
                TokenKind::Uniform => modifiers.is_uniform = true,
                TokenKind::Extern | TokenKind::Inline => {}
                TokenKind::Identifier(name)
                    if IGNORED_MODIFIERS.contains(&name.as_str())
                        && matches!(self.peek_at(1), TokenKind::Identifier(_)) => {}
                _ => break,
            }
            self.advance();
        }
        modifiers
    }

    /// Trailing `: SEMANTIC`, `: register(x)` and `: packoffset(...)` annotations.
    fn parse_annotations(&mut self) -> Result<(Option<String>, Option<Register>)> {
        let mut semantic = None;
        let mut register = None;
        while self.eat(&TokenKind::Colon) {
            match self.peek().clone() {
                TokenKind::Register => {
                    self.advance();
                    self.expect(&TokenKind::LeftParen, "'('")?;
                    let mut slot = self.expect_identifier()?;
                    // register(ps_3_0, s0): the profile is optional.
                    while self.eat(&TokenKind::Comma) {
                        slot = self.expect_identifier()?;
                    }
                    self.expect(&TokenKind::RightParen, "')'")?;
                    register = match Register::parse(&slot) {
                        Some(r) => Some(r),
                        None => bail_syntax_at!(self.loc(), "invalid register '{}'", slot),
                    };
                }
                TokenKind::Packoffset => {
                    self.advance();
                    self.expect(&TokenKind::LeftParen, "'('")?;
                    while !self.check(&TokenKind::RightParen) && !self.is_at_end() {
                        self.advance();
                    }
                    self.expect(&TokenKind::RightParen, "')'")?;
                }
                TokenKind::Identifier(name) => {
                    self.advance();
                    semantic = Some(name);
                }
                other => bail_syntax_at!(self.loc(), "expected semantic after ':', found {}", describe(&other)),
            }
        }
        Ok((semantic, register))
    }

    pub(crate) fn is_type_name(&self, name: &str) -> bool {
        name == "vector"
            || name == "matrix"
            || Type::from_builtin_name(name).is_some()
            || self.tree.find_struct(name).is_some()
    }

    fn parse_type(&mut self) -> Result<Type> {
        trace!("parse_type: next token = {:?}", self.peek());
        if self.eat(&TokenKind::Struct) {
            let name = self.expect_identifier()?;
            return match self.tree.find_struct(&name) {
                Some(id) => Ok(Type::Struct(id)),
                None => bail_semantic_at!(self.loc(), "unknown struct '{}'", name),
            };
        }

        let name = match self.peek() {
            TokenKind::Identifier(name) => name.clone(),
            other => bail_syntax_at!(self.loc(), "expected type, found {}", describe(other)),
        };
        self.advance();

        match name.as_str() {
            "vector" => {
                self.expect(&TokenKind::Lt, "'<'")?;
                let kind = self.parse_scalar_kind()?;
                self.expect(&TokenKind::Comma, "','")?;
                let n = self.parse_dimension(1)?;
                self.expect(&TokenKind::Gt, "'>'")?;
                Ok(Type::vector(kind, n))
            }
            "matrix" => {
                self.expect(&TokenKind::Lt, "'<'")?;
                let kind = self.parse_scalar_kind()?;
                self.expect(&TokenKind::Comma, "','")?;
                let rows = self.parse_dimension(2)?;
                self.expect(&TokenKind::Comma, "','")?;
                let cols = self.parse_dimension(2)?;
                self.expect(&TokenKind::Gt, "'>'")?;
                Ok(Type::Matrix(kind, rows, cols))
            }
            _ => {
                if let Some(ty) = Type::from_builtin_name(&name) {
                    if let Type::Sampler(dim, _) = ty {
                        if self.eat(&TokenKind::Lt) {
                            let kind = self.parse_scalar_kind()?;
                            self.expect(&TokenKind::Gt, "'>'")?;
                            return Ok(Type::Sampler(dim, kind));
                        }
                    }
                    return Ok(ty);
                }
                match self.tree.find_struct(&name) {
                    Some(id) => Ok(Type::Struct(id)),
                    None => bail_semantic_at!(self.loc(), "unknown type '{}'", name),
                }
            }
        }
    }

    /// Scalar kind of a type argument such as the `half` in `vector<half, 3>`
    /// or the `half4` in `sampler2D<half4>`.
    fn parse_scalar_kind(&mut self) -> Result<ScalarKind> {
        let ty = self.parse_type()?;
        match ty.scalar_kind() {
            Some(kind) => Ok(kind),
            None => bail_semantic_at!(self.loc(), "expected a numeric type argument"),
        }
    }

    fn parse_dimension(&mut self, min: i64) -> Result<u8> {
        match self.peek().clone() {
            TokenKind::IntLiteral(n) if (min..=4).contains(&n) => {
                self.advance();
                Ok(n as u8)
            }
            other => bail_syntax_at!(self.loc(), "expected dimension {}..4, found {}", min, describe(&other)),
        }
    }

    /// `[N]` suffixes after a declarator name; `a[2][3]` is an array of two `[3]` arrays.
    fn parse_array_suffix(&mut self, base: Type) -> Result<Type> {
        let mut extents = Vec::new();
        while self.eat(&TokenKind::LeftBracket) {
            if self.eat(&TokenKind::RightBracket) {
                extents.push(None);
                continue;
            }
            extents.push(Some(self.parse_array_extent()?));
            self.expect(&TokenKind::RightBracket, "']'")?;
        }
        Ok(extents.into_iter().rev().fold(base, |ty, n| Type::Array(Box::new(ty), n)))
    }

    fn parse_array_extent(&mut self) -> Result<u32> {
        let line = self.line();
        let value = match self.advance().kind {
            TokenKind::IntLiteral(n) => Some(n),
            TokenKind::UintLiteral(n) => i64::try_from(n).ok(),
            TokenKind::Identifier(name) => self.constant_int(&name),
            _ => None,
        };
        match value.and_then(|n| u32::try_from(n).ok()).filter(|n| *n > 0) {
            Some(n) => Ok(n),
            None => bail_semantic_at!(self.loc_at(line), "array size must be a positive integer constant"),
        }
    }

    /// Value of a `static const int` global initialized with a literal.
    fn constant_int(&self, name: &str) -> Option<i64> {
        let symbol = self.scopes.lookup(name)?;
        let StorageClass::Global(id) = symbol.storage else {
            return None;
        };
        let global = self.tree.global(id);
        if !global.is_const {
            return None;
        }
        match self.tree.expr(global.init?).kind {
            ExprKind::Literal(Literal::Int(n)) => Some(n),
            ExprKind::Literal(Literal::Uint(n)) => i64::try_from(n).ok(),
            _ => None,
        }
    }

    // Statements

    fn parse_block_contents(&mut self) -> Result<Vec<StmtId>> {
        self.expect(&TokenKind::LeftBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&TokenKind::RightBrace) {
            if self.is_at_end() {
                bail_syntax_at!(self.loc(), "expected '}}' before end of file");
            }
            stmts.push(self.parse_statement()?);
        }
        self.expect(&TokenKind::RightBrace, "'}'")?;
        Ok(stmts)
    }

    fn parse_stmt_attributes(&mut self) -> Result<Vec<StmtAttribute>> {
        let mut attributes = Vec::new();
        while self.eat(&TokenKind::LeftBracket) {
            let name = self.expect_identifier()?;
            let argument = if self.eat(&TokenKind::LeftParen) {
                let mut text = Vec::new();
                while !self.check(&TokenKind::RightParen) && !self.is_at_end() {
                    text.push(token_text(&self.advance().kind));
                }
                self.expect(&TokenKind::RightParen, "')'")?;
                Some(text.join(""))
            } else {
                None
            };
            self.expect(&TokenKind::RightBracket, "']'")?;
            attributes.push(StmtAttribute { name, argument });
        }
        Ok(attributes)
    }

    fn parse_statement(&mut self) -> Result<StmtId> {
        trace!("parse_statement: next token = {:?}", self.peek());
        let attributes = self.parse_stmt_attributes()?;
        let line = self.line();
        let kind = match self.peek() {
            TokenKind::LeftBrace => {
                self.scopes.push_scope();
                let stmts = self.parse_block_contents();
                self.scopes.pop_scope();
                StmtKind::Block(stmts?)
            }
            TokenKind::If => self.parse_if()?,
            TokenKind::For => self.parse_for()?,
            TokenKind::While => {
                self.advance();
                let cond = self.parse_condition()?;
                let body = self.parse_loop_body()?;
                StmtKind::While { cond, body }
            }
            TokenKind::Do => {
                self.advance();
                let body = self.parse_loop_body()?;
                self.expect(&TokenKind::While, "'while'")?;
                let cond = self.parse_condition()?;
                self.expect(&TokenKind::Semicolon, "';'")?;
                StmtKind::DoWhile { body, cond }
            }
            TokenKind::Return => self.parse_return()?,
            TokenKind::Break | TokenKind::Continue => {
                let is_break = self.advance().kind == TokenKind::Break;
                if self.loop_depth == 0 {
                    let word = if is_break { "break" } else { "continue" };
                    bail_semantic_at!(self.loc_at(line), "'{}' outside of a loop", word);
                }
                self.expect(&TokenKind::Semicolon, "';'")?;
                if is_break { StmtKind::Break } else { StmtKind::Continue }
            }
            TokenKind::Discard => {
                self.advance();
                self.expect(&TokenKind::Semicolon, "';'")?;
                StmtKind::Discard
            }
            TokenKind::Semicolon => {
                self.advance();
                StmtKind::Empty
            }
            _ => {
                let kind = self.parse_simple_statement()?;
                self.expect(&TokenKind::Semicolon, "';'")?;
                kind
            }
        };
        Ok(self.tree.add_stmt(kind, attributes, line))
    }

    /// Declaration, assignment or expression, without the terminating `;`.
    fn parse_simple_statement(&mut self) -> Result<StmtKind> {
        if self.is_declaration_start() {
            return self.parse_local_declaration();
        }
        let line = self.line();
        let target = self.parse_expression()?;
        if let Some(op) = assign_op(self.peek()) {
            self.advance();
            let value = self.parse_expression()?;
            return self.make_assignment(op, target, value, line);
        }
        Ok(StmtKind::Expr(target))
    }

    fn is_declaration_start(&self) -> bool {
        match self.peek() {
            TokenKind::Const | TokenKind::Static | TokenKind::Uniform | TokenKind::Extern => true,
            TokenKind::Identifier(name) => {
                let next_is_name = matches!(self.peek_at(1), TokenKind::Identifier(_));
                (IGNORED_MODIFIERS.contains(&name.as_str()) && next_is_name)
                    || (self.is_type_name(name) && (next_is_name || self.peek_at(1) == &TokenKind::Lt))
            }
            TokenKind::Struct => true,
            _ => false,
        }
    }

    fn parse_local_declaration(&mut self) -> Result<StmtKind> {
        trace!("parse_local_declaration: next token = {:?}", self.peek());
        let modifiers = self.parse_modifiers();
        let base = self.parse_type()?;
        let mut decls = Vec::new();
        loop {
            let line = self.line();
            let name = self.expect_identifier()?;
            let mut ty = self.parse_array_suffix(base.clone())?;
            let init = if self.eat(&TokenKind::Assign) {
                let init = self.parse_initializer(&ty)?;
                ty = self.tree.expr(init).ty.clone();
                Some(init)
            } else {
                None
            };
            if modifiers.is_const && init.is_none() {
                bail_semantic_at!(self.loc_at(line), "constant '{}' must be initialized", name);
            }
            if matches!(ty, Type::Array(_, None)) {
                bail_semantic_at!(self.loc_at(line), "array '{}' needs a size or an initializer", name);
            }
            if self.scopes.is_defined_in_current_scope(&name) {
                bail_semantic_at!(self.loc_at(line), "redefinition of '{}'", name);
            }
            let depth = self.scopes.depth();
            self.scopes.insert(
                name.clone(),
                Symbol {
                    ty: ty.clone(),
                    storage: StorageClass::Local,
                    is_const: modifiers.is_const,
                    depth,
                },
            );
            decls.push(LocalDecl {
                name,
                ty,
                is_const: modifiers.is_const,
                is_static: modifiers.is_static,
                init,
            });
            if !self.eat(&TokenKind::Comma) {
                break;
            }
        }
        Ok(StmtKind::Declaration(decls))
    }

    fn parse_condition(&mut self) -> Result<ExprId> {
        self.expect(&TokenKind::LeftParen, "'('")?;
        let cond = self.parse_expression()?;
        self.expect(&TokenKind::RightParen, "')'")?;
        self.coerce(cond, &Type::BOOL)
    }

    fn parse_loop_body(&mut self) -> Result<StmtId> {
        self.loop_depth += 1;
        let body = self.parse_statement();
        self.loop_depth -= 1;
        body
    }

    fn parse_if(&mut self) -> Result<StmtKind> {
        self.expect(&TokenKind::If, "'if'")?;
        let cond = self.parse_condition()?;
        let then_branch = self.parse_statement()?;
        let else_branch = if self.eat(&TokenKind::Else) {
            Some(self.parse_statement()?)
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn parse_for(&mut self) -> Result<StmtKind> {
        self.expect(&TokenKind::For, "'for'")?;
        self.expect(&TokenKind::LeftParen, "'('")?;
        self.scopes.push_scope();
        let result = self.parse_for_rest();
        self.scopes.pop_scope();
        result
    }

    fn parse_for_rest(&mut self) -> Result<StmtKind> {
        let init = if self.eat(&TokenKind::Semicolon) {
            None
        } else {
            let line = self.line();
            let kind = self.parse_simple_statement()?;
            self.expect(&TokenKind::Semicolon, "';'")?;
            Some(self.tree.add_stmt(kind, Vec::new(), line))
        };

        let cond = if self.check(&TokenKind::Semicolon) {
            None
        } else {
            let cond = self.parse_expression()?;
            Some(self.coerce(cond, &Type::BOOL)?)
        };
        self.expect(&TokenKind::Semicolon, "';'")?;

        let step = if self.check(&TokenKind::RightParen) {
            None
        } else {
            let line = self.line();
            let kind = self.parse_simple_statement()?;
            if matches!(kind, StmtKind::Declaration(_)) {
                bail_syntax_at!(self.loc_at(line), "declaration not allowed in for-loop step");
            }
            Some(self.tree.add_stmt(kind, Vec::new(), line))
        };
        self.expect(&TokenKind::RightParen, "')'")?;

        let body = self.parse_loop_body()?;
        Ok(StmtKind::For { init, cond, step, body })
    }

    fn parse_return(&mut self) -> Result<StmtKind> {
        let line = self.line();
        self.expect(&TokenKind::Return, "'return'")?;
        let return_type = self.return_type.clone().unwrap_or(Type::Void);
        if self.eat(&TokenKind::Semicolon) {
            if !return_type.is_void() {
                bail_semantic_at!(self.loc_at(line), "function must return a value");
            }
            return Ok(StmtKind::Return(None));
        }
        let value = self.parse_expression()?;
        if return_type.is_void() {
            bail_semantic_at!(self.loc_at(line), "void function cannot return a value");
        }
        let value = self.coerce(value, &return_type)?;
        self.expect(&TokenKind::Semicolon, "';'")?;
        Ok(StmtKind::Return(Some(value)))
    }

    // Token helpers

    fn peek(&self) -> &TokenKind {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &TokenKind {
        let index = (self.current + offset).min(self.tokens.len().saturating_sub(1));
        self.tokens.get(index).map(|t| &t.kind).unwrap_or(&TokenKind::Eof)
    }

    fn line(&self) -> u32 {
        let index = self.current.min(self.tokens.len().saturating_sub(1));
        self.tokens.get(index).map(|t| t.line).unwrap_or(1)
    }

    fn loc(&self) -> Location {
        self.loc_at(self.line())
    }

    fn loc_at(&self, line: u32) -> Location {
        Location::new(self.file.clone(), line)
    }

    fn advance(&mut self) -> Token {
        let index = self.current.min(self.tokens.len().saturating_sub(1));
        let token = self.tokens.get(index).cloned().unwrap_or(Token {
            kind: TokenKind::Eof,
            line: 1,
        });
        if !self.is_at_end() {
            self.current += 1;
        }
        token
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(self.peek()) == std::mem::discriminant(kind)
    }

    fn eat(&mut self, kind: &TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> Result<()> {
        if self.eat(kind) {
            Ok(())
        } else {
            Err(CompilerError::SyntaxError(
                format!("expected {}, found {}", what, describe(self.peek())),
                self.loc(),
            ))
        }
    }

    fn expect_identifier(&mut self) -> Result<String> {
        match self.peek().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => bail_syntax_at!(self.loc(), "expected identifier, found {}", describe(&other)),
        }
    }

    fn is_at_end(&self) -> bool {
        matches!(self.peek(), TokenKind::Eof)
    }
}

fn assign_op(kind: &TokenKind) -> Option<AssignOp> {
    let op = match kind {
        TokenKind::Assign => AssignOp::Assign,
        TokenKind::PlusAssign => AssignOp::Add,
        TokenKind::MinusAssign => AssignOp::Sub,
        TokenKind::StarAssign => AssignOp::Mul,
        TokenKind::SlashAssign => AssignOp::Div,
        TokenKind::PercentAssign => AssignOp::Mod,
        TokenKind::ShlAssign => AssignOp::Shl,
        TokenKind::ShrAssign => AssignOp::Shr,
        TokenKind::AmpAssign => AssignOp::BitAnd,
        TokenKind::PipeAssign => AssignOp::BitOr,
        TokenKind::CaretAssign => AssignOp::BitXor,
        _ => return None,
    };
    Some(op)
}

/// Human-readable token for diagnostics.
fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end of file".to_string(),
        TokenKind::Identifier(name) => format!("'{}'", name),
        other => format!("'{}'", token_text(other)),
    }
}

fn token_text(kind: &TokenKind) -> String {
    let text = match kind {
        TokenKind::Identifier(name) => return name.clone(),
        TokenKind::IntLiteral(n) => return n.to_string(),
        TokenKind::UintLiteral(n) => return format!("{}u", n),
        TokenKind::FloatLiteral(v) | TokenKind::HalfLiteral(v) => return v.to_string(),
        TokenKind::StringLiteral(s) => return format!("\"{}\"", s),
        TokenKind::Assign => "=",
        TokenKind::Plus => "+",
        TokenKind::Minus => "-",
        TokenKind::Star => "*",
        TokenKind::Slash => "/",
        TokenKind::Comma => ",",
        TokenKind::Colon => ":",
        TokenKind::Semicolon => ";",
        TokenKind::Dot => ".",
        TokenKind::LeftParen => "(",
        TokenKind::RightParen => ")",
        TokenKind::LeftBracket => "[",
        TokenKind::RightBracket => "]",
        TokenKind::LeftBrace => "{",
        TokenKind::RightBrace => "}",
        TokenKind::Lt => "<",
        TokenKind::Gt => ">",
        other => return format!("{:?}", other).to_lowercase(),
    };
    text.to_string()
}

#[cfg(test)]
mod tests;
