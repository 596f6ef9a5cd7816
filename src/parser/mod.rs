pub mod ast;

use crate::diagnostics::CompileError;
use crate::lexer::token::Token;
use crate::span::{Span, Spanned};
use ast::*;

// Binding powers. Comparisons chain, so their operands parse one level above.
const BP_OR: u8 = 2;
const BP_AND: u8 = 4;
const BP_NOT: u8 = 8;
const BP_CMP: u8 = 8;
const BP_BITOR: u8 = 10;
const BP_UNARY: u8 = 22;

/// Deepest expression nesting accepted before reporting a syntax error.
const MAX_EXPR_DEPTH: usize = 100;

pub struct Parser<'a> {
    tokens: &'a [Spanned<Token>],
    source: &'a str,
    pos: usize,
    /// Current `parse_expr` recursion depth.
    depth: usize,
}

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Spanned<Token>], source: &'a str) -> Self {
        Self { tokens, source, pos: 0, depth: 0 }
    }

    fn peek(&self) -> Option<&'a Spanned<Token>> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos).map(|t| &t.node)
    }

    fn peek_nth(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n).map(|t| &t.node)
    }

    fn check(&self, expected: &Token) -> bool {
        self.peek_token()
            .is_some_and(|t| std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    fn advance(&mut self) -> Option<Spanned<Token>> {
        let tok = self.tokens.get(self.pos).cloned();
        if tok.is_some() {
            self.pos += 1;
        }
        tok
    }

    /// Consume the next token if it matches.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<Span, CompileError> {
        match self.tokens.get(self.pos) {
            Some(tok) if std::mem::discriminant(&tok.node) == std::mem::discriminant(expected) => {
                self.pos += 1;
                Ok(tok.span)
            }
            Some(tok) => Err(CompileError::syntax(
                format!("expected {expected}, found {}", tok.node),
                tok.span,
            )),
            None => Err(CompileError::syntax(
                format!("expected {expected}, found end of file"),
                self.eof_span(),
            )),
        }
    }

    fn expect_ident(&mut self) -> Result<Spanned<String>, CompileError> {
        match self.tokens.get(self.pos) {
            Some(tok) if matches!(tok.node, Token::Ident) => {
                let name = self.text(tok.span).to_string();
                self.pos += 1;
                Ok(Spanned::new(name, tok.span))
            }
            Some(tok) => Err(CompileError::syntax(
                format!("expected identifier, found {}", tok.node),
                tok.span,
            )),
            None => Err(CompileError::syntax(
                "expected identifier, found end of file",
                self.eof_span(),
            )),
        }
    }

    fn text(&self, span: Span) -> &'a str {
        &self.source[span.start..span.end]
    }

    fn eof_span(&self) -> Span {
        match self.tokens.last() {
            Some(last) => Span::new(last.span.end, last.span.end),
            None => Span::dummy(),
        }
    }

    fn current_span(&self) -> Span {
        self.peek().map_or_else(|| self.eof_span(), |t| t.span)
    }

    fn prev_end(&self) -> usize {
        if self.pos == 0 {
            return 0;
        }
        self.tokens[self.pos - 1].span.end
    }

    fn unexpected(&self, what: &str) -> CompileError {
        match self.peek() {
            Some(tok) => CompileError::syntax(format!("unexpected {} {what}", tok.node), tok.span),
            None => CompileError::syntax(format!("unexpected end of file {what}"), self.eof_span()),
        }
    }

    fn skip_newlines(&mut self) {
        while self.check(&Token::Newline) {
            self.pos += 1;
        }
    }

    fn end_simple_statement(&mut self) -> Result<(), CompileError> {
        match self.peek_token() {
            None => Ok(()),
            Some(Token::Newline) => {
                self.pos += 1;
                Ok(())
            }
            Some(Token::Dedent) => Ok(()),
            Some(_) => Err(self.unexpected("at end of statement")),
        }
    }

    pub fn parse_program(&mut self) -> Result<Program, CompileError> {
        let mut program = Program {
            imports: Vec::new(),
            functions: Vec::new(),
            classes: Vec::new(),
            constants: Vec::new(),
            other: Vec::new(),
            order: Vec::new(),
        };

        loop {
            self.skip_newlines();
            let Some(tok) = self.peek_token() else { break };
            match tok {
                Token::At | Token::Def | Token::Class => {
                    let decorators = self.parse_decorators()?;
                    if self.check(&Token::Class) {
                        let class = self.parse_class(decorators)?;
                        program.order.push((true, program.classes.len()));
                        program.classes.push(class);
                    } else {
                        let func = self.parse_function(decorators)?;
                        program.order.push((false, program.functions.len()));
                        program.functions.push(func);
                    }
                }
                Token::Import | Token::From => {
                    let imports = self.parse_import()?;
                    program.imports.extend(imports);
                }
                Token::Indent => return Err(CompileError::syntax("unexpected indent", self.current_span())),
                _ => {
                    for stmt in self.parse_statement()? {
                        match into_constant(stmt) {
                            Ok(constant) => program.constants.push(constant),
                            Err(stmt) => program.other.push(stmt),
                        }
                    }
                }
            }
        }

        Ok(program)
    }

    /// One declaration per imported module: `import a, b as c` yields two.
    fn parse_import(&mut self) -> Result<Vec<Spanned<ImportDecl>>, CompileError> {
        let start = self.current_span().start;
        if self.eat(&Token::From) {
            let module = self.parse_dotted_name()?;
            self.expect(&Token::Import)?;
            let parenthesized = self.eat(&Token::LParen);
            let mut names = Vec::new();
            if self.eat(&Token::Star) {
                let star = Spanned::new("*".to_string(), Span::new(self.prev_end() - 1, self.prev_end()));
                names.push(ImportName { name: star, alias: None });
            } else {
                loop {
                    let name = self.expect_ident()?;
                    let alias = if self.eat(&Token::As) { Some(self.expect_ident()?) } else { None };
                    names.push(ImportName { name, alias });
                    if !self.eat(&Token::Comma) || (parenthesized && self.check(&Token::RParen)) {
                        break;
                    }
                }
            }
            if parenthesized {
                self.expect(&Token::RParen)?;
            }
            let span = Span::new(start, self.prev_end());
            self.end_simple_statement()?;
            return Ok(vec![Spanned::new(ImportDecl { module, names, alias: None }, span)]);
        }

        self.expect(&Token::Import)?;
        let mut decls = Vec::new();
        loop {
            let item_start = self.current_span().start;
            let module = self.parse_dotted_name()?;
            let alias = if self.eat(&Token::As) { Some(self.expect_ident()?) } else { None };
            let span = Span::new(item_start, self.prev_end());
            decls.push(Spanned::new(ImportDecl { module, names: Vec::new(), alias }, span));
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.end_simple_statement()?;
        Ok(decls)
    }

    fn parse_dotted_name(&mut self) -> Result<Vec<Spanned<String>>, CompileError> {
        let mut parts = vec![self.expect_ident()?];
        while self.eat(&Token::Dot) {
            parts.push(self.expect_ident()?);
        }
        Ok(parts)
    }

    fn parse_decorators(&mut self) -> Result<Vec<Spanned<Decorator>>, CompileError> {
        let mut decorators = Vec::new();
        while self.check(&Token::At) {
            let start = self.expect(&Token::At)?.start;
            let name = self
                .parse_dotted_name()?
                .into_iter()
                .map(|p| p.node)
                .collect::<Vec<_>>()
                .join(".");
            let mut args = Vec::new();
            let mut kwargs = Vec::new();
            if self.eat(&Token::LParen) {
                let (positional, named) = self.parse_call_args()?;
                args = positional;
                kwargs = named;
                self.expect(&Token::RParen)?;
            }
            let span = Span::new(start, self.prev_end());
            self.expect(&Token::Newline)?;
            self.skip_newlines();
            decorators.push(Spanned::new(Decorator { name, args, kwargs }, span));
        }
        Ok(decorators)
    }

    fn parse_function(&mut self, decorators: Vec<Spanned<Decorator>>) -> Result<Spanned<Function>, CompileError> {
        let start = decorators.first().map_or(self.current_span().start, |d| d.span.start);
        self.expect(&Token::Def)?;
        let name = self.expect_ident()?;
        self.expect(&Token::LParen)?;

        let mut params = Vec::new();
        let mut star_args = None;
        let mut star_kwargs = None;
        let mut marker = None;
        while !self.check(&Token::RParen) {
            if self.check(&Token::Star) {
                let star = self.expect(&Token::Star)?;
                if self.check(&Token::Comma) || self.check(&Token::RParen) {
                    marker = Some(star);
                } else {
                    star_args = Some(self.parse_param()?);
                }
            } else if self.eat(&Token::StarStar) {
                star_kwargs = Some(self.parse_param()?);
            } else if self.check(&Token::Slash) {
                marker = Some(self.expect(&Token::Slash)?);
            } else {
                let param = self.parse_param()?;
                if param.default.is_none() && params.iter().any(|p: &Param| p.default.is_some()) && star_args.is_none() {
                    return Err(CompileError::syntax(
                        "non-default argument follows default argument",
                        param.name.span,
                    ));
                }
                params.push(param);
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen)?;

        let return_type = if self.eat(&Token::Arrow) { Some(self.parse_type()?) } else { None };
        let mut body = self.parse_block()?;
        let doc = take_docstring(&mut body.node);
        let span = Span::new(start, body.span.end);

        Ok(Spanned::new(
            Function {
                name,
                params,
                star_args,
                star_kwargs,
                return_type,
                decorators,
                body,
                doc,
                marker,
            },
            span,
        ))
    }

    fn parse_param(&mut self) -> Result<Param, CompileError> {
        let name = self.expect_ident()?;
        let ty = if self.eat(&Token::Colon) { Some(self.parse_type()?) } else { None };
        let default = if self.eat(&Token::Eq) { Some(self.parse_test()?) } else { None };
        Ok(Param { name, ty, default })
    }

    fn parse_class(&mut self, decorators: Vec<Spanned<Decorator>>) -> Result<Spanned<ClassDecl>, CompileError> {
        let start = decorators.first().map_or(self.current_span().start, |d| d.span.start);
        self.expect(&Token::Class)?;
        let name = self.expect_ident()?;

        let mut bases = Vec::new();
        if self.eat(&Token::LParen) {
            while !self.check(&Token::RParen) {
                let parts = self.parse_dotted_name()?;
                let span = parts[0].span.to(parts[parts.len() - 1].span);
                let joined = parts.into_iter().map(|p| p.node).collect::<Vec<_>>().join(".");
                if joined != "object" {
                    bases.push(Spanned::new(joined, span));
                }
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            self.expect(&Token::RParen)?;
        }
        let mut bases = bases.into_iter();
        let base = bases.next();
        let extra_bases: Vec<_> = bases.collect();

        self.expect(&Token::Colon)?;
        let mut class = ClassDecl {
            name,
            base,
            extra_bases,
            decorators,
            fields: Vec::new(),
            methods: Vec::new(),
            doc: None,
            unsupported: Vec::new(),
        };

        if !self.eat(&Token::Newline) {
            // `class C: pass` on one line
            for stmt in self.parse_simple_statements()? {
                self.class_member_stmt(&mut class, stmt);
            }
            let span = Span::new(start, self.prev_end());
            return Ok(Spanned::new(class, span));
        }
        self.expect(&Token::Indent)?;

        let mut first = true;
        loop {
            self.skip_newlines();
            match self.peek_token() {
                None => break,
                Some(Token::Dedent) => {
                    self.advance();
                    break;
                }
                Some(Token::At | Token::Def) => {
                    let decorators = self.parse_decorators()?;
                    if self.check(&Token::Class) {
                        let inner = self.parse_class(decorators)?;
                        class.unsupported.push(Spanned::new("nested class definition".to_string(), inner.span));
                    } else {
                        class.methods.push(self.parse_function(decorators)?);
                    }
                }
                Some(Token::Class) => {
                    let inner = self.parse_class(Vec::new())?;
                    class.unsupported.push(Spanned::new("nested class definition".to_string(), inner.span));
                }
                Some(Token::StringLit(doc)) if first => {
                    let doc = doc.clone();
                    self.advance();
                    self.end_simple_statement()?;
                    class.doc = Some(doc);
                }
                Some(_) => {
                    for stmt in self.parse_statement()? {
                        self.class_member_stmt(&mut class, stmt);
                    }
                }
            }
            first = false;
        }

        let span = Span::new(start, self.prev_end());
        Ok(Spanned::new(class, span))
    }

    fn class_member_stmt(&self, class: &mut ClassDecl, stmt: Spanned<Stmt>) {
        match stmt.node {
            Stmt::Pass => {}
            Stmt::Expr(Spanned { node: Expr::StringLit(_), .. }) => {}
            Stmt::AnnAssign { target: Spanned { node: Expr::Ident(name), span }, ty, value } => {
                class.fields.push(Field { name: Spanned::new(name, span), ty, default: value });
            }
            Stmt::Assign { .. } => class
                .unsupported
                .push(Spanned::new("class attribute without annotation".to_string(), stmt.span)),
            _ => class
                .unsupported
                .push(Spanned::new("statement in class body".to_string(), stmt.span)),
        }
    }

    /// `:` followed by either an indented suite or simple statements on the same line.
    fn parse_block(&mut self) -> Result<Spanned<Block>, CompileError> {
        let colon = self.expect(&Token::Colon)?;
        if !self.eat(&Token::Newline) {
            let stmts = self.parse_simple_statements()?;
            let span = Span::new(colon.end, self.prev_end());
            return Ok(Spanned::new(Block { stmts }, span));
        }

        self.skip_newlines();
        let start = self.expect(&Token::Indent)?.start;
        let mut stmts = Vec::new();
        loop {
            self.skip_newlines();
            match self.peek_token() {
                None => break,
                Some(Token::Dedent) => {
                    self.advance();
                    break;
                }
                Some(_) => stmts.extend(self.parse_statement()?),
            }
        }
        let span = Span::new(start, self.prev_end());
        Ok(Spanned::new(Block { stmts }, span))
    }

    fn parse_statement(&mut self) -> Result<Vec<Spanned<Stmt>>, CompileError> {
        let start = self.current_span().start;
        let stmt = match self.peek_token() {
            Some(Token::If) => self.parse_if_stmt()?,
            Some(Token::While) => self.parse_while_stmt()?,
            Some(Token::For) => self.parse_for_stmt()?,
            Some(Token::Try) => self.parse_try_stmt()?,
            Some(Token::Def | Token::At) => {
                let decorators = self.parse_decorators()?;
                let span = if self.check(&Token::Class) {
                    self.parse_class(decorators)?.span
                } else {
                    self.parse_function(decorators)?.span
                };
                Spanned::new(Stmt::Unsupported("nested definition".to_string()), span)
            }
            Some(Token::Class) => {
                let span = self.parse_class(Vec::new())?.span;
                Spanned::new(Stmt::Unsupported("nested class definition".to_string()), span)
            }
            Some(Token::With) => {
                self.advance();
                while !self.check(&Token::Colon) {
                    if self.advance().is_none() {
                        return Err(CompileError::syntax("expected ':' after with", self.eof_span()));
                    }
                }
                let body = self.parse_block()?;
                Spanned::new(Stmt::Unsupported("with statement".to_string()), Span::new(start, body.span.end))
            }
            _ => return self.parse_simple_statements(),
        };
        Ok(vec![stmt])
    }

    /// One or more `;`-separated simple statements ending at a newline.
    fn parse_simple_statements(&mut self) -> Result<Vec<Spanned<Stmt>>, CompileError> {
        let mut stmts = Vec::new();
        loop {
            stmts.extend(self.parse_simple_statement()?);
            if !self.eat(&Token::Semicolon) {
                break;
            }
            if self.check(&Token::Newline) {
                break;
            }
        }
        self.end_simple_statement()?;
        Ok(stmts)
    }

    fn parse_simple_statement(&mut self) -> Result<Vec<Spanned<Stmt>>, CompileError> {
        let start = self.current_span().start;
        let single = move |node, end| Ok(vec![Spanned::new(node, Span::new(start, end))]);

        match self.peek_token() {
            Some(Token::Pass) => {
                self.advance();
                return single(Stmt::Pass, self.prev_end());
            }
            Some(Token::Break) => {
                self.advance();
                return single(Stmt::Break, self.prev_end());
            }
            Some(Token::Continue) => {
                self.advance();
                return single(Stmt::Continue, self.prev_end());
            }
            Some(Token::Return) => {
                self.advance();
                let value = if self.starts_expr() { Some(self.parse_exprlist()?) } else { None };
                return single(Stmt::Return(value), self.prev_end());
            }
            Some(Token::Raise) => {
                self.advance();
                let exc = if self.starts_expr() { Some(self.parse_test()?) } else { None };
                if self.eat(&Token::From) {
                    self.parse_test()?;
                    return single(Stmt::Unsupported("raise ... from".to_string()), self.prev_end());
                }
                return single(Stmt::Raise { exc }, self.prev_end());
            }
            Some(Token::Import | Token::From) => {
                let import = self.parse_import_inline()?;
                return single(Stmt::Unsupported("import inside function".to_string()), import.end);
            }
            Some(Token::Global | Token::Nonlocal) => {
                let keyword = if self.check(&Token::Global) { "global" } else { "nonlocal" };
                self.advance();
                loop {
                    self.expect_ident()?;
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                return single(Stmt::Unsupported(format!("{keyword} declaration")), self.prev_end());
            }
            Some(Token::Del) => {
                self.advance();
                self.parse_exprlist()?;
                return single(Stmt::Unsupported("del statement".to_string()), self.prev_end());
            }
            Some(Token::Assert) => {
                self.advance();
                self.parse_test()?;
                if self.eat(&Token::Comma) {
                    self.parse_test()?;
                }
                return single(Stmt::Unsupported("assert statement".to_string()), self.prev_end());
            }
            _ => {}
        }

        let first = self.parse_exprlist()?;

        if self.check(&Token::Colon) {
            self.advance();
            let ty = self.parse_type()?;
            let value = if self.eat(&Token::Eq) { Some(self.parse_rhs()?) } else { None };
            let end = self.prev_end();
            return single(Stmt::AnnAssign { target: first, ty, value }, end);
        }

        if let Some(op) = self.peek_token().and_then(aug_assign_op) {
            self.advance();
            let value = self.parse_rhs()?;
            let end = self.prev_end();
            return single(Stmt::AugAssign { target: first, op, value }, end);
        }

        if self.check(&Token::Eq) {
            let mut targets = vec![first];
            let mut value = None;
            while self.eat(&Token::Eq) {
                let next = self.parse_rhs()?;
                if self.check(&Token::Eq) {
                    targets.push(next);
                } else {
                    value = Some(next);
                }
            }
            let Some(value) = value else {
                return Err(self.unexpected("in assignment"));
            };
            let end = self.prev_end();
            // `a = b = v` assigns the value to the last target, then copies it leftwards.
            let mut stmts = Vec::new();
            let mut source = value;
            for target in targets.into_iter().rev() {
                let copy = target.clone();
                stmts.push(Spanned::new(Stmt::Assign { target, value: source }, Span::new(start, end)));
                source = copy;
            }
            return Ok(stmts);
        }

        let end = first.span.end;
        single(Stmt::Expr(first), end)
    }

    fn parse_import_inline(&mut self) -> Result<Span, CompileError> {
        let start = self.current_span().start;
        while !matches!(self.peek_token(), None | Some(Token::Newline | Token::Semicolon)) {
            self.advance();
        }
        Ok(Span::new(start, self.prev_end()))
    }

    /// Right-hand side of an assignment: an expression list or a yield.
    fn parse_rhs(&mut self) -> Result<Spanned<Expr>, CompileError> {
        if self.check(&Token::Yield) {
            return self.parse_yield();
        }
        self.parse_exprlist()
    }

    fn parse_if_stmt(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.current_span().start;
        // Called for both `if` and `elif`.
        self.advance();
        let condition = self.parse_test()?;
        let then_block = self.parse_block()?;
        self.skip_newlines();

        let else_block = if self.check(&Token::Elif) {
            let nested = self.parse_if_stmt()?;
            let span = nested.span;
            Some(Spanned::new(Block { stmts: vec![nested] }, span))
        } else if self.eat(&Token::Else) {
            Some(self.parse_block()?)
        } else {
            None
        };

        let end = else_block.as_ref().map_or(then_block.span.end, |b| b.span.end);
        Ok(Spanned::new(
            Stmt::If { condition, then_block, else_block },
            Span::new(start, end),
        ))
    }

    fn parse_while_stmt(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.expect(&Token::While)?.start;
        let condition = self.parse_test()?;
        let body = self.parse_block()?;
        self.skip_newlines();
        if self.check(&Token::Else) {
            let else_block = self.parse_else_clause()?;
            return Ok(Spanned::new(
                Stmt::Unsupported("while ... else".to_string()),
                Span::new(start, else_block.end),
            ));
        }
        let end = body.span.end;
        Ok(Spanned::new(Stmt::While { condition, body }, Span::new(start, end)))
    }

    fn parse_for_stmt(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.expect(&Token::For)?.start;
        let var = self.parse_target_list()?;
        self.expect(&Token::In)?;
        let iterable = self.parse_exprlist()?;
        let body = self.parse_block()?;
        self.skip_newlines();
        if self.check(&Token::Else) {
            let else_block = self.parse_else_clause()?;
            return Ok(Spanned::new(
                Stmt::Unsupported("for ... else".to_string()),
                Span::new(start, else_block.end),
            ));
        }
        let end = body.span.end;
        Ok(Spanned::new(Stmt::For { var, iterable, body }, Span::new(start, end)))
    }

    fn parse_else_clause(&mut self) -> Result<Span, CompileError> {
        self.expect(&Token::Else)?;
        Ok(self.parse_block()?.span)
    }

    fn parse_try_stmt(&mut self) -> Result<Spanned<Stmt>, CompileError> {
        let start = self.expect(&Token::Try)?.start;
        let body = self.parse_block()?;
        self.skip_newlines();

        let mut handlers = Vec::new();
        while self.check(&Token::Except) {
            let except_span = self.expect(&Token::Except)?;
            let mut exc_type = None;
            let mut name = None;
            if !self.check(&Token::Colon) {
                let ty = self.parse_test()?;
                match ty.node {
                    Expr::Ident(n) => exc_type = Some(Spanned::new(n, ty.span)),
                    Expr::Attribute { attr, .. } => exc_type = Some(attr),
                    _ => {
                        return Err(CompileError::syntax(
                            "except clause expects a single exception class",
                            ty.span,
                        ));
                    }
                }
                if self.eat(&Token::As) {
                    name = Some(self.expect_ident()?);
                }
            }
            let handler_body = self.parse_block()?;
            self.skip_newlines();
            handlers.push(ExceptHandler { exc_type, name, body: handler_body, span: except_span });
        }

        let else_block = if !handlers.is_empty() && self.eat(&Token::Else) {
            let block = self.parse_block()?;
            self.skip_newlines();
            Some(block)
        } else {
            None
        };

        let finally_block = if self.eat(&Token::Finally) {
            Some(self.parse_block()?)
        } else {
            None
        };

        if handlers.is_empty() && finally_block.is_none() {
            return Err(CompileError::syntax("expected 'except' or 'finally' block", self.current_span()));
        }

        let end = self.prev_end();
        Ok(Spanned::new(
            Stmt::Try { body, handlers, else_block, finally_block },
            Span::new(start, end),
        ))
    }

    // ── Types ──

    fn parse_type(&mut self) -> Result<Spanned<TypeExpr>, CompileError> {
        let first = self.parse_type_atom()?;
        if !self.check(&Token::Pipe) {
            return Ok(first);
        }
        let start = first.span.start;
        let mut members = vec![first];
        while self.eat(&Token::Pipe) {
            members.push(self.parse_type_atom()?);
        }
        let span = Span::new(start, self.prev_end());
        Ok(Spanned::new(TypeExpr::Union(members), span))
    }

    fn parse_type_atom(&mut self) -> Result<Spanned<TypeExpr>, CompileError> {
        let span = self.current_span();
        match self.peek_token() {
            Some(Token::NoneKw) => {
                self.advance();
                Ok(Spanned::new(TypeExpr::NoneType, span))
            }
            Some(Token::StringLit(s)) => {
                let name = s.clone();
                self.advance();
                Ok(Spanned::new(TypeExpr::Forward(name), span))
            }
            Some(Token::LBracket) => {
                // Callable[[int], int] argument list
                self.advance();
                while !self.check(&Token::RBracket) {
                    self.parse_type()?;
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Spanned::new(TypeExpr::Other, Span::new(span.start, self.prev_end())))
            }
            Some(Token::Dot) => {
                // `...` in tuple[int, ...]
                for _ in 0..3 {
                    self.expect(&Token::Dot)?;
                }
                Ok(Spanned::new(TypeExpr::Other, Span::new(span.start, self.prev_end())))
            }
            Some(Token::Ident) => {
                let parts = self.parse_dotted_name()?;
                let mut names: Vec<String> = parts.into_iter().map(|p| p.node).collect();
                let base = names.pop().unwrap_or_default();
                let head = if names.is_empty() {
                    TypeExpr::Named(base.clone())
                } else {
                    TypeExpr::Qualified { module: names.join("."), name: base.clone() }
                };
                if !self.eat(&Token::LBracket) {
                    return Ok(Spanned::new(head, Span::new(span.start, self.prev_end())));
                }
                let mut args = Vec::new();
                while !self.check(&Token::RBracket) {
                    args.push(self.parse_type()?);
                    if !self.eat(&Token::Comma) {
                        break;
                    }
                }
                self.expect(&Token::RBracket)?;
                Ok(Spanned::new(TypeExpr::Generic { base, args }, Span::new(span.start, self.prev_end())))
            }
            _ => Err(self.unexpected("in type annotation")),
        }
    }

    // ── Expressions ──

    fn starts_expr(&self) -> bool {
        matches!(
            self.peek_token(),
            Some(
                Token::IntLit(_)
                    | Token::FloatLit(_)
                    | Token::StringLit(_)
                    | Token::Ident
                    | Token::True
                    | Token::False
                    | Token::NoneKw
                    | Token::LParen
                    | Token::LBracket
                    | Token::LBrace
                    | Token::Minus
                    | Token::Plus
                    | Token::Tilde
                    | Token::Not
                    | Token::Lambda
                    | Token::Star
                    | Token::Yield
            )
        )
    }

    /// Comma-separated expressions; more than one (or a trailing comma) makes a tuple.
    fn parse_exprlist(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let first = self.parse_test()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let start = first.span.start;
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if !self.starts_expr() {
                break;
            }
            items.push(self.parse_test()?);
        }
        Ok(Spanned::new(Expr::Tuple(items), Span::new(start, self.prev_end())))
    }

    /// Loop / comprehension targets: `i`, `k, v`, `(a, b)`.
    fn parse_target_list(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let first = self.parse_expr(BP_BITOR)?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let start = first.span.start;
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::In) {
                break;
            }
            items.push(self.parse_expr(BP_BITOR)?);
        }
        Ok(Spanned::new(Expr::Tuple(items), Span::new(start, self.prev_end())))
    }

    /// A full expression including the conditional form `a if c else b`.
    fn parse_test(&mut self) -> Result<Spanned<Expr>, CompileError> {
        if self.check(&Token::Lambda) {
            return self.parse_lambda();
        }
        let expr = self.parse_expr(0)?;
        if !self.check(&Token::If) {
            return Ok(expr);
        }
        self.advance();
        let condition = self.parse_expr(0)?;
        self.expect(&Token::Else)?;
        let else_expr = self.parse_test()?;
        let span = expr.span.to(else_expr.span);
        Ok(Spanned::new(
            Expr::IfExpr {
                condition: Box::new(condition),
                then_expr: Box::new(expr),
                else_expr: Box::new(else_expr),
            },
            span,
        ))
    }

    fn parse_lambda(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let start = self.expect(&Token::Lambda)?.start;
        while !self.check(&Token::Colon) {
            if self.advance().is_none() {
                return Err(CompileError::syntax("expected ':' in lambda", self.eof_span()));
            }
        }
        self.expect(&Token::Colon)?;
        let body = self.parse_test()?;
        Ok(Spanned::new(
            Expr::Unsupported("lambda expression".to_string()),
            Span::new(start, body.span.end),
        ))
    }

    fn parse_yield(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let span = self.expect(&Token::Yield)?;
        if self.eat(&Token::From) {
            let inner = self.parse_test()?;
            return Ok(Spanned::new(
                Expr::Unsupported("yield from".to_string()),
                span.to(inner.span),
            ));
        }
        if !self.starts_expr() {
            return Ok(Spanned::new(Expr::Yield(None), span));
        }
        let value = self.parse_exprlist()?;
        let full = span.to(value.span);
        Ok(Spanned::new(Expr::Yield(Some(Box::new(value))), full))
    }

    fn parse_expr(&mut self, min_bp: u8) -> Result<Spanned<Expr>, CompileError> {
        if self.depth >= MAX_EXPR_DEPTH {
            return Err(CompileError::syntax("too many nested parentheses", self.current_span()));
        }
        self.depth += 1;
        let result = self.parse_binary(min_bp);
        self.depth -= 1;
        result
    }

    /// Pratt loop over infix operators with binding power at least `min_bp`.
    fn parse_binary(&mut self, min_bp: u8) -> Result<Spanned<Expr>, CompileError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let Some(tok) = self.peek_token() else { break };

            // Boolean operators
            if let Some((op, l_bp, r_bp)) = match tok {
                Token::Or => Some((BoolOp::Or, BP_OR, BP_OR + 1)),
                Token::And => Some((BoolOp::And, BP_AND, BP_AND + 1)),
                _ => None,
            } {
                if l_bp < min_bp {
                    break;
                }
                self.advance();
                let rhs = self.parse_expr(r_bp)?;
                let span = lhs.span.to(rhs.span);
                lhs = Spanned::new(Expr::BoolOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span);
                continue;
            }

            // Comparisons, collected into a single chain
            if self.peek_cmp_op().is_some() {
                if BP_CMP < min_bp {
                    break;
                }
                let mut ops = Vec::new();
                let mut rest = Vec::new();
                while let Some((op, width)) = self.peek_cmp_op() {
                    self.pos += width;
                    ops.push(op);
                    rest.push(self.parse_expr(BP_BITOR)?);
                }
                let end = rest.last().map_or(lhs.span, |r| r.span);
                let span = lhs.span.to(end);
                lhs = Spanned::new(Expr::Compare { first: Box::new(lhs), ops, rest }, span);
                continue;
            }

            let Some(op) = binop_for(tok) else { break };
            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.advance();
            let rhs = self.parse_expr(r_bp)?;
            let span = lhs.span.to(rhs.span);
            lhs = Spanned::new(Expr::BinOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, span);
        }

        Ok(lhs)
    }

    fn peek_cmp_op(&self) -> Option<(CmpOp, usize)> {
        let op = match self.peek_token()? {
            Token::EqEq => (CmpOp::Eq, 1),
            Token::BangEq => (CmpOp::NotEq, 1),
            Token::Lt => (CmpOp::Lt, 1),
            Token::LtEq => (CmpOp::LtEq, 1),
            Token::Gt => (CmpOp::Gt, 1),
            Token::GtEq => (CmpOp::GtEq, 1),
            Token::In => (CmpOp::In, 1),
            Token::Not if matches!(self.peek_nth(1), Some(Token::In)) => (CmpOp::NotIn, 2),
            Token::Is if matches!(self.peek_nth(1), Some(Token::Not)) => (CmpOp::IsNot, 2),
            Token::Is => (CmpOp::Is, 1),
            _ => return None,
        };
        Some(op)
    }

    fn parse_prefix(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let span = self.current_span();
        let unary = match self.peek_token() {
            Some(Token::Minus) => Some((UnaryOp::Neg, BP_UNARY)),
            Some(Token::Plus) => Some((UnaryOp::Pos, BP_UNARY)),
            Some(Token::Tilde) => Some((UnaryOp::Invert, BP_UNARY)),
            Some(Token::Not) => Some((UnaryOp::Not, BP_NOT)),
            _ => None,
        };
        if let Some((op, bp)) = unary {
            self.advance();
            let operand = self.parse_expr(bp)?;
            let full = span.to(operand.span);
            return Ok(Spanned::new(Expr::UnaryOp { op, operand: Box::new(operand) }, full));
        }
        if self.check(&Token::Star) {
            self.advance();
            let operand = self.parse_expr(BP_BITOR)?;
            return Ok(Spanned::new(
                Expr::Unsupported("starred expression".to_string()),
                span.to(operand.span),
            ));
        }
        if self.check(&Token::Yield) {
            return self.parse_yield();
        }
        if self.check(&Token::Lambda) {
            return self.parse_lambda();
        }

        let atom = self.parse_atom()?;
        self.parse_postfix(atom)
    }

    fn parse_atom(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let Some(tok) = self.advance() else {
            return Err(CompileError::syntax("unexpected end of file in expression", self.eof_span()));
        };
        let span = tok.span;
        let node = match tok.node {
            Token::IntLit(n) => Expr::IntLit(n),
            Token::FloatLit(f) => Expr::FloatLit(f),
            Token::True => Expr::BoolLit(true),
            Token::False => Expr::BoolLit(false),
            Token::NoneKw => Expr::NoneLit,
            Token::StringLit(mut s) => {
                // Adjacent literals concatenate.
                let mut end = span.end;
                while let Some(Token::StringLit(next)) = self.peek_token() {
                    s.push_str(next);
                    end = self.current_span().end;
                    self.advance();
                }
                return Ok(Spanned::new(Expr::StringLit(s), Span::new(span.start, end)));
            }
            Token::Ident => {
                let name = self.text(span);
                if matches!(self.peek_token(), Some(Token::StringLit(_)))
                    && span.end == self.current_span().start
                {
                    // f"...", b"..." and friends
                    let lit_end = self.current_span().end;
                    self.advance();
                    return Ok(Spanned::new(
                        Expr::Unsupported(format!("{name}-prefixed string literal")),
                        Span::new(span.start, lit_end),
                    ));
                }
                Expr::Ident(name.to_string())
            }
            Token::LParen => return self.parse_paren(span),
            Token::LBracket => return self.parse_list_display(span),
            Token::LBrace => return self.parse_brace_display(span),
            Token::Dot if self.check(&Token::Dot) && matches!(self.peek_nth(1), Some(Token::Dot)) => {
                self.advance();
                self.advance();
                return Ok(Spanned::new(
                    Expr::Unsupported("ellipsis".to_string()),
                    Span::new(span.start, self.prev_end()),
                ));
            }
            other => {
                return Err(CompileError::syntax(format!("unexpected {other} in expression"), span));
            }
        };
        Ok(Spanned::new(node, span))
    }

    fn parse_paren(&mut self, open: Span) -> Result<Spanned<Expr>, CompileError> {
        if self.eat(&Token::RParen) {
            return Ok(Spanned::new(Expr::Tuple(Vec::new()), Span::new(open.start, self.prev_end())));
        }
        if self.check(&Token::Yield) {
            let value = self.parse_yield()?;
            self.expect(&Token::RParen)?;
            return Ok(value);
        }
        let first = self.parse_test()?;
        if self.check(&Token::For) {
            self.parse_comprehension_tail()?;
            self.expect(&Token::RParen)?;
            return Ok(Spanned::new(
                Expr::Unsupported("generator expression".to_string()),
                Span::new(open.start, self.prev_end()),
            ));
        }
        if !self.check(&Token::Comma) {
            self.expect(&Token::RParen)?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RParen) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(&Token::RParen)?;
        Ok(Spanned::new(Expr::Tuple(items), Span::new(open.start, self.prev_end())))
    }

    fn parse_list_display(&mut self, open: Span) -> Result<Spanned<Expr>, CompileError> {
        if self.eat(&Token::RBracket) {
            return Ok(Spanned::new(Expr::List(Vec::new()), Span::new(open.start, self.prev_end())));
        }
        let first = self.parse_test()?;
        if self.check(&Token::For) {
            let (clauses, condition) = self.parse_comprehension_tail()?;
            self.expect(&Token::RBracket)?;
            let span = Span::new(open.start, self.prev_end());
            let mut clauses = clauses.into_iter();
            let (Some((var, iterable)), None) = (clauses.next(), clauses.next()) else {
                return Ok(Spanned::new(Expr::Unsupported("nested comprehension".to_string()), span));
            };
            return Ok(Spanned::new(
                Expr::ListComp {
                    element: Box::new(first),
                    var: Box::new(var),
                    iterable: Box::new(iterable),
                    condition: condition.map(Box::new),
                },
                span,
            ));
        }
        let items = self.parse_display_rest(first, &Token::RBracket)?;
        Ok(Spanned::new(Expr::List(items), Span::new(open.start, self.prev_end())))
    }

    fn parse_brace_display(&mut self, open: Span) -> Result<Spanned<Expr>, CompileError> {
        if self.eat(&Token::RBrace) {
            return Ok(Spanned::new(Expr::Dict(Vec::new()), Span::new(open.start, self.prev_end())));
        }
        let first = self.parse_test()?;
        if self.eat(&Token::Colon) {
            let value = self.parse_test()?;
            if self.check(&Token::For) {
                self.parse_comprehension_tail()?;
                self.expect(&Token::RBrace)?;
                return Ok(Spanned::new(
                    Expr::Unsupported("dict comprehension".to_string()),
                    Span::new(open.start, self.prev_end()),
                ));
            }
            let mut pairs = vec![(first, value)];
            while self.eat(&Token::Comma) {
                if self.check(&Token::RBrace) {
                    break;
                }
                let key = self.parse_test()?;
                self.expect(&Token::Colon)?;
                let value = self.parse_test()?;
                pairs.push((key, value));
            }
            self.expect(&Token::RBrace)?;
            return Ok(Spanned::new(Expr::Dict(pairs), Span::new(open.start, self.prev_end())));
        }
        if self.check(&Token::For) {
            self.parse_comprehension_tail()?;
            self.expect(&Token::RBrace)?;
            return Ok(Spanned::new(
                Expr::Unsupported("set comprehension".to_string()),
                Span::new(open.start, self.prev_end()),
            ));
        }
        let items = self.parse_display_rest(first, &Token::RBrace)?;
        Ok(Spanned::new(Expr::Set(items), Span::new(open.start, self.prev_end())))
    }

    fn parse_display_rest(
        &mut self,
        first: Spanned<Expr>,
        close: &Token,
    ) -> Result<Vec<Spanned<Expr>>, CompileError> {
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(close) {
                break;
            }
            items.push(self.parse_test()?);
        }
        self.expect(close)?;
        Ok(items)
    }

    /// `for x in xs [if cond]` clauses; returns every (target, iterable) and the
    /// filter when exactly one is given.
    #[allow(clippy::type_complexity)]
    fn parse_comprehension_tail(
        &mut self,
    ) -> Result<(Vec<(Spanned<Expr>, Spanned<Expr>)>, Option<Spanned<Expr>>), CompileError> {
        let mut clauses = Vec::new();
        let mut conditions = Vec::new();
        while self.eat(&Token::For) {
            let var = self.parse_target_list()?;
            self.expect(&Token::In)?;
            let iterable = self.parse_expr(BP_OR)?;
            clauses.push((var, iterable));
            while self.eat(&Token::If) {
                conditions.push(self.parse_expr(BP_OR)?);
            }
        }
        let condition = match conditions.len() {
            0 => None,
            1 => conditions.pop(),
            _ => {
                // Multiple filters fold into one `and` chain.
                let mut iter = conditions.into_iter();
                let mut acc = iter.next();
                for next in iter {
                    if let Some(prev) = acc.take() {
                        let span = prev.span.to(next.span);
                        acc = Some(Spanned::new(
                            Expr::BoolOp { op: BoolOp::And, lhs: Box::new(prev), rhs: Box::new(next) },
                            span,
                        ));
                    }
                }
                acc
            }
        };
        Ok((clauses, condition))
    }

    fn parse_postfix(&mut self, mut lhs: Spanned<Expr>) -> Result<Spanned<Expr>, CompileError> {
        loop {
            match self.peek_token() {
                Some(Token::Dot) => {
                    self.advance();
                    let attr = self.expect_ident()?;
                    let span = lhs.span.to(attr.span);
                    lhs = Spanned::new(Expr::Attribute { object: Box::new(lhs), attr }, span);
                }
                Some(Token::LParen) => {
                    self.advance();
                    let (args, kwargs) = self.parse_call_args()?;
                    let close = self.expect(&Token::RParen)?;
                    let span = lhs.span.to(close);
                    lhs = Spanned::new(Expr::Call { func: Box::new(lhs), args, kwargs }, span);
                }
                Some(Token::LBracket) => {
                    self.advance();
                    let index = self.parse_subscript()?;
                    let close = self.expect(&Token::RBracket)?;
                    let span = lhs.span.to(close);
                    lhs = Spanned::new(
                        Expr::Index { object: Box::new(lhs), index: Box::new(index) },
                        span,
                    );
                }
                _ => break,
            }
        }
        Ok(lhs)
    }

    #[allow(clippy::type_complexity)]
    fn parse_call_args(
        &mut self,
    ) -> Result<(Vec<Spanned<Expr>>, Vec<(Spanned<String>, Spanned<Expr>)>), CompileError> {
        let mut args = Vec::new();
        let mut kwargs: Vec<(Spanned<String>, Spanned<Expr>)> = Vec::new();
        while !self.check(&Token::RParen) {
            if self.check(&Token::Ident) && matches!(self.peek_nth(1), Some(Token::Eq)) {
                let key = self.expect_ident()?;
                self.expect(&Token::Eq)?;
                let value = self.parse_test()?;
                kwargs.push((key, value));
            } else if self.check(&Token::StarStar) {
                let start = self.expect(&Token::StarStar)?;
                let value = self.parse_test()?;
                args.push(Spanned::new(
                    Expr::Unsupported("keyword argument unpacking".to_string()),
                    start.to(value.span),
                ));
            } else {
                let arg = self.parse_test()?;
                if self.check(&Token::For) {
                    self.parse_comprehension_tail()?;
                    let span = Span::new(arg.span.start, self.prev_end());
                    args.push(Spanned::new(Expr::Unsupported("generator expression".to_string()), span));
                } else {
                    if !kwargs.is_empty() {
                        return Err(CompileError::syntax(
                            "positional argument follows keyword argument",
                            arg.span,
                        ));
                    }
                    args.push(arg);
                }
            }
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        Ok((args, kwargs))
    }

    fn parse_subscript(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let start = self.current_span().start;
        let first = self.parse_slice_item()?;
        if !self.check(&Token::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat(&Token::Comma) {
            if self.check(&Token::RBracket) {
                break;
            }
            items.push(self.parse_slice_item()?);
        }
        Ok(Spanned::new(Expr::Tuple(items), Span::new(start, self.prev_end())))
    }

    fn parse_slice_item(&mut self) -> Result<Spanned<Expr>, CompileError> {
        let start = self.current_span().start;
        let lower = if self.check(&Token::Colon) { None } else { Some(self.parse_test()?) };
        if !self.eat(&Token::Colon) {
            return lower.ok_or_else(|| self.unexpected("in subscript"));
        }
        let bound_ends = |p: &Self| matches!(p.peek_token(), Some(Token::Colon | Token::RBracket | Token::Comma));
        let upper = if bound_ends(self) { None } else { Some(self.parse_test()?) };
        let step = if self.eat(&Token::Colon) && !bound_ends(self) {
            Some(self.parse_test()?)
        } else {
            None
        };
        Ok(Spanned::new(
            Expr::Slice {
                lower: lower.map(Box::new),
                upper: upper.map(Box::new),
                step: step.map(Box::new),
            },
            Span::new(start, self.prev_end()),
        ))
    }
}

fn binop_for(tok: &Token) -> Option<BinOp> {
    let op = match tok {
        Token::Plus => BinOp::Add,
        Token::Minus => BinOp::Sub,
        Token::Star => BinOp::Mul,
        Token::Slash => BinOp::Div,
        Token::SlashSlash => BinOp::FloorDiv,
        Token::Percent => BinOp::Mod,
        Token::StarStar => BinOp::Pow,
        Token::Amp => BinOp::BitAnd,
        Token::Pipe => BinOp::BitOr,
        Token::Caret => BinOp::BitXor,
        Token::Shl => BinOp::Shl,
        Token::Shr => BinOp::Shr,
        _ => return None,
    };
    Some(op)
}

fn aug_assign_op(tok: &Token) -> Option<BinOp> {
    let op = match tok {
        Token::PlusEq => BinOp::Add,
        Token::MinusEq => BinOp::Sub,
        Token::StarEq => BinOp::Mul,
        Token::SlashEq => BinOp::Div,
        Token::SlashSlashEq => BinOp::FloorDiv,
        Token::PercentEq => BinOp::Mod,
        Token::StarStarEq => BinOp::Pow,
        Token::AmpEq => BinOp::BitAnd,
        Token::PipeEq => BinOp::BitOr,
        Token::CaretEq => BinOp::BitXor,
        Token::ShlEq => BinOp::Shl,
        Token::ShrEq => BinOp::Shr,
        _ => return None,
    };
    Some(op)
}

fn infix_binding_power(op: BinOp) -> (u8, u8) {
    match op {
        BinOp::BitOr => (10, 11),
        BinOp::BitXor => (12, 13),
        BinOp::BitAnd => (14, 15),
        BinOp::Shl | BinOp::Shr => (16, 17),
        BinOp::Add | BinOp::Sub => (18, 19),
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => (20, 21),
        // Right-associative and tighter than unary minus on its left.
        BinOp::Pow => (25, 24),
    }
}

/// Remove a leading string-literal statement and return its text.
fn take_docstring(block: &mut Block) -> Option<String> {
    match block.stmts.first() {
        Some(Spanned { node: Stmt::Expr(Spanned { node: Expr::StringLit(s), .. }), .. }) => {
            let doc = s.clone();
            block.stmts.remove(0);
            Some(doc)
        }
        _ => None,
    }
}

fn is_literal(expr: &Expr) -> bool {
    match expr {
        Expr::IntLit(_) | Expr::FloatLit(_) | Expr::BoolLit(_) | Expr::StringLit(_) => true,
        Expr::UnaryOp { op: UnaryOp::Neg, operand } => {
            matches!(operand.node, Expr::IntLit(_) | Expr::FloatLit(_))
        }
        _ => false,
    }
}

/// Module-level `NAME = literal` / `NAME: T = literal` become foldable constants.
fn into_constant(stmt: Spanned<Stmt>) -> Result<Spanned<ConstDecl>, Spanned<Stmt>> {
    let span = stmt.span;
    match stmt.node {
        Stmt::Assign { target: Spanned { node: Expr::Ident(name), span: name_span }, value }
            if is_literal(&value.node) =>
        {
            Ok(Spanned::new(ConstDecl { name: Spanned::new(name, name_span), ty: None, value }, span))
        }
        Stmt::AnnAssign { target: Spanned { node: Expr::Ident(name), span: name_span }, ty, value: Some(value) }
            if is_literal(&value.node) =>
        {
            Ok(Spanned::new(
                ConstDecl { name: Spanned::new(name, name_span), ty: Some(ty), value },
                span,
            ))
        }
        node => Err(Spanned::new(node, span)),
    }
}

/// Lex and parse one source file.
pub fn parse_source(source: &str) -> Result<Program, CompileError> {
    let tokens = crate::lexer::lex(source)?;
    Parser::new(&tokens, source).parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_source(src).unwrap()
    }

    fn body(prog: &Program) -> &[Spanned<Stmt>] {
        &prog.functions[0].node.body.node.stmts
    }

    fn first_expr(src: &str) -> Expr {
        let prog = parse(&format!("def f():\n    return {src}\n"));
        match &body(&prog)[0].node {
            Stmt::Return(Some(e)) => e.node.clone(),
            other => panic!("expected return, got {other:?}"),
        }
    }

    #[test]
    fn parse_function_with_annotations() {
        let prog = parse("def add(a: int, b: int) -> int:\n    return a + b\n");
        let f = &prog.functions[0].node;
        assert_eq!(f.name.node, "add");
        assert_eq!(f.params.len(), 2);
        assert_eq!(f.params[1].name.node, "b");
        assert_eq!(f.params[0].ty.as_ref().unwrap().node, TypeExpr::Named("int".into()));
        assert_eq!(f.return_type.as_ref().unwrap().node, TypeExpr::Named("int".into()));
    }

    #[test]
    fn parse_defaults_and_collectors() {
        let prog = parse("def f(a, b: int = 2, *args, **kw) -> None:\n    pass\n");
        let f = &prog.functions[0].node;
        assert!(f.params[1].default.is_some());
        assert_eq!(f.star_args.as_ref().unwrap().name.node, "args");
        assert_eq!(f.star_kwargs.as_ref().unwrap().name.node, "kw");
        assert_eq!(f.return_type.as_ref().unwrap().node, TypeExpr::NoneType);
    }

    #[test]
    fn parse_non_default_after_default_is_error() {
        assert!(parse_source("def f(a=1, b):\n    pass\n").is_err());
    }

    #[test]
    fn parse_generic_and_union_types() {
        let prog = parse("def f(x: list[int], y: tuple[int, float], z: int | None):\n    pass\n");
        let f = &prog.functions[0].node;
        match &f.params[1].ty.as_ref().unwrap().node {
            TypeExpr::Generic { base, args } => {
                assert_eq!(base, "tuple");
                assert_eq!(args.len(), 2);
            }
            other => panic!("expected generic, got {other:?}"),
        }
        assert!(matches!(f.params[2].ty.as_ref().unwrap().node, TypeExpr::Union(_)));
    }

    #[test]
    fn parse_docstring_is_removed_from_body() {
        let prog = parse("def f():\n    \"\"\"Adds things.\"\"\"\n    return 1\n");
        let f = &prog.functions[0].node;
        assert_eq!(f.doc.as_deref(), Some("Adds things."));
        assert_eq!(f.body.node.stmts.len(), 1);
    }

    #[test]
    fn parse_operator_precedence() {
        match first_expr("1 + 2 * 3") {
            Expr::BinOp { op: BinOp::Add, rhs, .. } => {
                assert!(matches!(rhs.node, Expr::BinOp { op: BinOp::Mul, .. }));
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn parse_power_binds_tighter_than_unary_minus() {
        match first_expr("-2 ** 2") {
            Expr::UnaryOp { op: UnaryOp::Neg, operand } => {
                assert!(matches!(operand.node, Expr::BinOp { op: BinOp::Pow, .. }));
            }
            other => panic!("expected negation, got {other:?}"),
        }
    }

    #[test]
    fn parse_power_is_right_associative() {
        match first_expr("2 ** 3 ** 2") {
            Expr::BinOp { op: BinOp::Pow, lhs, rhs } => {
                assert!(matches!(lhs.node, Expr::IntLit(2)));
                assert!(matches!(rhs.node, Expr::BinOp { op: BinOp::Pow, .. }));
            }
            other => panic!("expected power, got {other:?}"),
        }
    }

    #[test]
    fn parse_chained_comparison() {
        match first_expr("a < b <= c") {
            Expr::Compare { ops, rest, .. } => {
                assert_eq!(ops, vec![CmpOp::Lt, CmpOp::LtEq]);
                assert_eq!(rest.len(), 2);
            }
            other => panic!("expected compare, got {other:?}"),
        }
    }

    #[test]
    fn parse_not_in_and_is_not() {
        match first_expr("a not in b") {
            Expr::Compare { ops, .. } => assert_eq!(ops, vec![CmpOp::NotIn]),
            other => panic!("expected compare, got {other:?}"),
        }
        match first_expr("a is not None") {
            Expr::Compare { ops, .. } => assert_eq!(ops, vec![CmpOp::IsNot]),
            other => panic!("expected compare, got {other:?}"),
        }
    }

    #[test]
    fn parse_boolean_precedence() {
        match first_expr("a or b and not c") {
            Expr::BoolOp { op: BoolOp::Or, rhs, .. } => match &rhs.node {
                Expr::BoolOp { op: BoolOp::And, rhs, .. } => {
                    assert!(matches!(rhs.node, Expr::UnaryOp { op: UnaryOp::Not, .. }));
                }
                other => panic!("expected and, got {other:?}"),
            },
            other => panic!("expected or, got {other:?}"),
        }
    }

    #[test]
    fn parse_conditional_expression() {
        assert!(matches!(first_expr("x if x > 0 else -x"), Expr::IfExpr { .. }));
    }

    #[test]
    fn parse_call_with_keywords() {
        match first_expr("f(1, y=2)") {
            Expr::Call { args, kwargs, .. } => {
                assert_eq!(args.len(), 1);
                assert_eq!(kwargs[0].0.node, "y");
            }
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parse_method_call_and_subscript() {
        match first_expr("self.items[i].get()") {
            Expr::Call { func, .. } => match &func.node {
                Expr::Attribute { object, attr } => {
                    assert_eq!(attr.node, "get");
                    assert!(matches!(object.node, Expr::Index { .. }));
                }
                other => panic!("expected attribute, got {other:?}"),
            },
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[test]
    fn parse_slices() {
        match first_expr("xs[1:]") {
            Expr::Index { index, .. } => match &index.node {
                Expr::Slice { lower, upper, step } => {
                    assert!(lower.is_some());
                    assert!(upper.is_none());
                    assert!(step.is_none());
                }
                other => panic!("expected slice, got {other:?}"),
            },
            other => panic!("expected index, got {other:?}"),
        }
        assert!(matches!(first_expr("xs[::2]"), Expr::Index { .. }));
    }

    #[test]
    fn parse_displays() {
        assert!(matches!(first_expr("[1, 2, 3]"), Expr::List(ref v) if v.len() == 3));
        assert!(matches!(first_expr("(1,)"), Expr::Tuple(ref v) if v.len() == 1));
        assert!(matches!(first_expr("{}"), Expr::Dict(ref v) if v.is_empty()));
        assert!(matches!(first_expr("{'a': 1}"), Expr::Dict(ref v) if v.len() == 1));
        assert!(matches!(first_expr("{1, 2}"), Expr::Set(ref v) if v.len() == 2));
        assert!(matches!(first_expr("1, 2"), Expr::Tuple(ref v) if v.len() == 2));
    }

    #[test]
    fn parse_list_comprehension() {
        match first_expr("[x * x for x in xs if x > 0]") {
            Expr::ListComp { condition, .. } => assert!(condition.is_some()),
            other => panic!("expected comprehension, got {other:?}"),
        }
    }

    #[test]
    fn parse_generator_expression_is_unsupported() {
        assert!(matches!(first_expr("sum(x for x in xs)"), Expr::Call { .. }));
        assert!(matches!(first_expr("(x for x in xs)"), Expr::Unsupported(_)));
    }

    #[test]
    fn parse_if_elif_else() {
        let prog = parse("def f(x):\n    if x:\n        return 1\n    elif x > 2:\n        return 2\n    else:\n        return 3\n");
        match &body(&prog)[0].node {
            Stmt::If { else_block: Some(else_block), .. } => {
                assert!(matches!(else_block.node.stmts[0].node, Stmt::If { else_block: Some(_), .. }));
            }
            other => panic!("expected if, got {other:?}"),
        }
    }

    #[test]
    fn parse_for_with_tuple_target() {
        let prog = parse("def f(d):\n    for k, v in d.items():\n        pass\n");
        match &body(&prog)[0].node {
            Stmt::For { var, .. } => assert!(matches!(var.node, Expr::Tuple(ref v) if v.len() == 2)),
            other => panic!("expected for, got {other:?}"),
        }
    }

    #[test]
    fn parse_assignment_forms() {
        let prog = parse("def f():\n    x: int = 1\n    x += 2\n    a, b = b, a\n    p.x = 3\n");
        let stmts = body(&prog);
        assert!(matches!(stmts[0].node, Stmt::AnnAssign { .. }));
        assert!(matches!(stmts[1].node, Stmt::AugAssign { op: BinOp::Add, .. }));
        assert!(matches!(stmts[2].node, Stmt::Assign { target: Spanned { node: Expr::Tuple(_), .. }, .. }));
        assert!(matches!(stmts[3].node, Stmt::Assign { target: Spanned { node: Expr::Attribute { .. }, .. }, .. }));
    }

    #[test]
    fn parse_chained_assignment_copies_leftwards() {
        let prog = parse("def f():\n    a = b = 0\n");
        let stmts = body(&prog);
        assert_eq!(stmts.len(), 2);
        match (&stmts[0].node, &stmts[1].node) {
            (Stmt::Assign { target: t0, value: v0 }, Stmt::Assign { target: t1, value: v1 }) => {
                assert!(matches!(&t0.node, Expr::Ident(n) if n == "b"));
                assert!(matches!(v0.node, Expr::IntLit(0)));
                assert!(matches!(&t1.node, Expr::Ident(n) if n == "a"));
                assert!(matches!(&v1.node, Expr::Ident(n) if n == "b"));
            }
            other => panic!("unexpected statements {other:?}"),
        }
    }

    #[test]
    fn parse_semicolon_separated_statements() {
        let prog = parse("def f():\n    a = 1; b = 2\n");
        assert_eq!(body(&prog).len(), 2);
    }

    #[test]
    fn parse_try_except_finally() {
        let src = "def f():\n    try:\n        g()\n    except ValueError as e:\n        pass\n    except:\n        raise\n    else:\n        pass\n    finally:\n        pass\n";
        let prog = parse(src);
        match &body(&prog)[0].node {
            Stmt::Try { handlers, else_block, finally_block, .. } => {
                assert_eq!(handlers.len(), 2);
                assert_eq!(handlers[0].exc_type.as_ref().unwrap().node, "ValueError");
                assert_eq!(handlers[0].name.as_ref().unwrap().node, "e");
                assert!(handlers[1].exc_type.is_none());
                assert!(else_block.is_some());
                assert!(finally_block.is_some());
            }
            other => panic!("expected try, got {other:?}"),
        }
    }

    #[test]
    fn parse_yield_forms() {
        let prog = parse("def g(n: int):\n    yield n\n    x = yield\n");
        let stmts = body(&prog);
        assert!(matches!(stmts[0].node, Stmt::Expr(Spanned { node: Expr::Yield(Some(_)), .. })));
        assert!(matches!(stmts[1].node, Stmt::Assign { value: Spanned { node: Expr::Yield(None), .. }, .. }));
    }

    #[test]
    fn parse_class_with_fields_and_methods() {
        let src = "class Point(Base):\n    \"\"\"A point.\"\"\"\n    x: int\n    y: int = 0\n\n    def norm(self) -> int:\n        return self.x\n\n    @staticmethod\n    def origin() -> int:\n        return 0\n";
        let prog = parse(src);
        let c = &prog.classes[0].node;
        assert_eq!(c.name.node, "Point");
        assert_eq!(c.base.as_ref().unwrap().node, "Base");
        assert_eq!(c.doc.as_deref(), Some("A point."));
        assert_eq!(c.fields.len(), 2);
        assert!(c.fields[1].default.is_some());
        assert_eq!(c.methods.len(), 2);
        assert!(c.methods[1].node.has_decorator("staticmethod"));
    }

    #[test]
    fn parse_object_base_is_dropped() {
        let prog = parse("class A(object):\n    pass\n");
        assert!(prog.classes[0].node.base.is_none());
    }

    #[test]
    fn parse_multiple_bases_are_kept_for_reporting() {
        let prog = parse("class C(A, B):\n    pass\n");
        let c = &prog.classes[0].node;
        assert_eq!(c.base.as_ref().unwrap().node, "A");
        assert_eq!(c.extra_bases.len(), 1);
    }

    #[test]
    fn parse_module_constants_and_imports() {
        let prog = parse("import micropython\nfrom typing import Final\nN = 10\nM: Final = -3\nx = compute()\n");
        assert_eq!(prog.imports.len(), 2);
        assert_eq!(prog.imports[1].node.names[0].name.node, "Final");
        assert_eq!(prog.constants.len(), 2);
        assert_eq!(prog.constants[1].node.name.node, "M");
        assert_eq!(prog.other.len(), 1);
    }

    #[test]
    fn parse_import_aliases_per_name_and_per_module() {
        let prog = parse("import a, b.c as d\nfrom m import (x as y, z)\n");
        assert_eq!(prog.imports.len(), 3);
        assert_eq!(prog.imports[0].node.full_path(), "a");
        assert_eq!(prog.imports[1].node.full_path(), "b.c");
        assert_eq!(prog.imports[1].node.alias.as_ref().unwrap().node, "d");
        let names = &prog.imports[2].node.names;
        assert_eq!(names[0].name.node, "x");
        assert_eq!(names[0].local(), "y");
        assert_eq!(names[1].local(), "z");
    }

    #[test]
    fn moderate_nesting_parses() {
        let depth = 60;
        let src = format!("def f() -> int:\n    return {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        let prog = parse(&src);
        assert_eq!(prog.functions.len(), 1);
    }

    #[test]
    fn excessive_nesting_is_a_syntax_error() {
        let depth = 190;
        let src = format!("def f() -> int:\n    return {}1{}\n", "(".repeat(depth), ")".repeat(depth));
        let err = parse_source(&src).unwrap_err();
        assert!(matches!(err, CompileError::Syntax { .. }));
        assert!(err.message().contains("too many nested parentheses"));
    }

    #[test]
    fn excessive_unary_chain_is_a_syntax_error() {
        let src = format!("def f() -> int:\n    return {}1\n", "-".repeat(500));
        assert!(matches!(parse_source(&src), Err(CompileError::Syntax { .. })));
    }

    #[test]
    fn parse_definition_order_is_recorded() {
        let prog = parse("def a():\n    pass\nclass B:\n    pass\ndef c():\n    pass\n");
        assert_eq!(prog.order, vec![(false, 0), (true, 0), (false, 1)]);
    }

    #[test]
    fn parse_nested_def_is_unsupported() {
        let prog = parse("def f():\n    def g():\n        pass\n    return 1\n");
        assert!(matches!(body(&prog)[0].node, Stmt::Unsupported(_)));
    }

    #[test]
    fn parse_one_line_suite() {
        let prog = parse("def f(x):\n    if x: return 1\n    return 0\n");
        assert_eq!(body(&prog).len(), 2);
    }

    #[test]
    fn parse_missing_colon_is_error() {
        let err = parse_source("def f()\n    pass\n").unwrap_err();
        assert!(err.to_string().contains("expected :"));
    }

    #[test]
    fn parse_unclosed_paren_is_error() {
        assert!(parse_source("def f():\n    return (1 + 2\n").is_err());
    }
}
