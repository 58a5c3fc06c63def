use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::ast::{Expr, ExprId, FunctionDecl, Literal, Program, Stmt};
use crate::token::{Token, TokenType};

#[derive(Debug)]
pub struct ParseErrors(pub Vec<ParseErrorWithToken>);

impl std::error::Error for ParseErrors {}

impl std::fmt::Display for ParseErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during parsing", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

impl From<ParseErrorWithToken> for ParseErrors {
    fn from(error: ParseErrorWithToken) -> Self {
        ParseErrors(vec![error])
    }
}

#[derive(Debug)]
pub struct ParseErrorWithToken {
    pub error: ParseError,
    context: Vec<&'static str>,
    pub token: Option<Token>,
}

impl std::fmt::Display for ParseErrorWithToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "While parsing {}", self.context.join(" > "))?;
        write!(f, "{}", self.error)?;
        if let Some(token) = &self.token {
            write!(f, " at line {} but found \"{}\"", token.line, token.token_type)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Expected \"{0}\"")]
    Expected(TokenType),
    #[error("Expected expression")]
    ExpectedExpression,
    #[error("Expected identifier")]
    ExpectedIdentifier,
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget,
    #[error("Can't have more than 255 {0}")]
    TooManyEntries(&'static str),
}

// Expression ids must stay unique across parses, not just within one: a REPL
// session resolves every line into the same interpreter side-table.
static NEXT_EXPR_ID: AtomicU32 = AtomicU32::new(0);

#[derive(Debug)]
struct ParseContext {
    stack: RefCell<Vec<&'static str>>,
    // Errors that don't abort the surrounding production, surfaced at the end.
    deferred: RefCell<Vec<ParseErrorWithToken>>,
}

impl ParseContext {
    fn new() -> Self {
        Self {
            stack: RefCell::new(vec![""]),
            deferred: RefCell::new(Vec::new()),
        }
    }

    fn push(&self, name: &'static str) -> ParseContextGuard {
        self.stack.borrow_mut().push(name);
        ParseContextGuard::new(self)
    }

    fn pop(&self) {
        self.stack.borrow_mut().pop();
    }

    fn expr_id(&self) -> ExprId {
        ExprId(NEXT_EXPR_ID.fetch_add(1, Ordering::Relaxed))
    }

    fn error(&self, error: ParseError, token: Option<&Token>) -> ParseErrorWithToken {
        ParseErrorWithToken {
            error,
            context: self.stack.borrow().clone(),
            token: token.cloned(),
        }
    }

    fn defer(&self, error: ParseErrorWithToken) {
        self.deferred.borrow_mut().push(error);
    }
}

struct ParseContextGuard<'a> {
    context: &'a ParseContext,
}

impl<'a> ParseContextGuard<'a> {
    fn new(context: &'a ParseContext) -> Self {
        Self { context }
    }
}

impl<'a> Drop for ParseContextGuard<'a> {
    fn drop(&mut self) {
        self.context.pop();
    }
}

pub fn program(tokens: &[Token]) -> Result<Program, ParseErrors> {
    let context = ParseContext::new();
    let mut statements = Vec::new();
    let mut errors = Vec::new();
    let mut tokens = tokens;

    {
        let _guard = context.push("program");
        while tokens
            .first()
            .is_some_and(|t| t.token_type() != &TokenType::Eof)
        {
            match declaration(&context, tokens) {
                Ok((stmt, rest)) => {
                    statements.push(stmt);
                    tokens = rest;
                }
                Err(mut err) => {
                    errors.append(&mut err.0);
                    tokens = synchronize(tokens);
                }
            }
        }
    }

    errors.append(&mut context.deferred.take());
    if !errors.is_empty() {
        return Err(ParseErrors(errors));
    }

    Ok(Program(statements))
}

/// Discards the token that caused the error, then everything up to a
/// statement boundary: just past a ';', or just before a keyword that can
/// begin a statement.
fn synchronize(tokens: &[Token]) -> &[Token] {
    let mut tokens = match tokens.split_first() {
        Some((_, rest)) => rest,
        None => return tokens,
    };
    while let Some(token) = tokens.first() {
        match token.token_type() {
            TokenType::Semicolon => return &tokens[1..],
            TokenType::Class
            | TokenType::Fun
            | TokenType::Var
            | TokenType::For
            | TokenType::If
            | TokenType::While
            | TokenType::Print
            | TokenType::Return
            | TokenType::RightBrace
            | TokenType::Eof => return tokens,
            _ => tokens = &tokens[1..],
        }
    }
    tokens
}

fn declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrors> {
    let _guard = context.push("declaration");
    match tokens.first().map(Token::token_type) {
        Some(TokenType::Class) => class_declaration(context, &tokens[1..]),
        Some(TokenType::Fun) => {
            let (decl, rest) = function(context, &tokens[1..], "function")?;
            Ok((Stmt::Function(decl), rest))
        }
        Some(TokenType::Var) => Ok(var_declaration(context, &tokens[1..])?),
        _ => statement(context, tokens),
    }
}

fn class_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrors> {
    let _guard = context.push("class_declaration");
    let (name, tokens) = match_identifier(context, tokens)?;

    let (superclass, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Less) => {
            let (superclass_name, rest) = match_identifier(context, &tokens[1..])?;
            (
                Some(Expr::Variable {
                    id: context.expr_id(),
                    name: superclass_name,
                }),
                rest,
            )
        }
        _ => (None, tokens),
    };

    let mut tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let mut methods = Vec::new();
    let mut statics = Vec::new();

    while let Some(token) = tokens.first() {
        match token.token_type() {
            TokenType::RightBrace | TokenType::Eof => break,
            TokenType::Class => {
                let (decl, rest) = function(context, &tokens[1..], "static method")?;
                statics.push(decl);
                tokens = rest;
            }
            _ => {
                let (decl, rest) = function(context, tokens, "method")?;
                methods.push(decl);
                tokens = rest;
            }
        }
    }

    let tokens = consume(context, tokens, TokenType::RightBrace)?;
    Ok((
        Stmt::Class {
            name,
            superclass,
            methods,
            statics,
        },
        tokens,
    ))
}

fn function<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    kind: &'static str,
) -> Result<(Rc<FunctionDecl>, &'a [Token]), ParseErrors> {
    let _guard = context.push(kind);
    let (name, tokens) = match_identifier(context, tokens)?;
    let mut tokens = consume(context, tokens, TokenType::LeftParen)?;

    let mut params = Vec::new();
    if tokens.first().map(Token::token_type) != Some(&TokenType::RightParen) {
        loop {
            if params.len() >= 255 {
                context.defer(context.error(
                    ParseError::TooManyEntries("parameters"),
                    tokens.first(),
                ));
            }
            let (param, rest) = match_identifier(context, tokens)?;
            params.push(param);
            tokens = rest;
            match tokens.first().map(Token::token_type) {
                Some(TokenType::Comma) => tokens = &tokens[1..],
                _ => break,
            }
        }
    }

    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let tokens = consume(context, tokens, TokenType::LeftBrace)?;
    let (body, tokens) = block(context, tokens)?;
    Ok((Rc::new(FunctionDecl { name, params, body }), tokens))
}

fn statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrors> {
    let _guard = context.push("statement");
    match tokens.first().map(Token::token_type) {
        Some(TokenType::Print) => Ok(print_statement(context, &tokens[1..])?),
        Some(TokenType::Return) => {
            let keyword = tokens[0].clone();
            Ok(return_statement(context, keyword, &tokens[1..])?)
        }
        Some(TokenType::LeftBrace) => {
            let (statements, rest) = block(context, &tokens[1..])?;
            Ok((Stmt::Block(statements), rest))
        }
        Some(TokenType::If) => if_statement(context, &tokens[1..]),
        Some(TokenType::While) => while_statement(context, &tokens[1..]),
        Some(TokenType::For) => for_statement(context, &tokens[1..]),
        _ => Ok(expression_statement(context, tokens)?),
    }
}

fn var_declaration<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("var_declaration");
    let (name, tokens) = match_identifier(context, tokens)?;
    let (initializer, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Equal) => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            (Some(expr), rest)
        }
        _ => (None, tokens),
    };
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Stmt::Var { name, initializer }, tokens))
}

fn print_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("print_statement");
    let (expr, rest) = expression(context, tokens)?;
    let tokens = consume(context, rest, TokenType::Semicolon)?;
    Ok((Stmt::Print(expr), tokens))
}

fn return_statement<'a>(
    context: &ParseContext,
    keyword: Token,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("return_statement");
    let (value, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Semicolon) => (None, tokens),
        _ => {
            let (expr, rest) = expression(context, tokens)?;
            (Some(expr), rest)
        }
    };
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Stmt::Return { keyword, value }, tokens))
}

fn expression_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("expression_statement");
    let (expr, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::Semicolon)?;
    Ok((Stmt::Expression(expr), tokens))
}

fn if_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrors> {
    let _guard = context.push("if_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let (then_branch, tokens) = statement(context, tokens)?;

    if let Some(TokenType::Else) = tokens.first().map(Token::token_type) {
        let (else_branch, tokens) = statement(context, &tokens[1..])?;
        Ok((
            Stmt::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch: Some(Box::new(else_branch)),
            },
            tokens,
        ))
    } else {
        Ok((
            Stmt::If {
                condition,
                then_branch: Box::new(then_branch),
                else_branch: None,
            },
            tokens,
        ))
    }
}

fn while_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrors> {
    let _guard = context.push("while_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;
    let (condition, tokens) = expression(context, tokens)?;
    let tokens = consume(context, tokens, TokenType::RightParen)?;
    let (body, tokens) = statement(context, tokens)?;
    Ok((
        Stmt::While {
            condition,
            body: Box::new(body),
        },
        tokens,
    ))
}

// A for loop has no AST node of its own; it desugars into the equivalent
// while loop right here.
fn for_statement<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Stmt, &'a [Token]), ParseErrors> {
    let _guard = context.push("for_statement");
    let tokens = consume(context, tokens, TokenType::LeftParen)?;

    let (initializer, tokens) = match tokens.first().map(Token::token_type) {
        Some(TokenType::Semicolon) => (None, &tokens[1..]),
        Some(TokenType::Var) => {
            let (stmt, rest) = var_declaration(context, &tokens[1..])?;
            (Some(stmt), rest)
        }
        _ => {
            let (stmt, rest) = expression_statement(context, tokens)?;
            (Some(stmt), rest)
        }
    };

    let (condition, tokens) =
        if tokens.first().map(Token::token_type) != Some(&TokenType::Semicolon) {
            expression(context, tokens)?
        } else {
            (Expr::Literal(Literal::Boolean(true)), tokens)
        };
    let tokens = consume(context, tokens, TokenType::Semicolon)?;

    let (increment, tokens) =
        if tokens.first().map(Token::token_type) != Some(&TokenType::RightParen) {
            let (expr, rest) = expression(context, tokens)?;
            (Some(expr), rest)
        } else {
            (None, tokens)
        };
    let tokens = consume(context, tokens, TokenType::RightParen)?;

    let (mut body, tokens) = statement(context, tokens)?;

    if let Some(increment) = increment {
        body = Stmt::Block(vec![body, Stmt::Expression(increment)]);
    }
    let mut desugared = Stmt::While {
        condition,
        body: Box::new(body),
    };
    if let Some(initializer) = initializer {
        desugared = Stmt::Block(vec![initializer, desugared]);
    }

    Ok((desugared, tokens))
}

fn block<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Vec<Stmt>, &'a [Token]), ParseErrors> {
    let _guard = context.push("block");
    let mut statements = Vec::new();
    let mut errors = Vec::new();
    let mut tokens = tokens;

    while let Some(token) = tokens.first() {
        match token.token_type() {
            TokenType::RightBrace => {
                if errors.is_empty() {
                    return Ok((statements, &tokens[1..]));
                }
                return Err(ParseErrors(errors));
            }
            TokenType::Eof => break,
            _ => {}
        }
        match declaration(context, tokens) {
            Ok((stmt, rest)) => {
                statements.push(stmt);
                tokens = rest;
            }
            Err(mut err) => {
                errors.append(&mut err.0);
                tokens = synchronize(tokens);
            }
        }
    }

    errors.push(context.error(ParseError::Expected(TokenType::RightBrace), tokens.first()));
    Err(ParseErrors(errors))
}

fn expression<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("expression");
    assignment(context, tokens)
}

fn assignment<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("assignment");
    let (expr, tokens) = logical_or(context, tokens)?;

    if tokens.first().map(Token::token_type) == Some(&TokenType::Equal) {
        let equals = tokens[0].clone();
        let (value, rest) = assignment(context, &tokens[1..])?;
        return match expr {
            Expr::Variable { name, .. } => Ok((
                Expr::Assign {
                    id: context.expr_id(),
                    name,
                    value: Box::new(value),
                },
                rest,
            )),
            Expr::Get { object, name } => Ok((
                Expr::Set {
                    object,
                    name,
                    value: Box::new(value),
                },
                rest,
            )),
            target => {
                context.defer(context.error(ParseError::InvalidAssignmentTarget, Some(&equals)));
                Ok((target, rest))
            }
        };
    }

    Ok((expr, tokens))
}

fn binary<'a>(
    context: &ParseContext,
    operand: impl Fn(&ParseContext, &'a [Token]) -> Result<(Expr, &'a [Token]), ParseErrorWithToken>,
    operators: &[TokenType],
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let (mut expr, mut tokens) = operand(context, tokens)?;

    while let Some(token) = tokens.first() {
        if !operators.contains(token.token_type()) {
            break;
        }
        let operator = token.clone();
        let (right, rest) = operand(context, &tokens[1..])?;
        expr = Expr::Binary {
            left: Box::new(expr),
            operator,
            right: Box::new(right),
        };
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn logical<'a>(
    context: &ParseContext,
    operand: impl Fn(&ParseContext, &'a [Token]) -> Result<(Expr, &'a [Token]), ParseErrorWithToken>,
    operator_type: TokenType,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let (mut expr, mut tokens) = operand(context, tokens)?;

    while let Some(token) = tokens.first() {
        if token.token_type() != &operator_type {
            break;
        }
        let operator = token.clone();
        let (right, rest) = operand(context, &tokens[1..])?;
        expr = Expr::Logical {
            left: Box::new(expr),
            operator,
            right: Box::new(right),
        };
        tokens = rest;
    }

    Ok((expr, tokens))
}

fn logical_or<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("logical_or");
    logical(context, logical_and, TokenType::Or, tokens)
}

fn logical_and<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("logical_and");
    logical(context, ternary, TokenType::And, tokens)
}

fn ternary<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("ternary");
    let (expr, tokens) = equality(context, tokens)?;

    if tokens.first().map(Token::token_type) == Some(&TokenType::Question) {
        let (then_branch, tokens) = expression(context, &tokens[1..])?;
        let tokens = consume(context, tokens, TokenType::Colon)?;
        let (else_branch, tokens) = expression(context, tokens)?;
        return Ok((
            Expr::Ternary {
                condition: Box::new(expr),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            tokens,
        ));
    }

    Ok((expr, tokens))
}

fn equality<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("equality");
    binary(
        context,
        comparison,
        &[TokenType::BangEqual, TokenType::EqualEqual],
        tokens,
    )
}

fn comparison<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("comparison");
    binary(
        context,
        term,
        &[
            TokenType::Greater,
            TokenType::GreaterEqual,
            TokenType::Less,
            TokenType::LessEqual,
        ],
        tokens,
    )
}

fn term<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("term");
    binary(
        context,
        factor,
        &[TokenType::Plus, TokenType::Minus],
        tokens,
    )
}

fn factor<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("factor");
    binary(
        context,
        unary,
        &[TokenType::Star, TokenType::Slash],
        tokens,
    )
}

fn unary<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("unary");

    match tokens.first().map(Token::token_type) {
        Some(TokenType::Bang | TokenType::Minus) => {
            let operator = tokens[0].clone();
            let (operand, rest) = unary(context, &tokens[1..])?;
            Ok((
                Expr::Unary {
                    operator,
                    operand: Box::new(operand),
                },
                rest,
            ))
        }
        _ => call(context, tokens),
    }
}

fn call<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("call");
    let (mut expr, mut tokens) = primary(context, tokens)?;

    loop {
        match tokens.first().map(Token::token_type) {
            Some(TokenType::LeftParen) => {
                let (call_expr, rest) = finish_call(context, expr, &tokens[1..])?;
                expr = call_expr;
                tokens = rest;
            }
            Some(TokenType::Dot) => {
                let (name, rest) = match_identifier(context, &tokens[1..])?;
                expr = Expr::Get {
                    object: Box::new(expr),
                    name,
                };
                tokens = rest;
            }
            _ => break,
        }
    }

    Ok((expr, tokens))
}

fn finish_call<'a>(
    context: &ParseContext,
    callee: Expr,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let mut arguments = Vec::new();
    let mut tokens = tokens;

    if tokens.first().map(Token::token_type) != Some(&TokenType::RightParen) {
        loop {
            if arguments.len() >= 255 {
                context.defer(context.error(
                    ParseError::TooManyEntries("arguments"),
                    tokens.first(),
                ));
            }
            let (argument, rest) = expression(context, tokens)?;
            arguments.push(argument);
            tokens = rest;
            match tokens.first().map(Token::token_type) {
                Some(TokenType::Comma) => tokens = &tokens[1..],
                _ => break,
            }
        }
    }

    let paren = match tokens.first() {
        Some(token) if token.token_type() == &TokenType::RightParen => token.clone(),
        other => {
            return Err(context.error(ParseError::Expected(TokenType::RightParen), other));
        }
    };

    Ok((
        Expr::Call {
            callee: Box::new(callee),
            paren,
            arguments,
        },
        &tokens[1..],
    ))
}

fn primary<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Expr, &'a [Token]), ParseErrorWithToken> {
    let _guard = context.push("primary");
    let Some(token) = tokens.first() else {
        return Err(context.error(ParseError::ExpectedExpression, None));
    };

    match token.token_type() {
        TokenType::Number(n) => Ok((Expr::Literal(Literal::Number(*n)), &tokens[1..])),
        TokenType::String(s) => Ok((Expr::Literal(Literal::String(s.clone())), &tokens[1..])),
        TokenType::True => Ok((Expr::Literal(Literal::Boolean(true)), &tokens[1..])),
        TokenType::False => Ok((Expr::Literal(Literal::Boolean(false)), &tokens[1..])),
        TokenType::Nil => Ok((Expr::Literal(Literal::Nil), &tokens[1..])),
        TokenType::Super => {
            let keyword = token.clone();
            let tokens = consume(context, &tokens[1..], TokenType::Dot)?;
            let (method, tokens) = match_identifier(context, tokens)?;
            Ok((
                Expr::Super {
                    id: context.expr_id(),
                    keyword,
                    method,
                },
                tokens,
            ))
        }
        TokenType::This => Ok((
            Expr::This {
                id: context.expr_id(),
                keyword: token.clone(),
            },
            &tokens[1..],
        )),
        TokenType::Identifier(_) => Ok((
            Expr::Variable {
                id: context.expr_id(),
                name: token.clone(),
            },
            &tokens[1..],
        )),
        TokenType::LeftParen => {
            let (expr, rest) = expression(context, &tokens[1..])?;
            let tokens = consume(context, rest, TokenType::RightParen)?;
            Ok((Expr::Grouping(Box::new(expr)), tokens))
        }
        _ => Err(context.error(ParseError::ExpectedExpression, Some(token))),
    }
}

fn consume<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
    token_type: TokenType,
) -> Result<&'a [Token], ParseErrorWithToken> {
    match tokens.first() {
        Some(token) if token.token_type() == &token_type => Ok(&tokens[1..]),
        other => Err(context.error(ParseError::Expected(token_type), other)),
    }
}

fn match_identifier<'a>(
    context: &ParseContext,
    tokens: &'a [Token],
) -> Result<(Token, &'a [Token]), ParseErrorWithToken> {
    match tokens.first() {
        Some(token) if matches!(token.token_type(), TokenType::Identifier(_)) => {
            Ok((token.clone(), &tokens[1..]))
        }
        other => Err(context.error(ParseError::ExpectedIdentifier, other)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scanner;

    fn parse(source: &str) -> Program {
        let tokens = scanner::scan(source).expect("should scan");
        program(&tokens).expect("should parse")
    }

    fn first_statement(source: &str) -> Stmt {
        let mut program = parse(source);
        assert_eq!(program.0.len(), 1);
        program.0.remove(0)
    }

    #[test]
    fn test_precedence() {
        assert_eq!(
            first_statement("1 + 2 * 3;").to_string(),
            "(+ 1 (* 2 3));"
        );
        assert_eq!(
            first_statement("(1 + 2) * 3;").to_string(),
            "(* (group (+ 1 2)) 3);"
        );
    }

    #[test]
    fn test_unary_binds_tighter_than_factor() {
        assert_eq!(first_statement("-1 * 2;").to_string(), "(* (- 1) 2);");
    }

    #[test]
    fn test_ternary_is_right_associative() {
        assert_eq!(
            first_statement("a ? b : c ? d : e;").to_string(),
            "(a ? b : (c ? d : e));"
        );
    }

    #[test]
    fn test_logical_above_ternary() {
        assert_eq!(
            first_statement("a or b ? 1 : 2;").to_string(),
            "(or a (b ? 1 : 2));"
        );
    }

    #[test]
    fn test_call_and_property_chains() {
        assert_eq!(
            first_statement("a.b(1).c;").to_string(),
            "a.b(1).c;"
        );
        assert_eq!(
            first_statement("super.greet();").to_string(),
            "super.greet();"
        );
    }

    #[test]
    fn test_assignment_targets() {
        assert_eq!(first_statement("a = 1;").to_string(), "a = 1;");
        assert_eq!(first_statement("a.b = 1;").to_string(), "a.b = 1;");

        let tokens = scanner::scan("1 = 2;").expect("should scan");
        let errors = program(&tokens).expect_err("should reject the target");
        assert!(matches!(
            errors.0.as_slice(),
            [ParseErrorWithToken {
                error: ParseError::InvalidAssignmentTarget,
                ..
            }]
        ));
    }

    #[test]
    fn test_for_desugars_to_while() {
        let stmt = first_statement("for (var i = 0; i < 3; i = i + 1) print i;");
        let Stmt::Block(statements) = stmt else {
            panic!("expected an outer block, got {}", stmt);
        };
        assert!(matches!(
            statements.as_slice(),
            [Stmt::Var { .. }, Stmt::While { .. }]
        ));
        let Stmt::While { body, .. } = &statements[1] else {
            unreachable!()
        };
        let Stmt::Block(body) = body.as_ref() else {
            panic!("expected the increment to be wrapped in a block");
        };
        assert!(matches!(
            body.as_slice(),
            [Stmt::Print(_), Stmt::Expression(_)]
        ));
    }

    #[test]
    fn test_for_without_clauses() {
        let stmt = first_statement("for (;;) print 1;");
        assert!(matches!(stmt, Stmt::While { .. }));
    }

    #[test]
    fn test_class_with_static_methods() {
        let stmt = first_statement(
            "class Math { class square(n) { return n * n; } identity(n) { return n; } }",
        );
        let Stmt::Class {
            methods, statics, ..
        } = stmt
        else {
            panic!("expected a class declaration");
        };
        assert_eq!(methods.len(), 1);
        assert_eq!(statics.len(), 1);
        assert_eq!(methods[0].name.lexeme, "identity");
        assert_eq!(statics[0].name.lexeme, "square");
    }

    #[test]
    fn test_multiple_errors_reported() {
        let tokens = scanner::scan("print; var 1 = 2; print 3;").expect("should scan");
        let errors = program(&tokens).expect_err("should report both errors");
        assert_eq!(errors.0.len(), 2);
    }

    #[test]
    fn test_argument_ceiling() {
        let arguments = (0..256).map(|i| i.to_string()).collect::<Vec<_>>();
        let source = format!("f({});", arguments.join(", "));
        let tokens = scanner::scan(&source).expect("should scan");
        let errors = program(&tokens).expect_err("should report the ceiling");
        assert!(errors
            .0
            .iter()
            .any(|e| matches!(e.error, ParseError::TooManyEntries("arguments"))));
    }

    #[test]
    fn test_distinct_expression_ids() {
        let program = parse("a + a;");
        let Stmt::Expression(Expr::Binary { left, right, .. }) = &program.0[0] else {
            panic!("expected a binary expression");
        };
        let (Expr::Variable { id: left_id, .. }, Expr::Variable { id: right_id, .. }) =
            (left.as_ref(), right.as_ref())
        else {
            panic!("expected variable operands");
        };
        assert_ne!(left_id, right_id);
    }
}
