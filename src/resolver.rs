use rustc_hash::FxHashMap;

use crate::ast::{Expr, ExprId, FunctionDecl, Program, Stmt};
use crate::token::Token;

#[derive(Debug, Clone, Copy)]
enum FunctionType {
    None,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy)]
enum ClassType {
    None,
    Class,
    Subclass,
}

#[derive(Debug)]
pub struct ResolveErrors(pub Vec<ResolveError>);

impl std::error::Error for ResolveErrors {}

impl std::fmt::Display for ResolveErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Found {} errors during resolution", self.0.len())?;
        for error in &self.0 {
            writeln!(f, "{}", error)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("[line {}] Error at '{}': {kind}", token.line, token.lexeme)]
pub struct ResolveError {
    pub token: Token,
    pub kind: ResolveErrorKind,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveErrorKind {
    #[error("A variable with this name already exists in this scope.")]
    AlreadyDeclared,
    #[error("Can't read a local variable in its own initializer.")]
    ReadInOwnInitializer,
    #[error("Can't return from top-level code.")]
    ReturnOutsideFunction,
    #[error("Can't return a value from an initializer.")]
    ReturnValueFromInitializer,
    #[error("Can't use 'this' outside of a class.")]
    ThisOutsideClass,
    #[error("Can't use 'super' outside of a class.")]
    SuperOutsideClass,
    #[error("Can't use 'super' in a class with no superclass.")]
    SuperWithoutSuperclass,
    #[error("A class can't inherit from itself.")]
    ClassInheritsItself,
}

/// Walks the program once, computing how many environments sit between each
/// variable reference and its declaration. Names that match no lexical scope
/// get no entry and are treated as globals at runtime. All static-semantic
/// errors found along the way are accumulated rather than stopping at the
/// first.
pub fn resolve(program: &Program) -> Result<FxHashMap<ExprId, usize>, ResolveErrors> {
    let mut resolver = Resolver::new();
    for statement in &program.0 {
        resolver.resolve_statement(statement);
    }
    if resolver.errors.is_empty() {
        Ok(resolver.locals)
    } else {
        Err(ResolveErrors(resolver.errors))
    }
}

struct Resolver {
    // Each scope maps a name to whether its initializer has finished
    // resolving; false means declared but not yet usable.
    scopes: Vec<FxHashMap<String, bool>>,
    locals: FxHashMap<ExprId, usize>,
    errors: Vec<ResolveError>,
    function_type: FunctionType,
    class_type: ClassType,
}

impl Resolver {
    fn new() -> Self {
        Self {
            scopes: Vec::new(),
            locals: FxHashMap::default(),
            errors: Vec::new(),
            function_type: FunctionType::None,
            class_type: ClassType::None,
        }
    }

    fn resolve_statement(&mut self, statement: &Stmt) {
        match statement {
            Stmt::Block(statements) => {
                self.begin_scope();
                for statement in statements {
                    self.resolve_statement(statement);
                }
                self.end_scope();
            }
            Stmt::Expression(expr) | Stmt::Print(expr) => self.resolve_expression(expr),
            Stmt::Var { name, initializer } => {
                self.declare(name);
                if let Some(initializer) = initializer {
                    self.resolve_expression(initializer);
                }
                self.define(name);
            }
            Stmt::Function(decl) => {
                self.declare(&decl.name);
                self.define(&decl.name);
                self.resolve_function(decl, FunctionType::Function);
            }
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition);
                self.resolve_statement(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_statement(else_branch);
                }
            }
            Stmt::While { condition, body } => {
                self.resolve_expression(condition);
                self.resolve_statement(body);
            }
            Stmt::Return { keyword, value } => {
                match self.function_type {
                    FunctionType::None => self.error(keyword, ResolveErrorKind::ReturnOutsideFunction),
                    FunctionType::Initializer if value.is_some() => {
                        self.error(keyword, ResolveErrorKind::ReturnValueFromInitializer)
                    }
                    _ => {}
                }
                if let Some(value) = value {
                    self.resolve_expression(value);
                }
            }
            Stmt::Class {
                name,
                superclass,
                methods,
                statics,
            } => self.resolve_class(name, superclass.as_ref(), methods, statics),
        }
    }

    fn resolve_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[std::rc::Rc<FunctionDecl>],
        statics: &[std::rc::Rc<FunctionDecl>],
    ) {
        let enclosing_class = self.class_type;
        self.class_type = ClassType::Class;

        self.declare(name);
        self.define(name);

        if let Some(superclass) = superclass {
            self.class_type = ClassType::Subclass;
            self.begin_scope();
            self.scope_define("super");
            self.resolve_expression(superclass);
        }

        self.begin_scope();
        self.scope_define("this");

        for method in methods {
            let function_type = if method.name.lexeme == "init" {
                FunctionType::Initializer
            } else {
                FunctionType::Method
            };
            self.resolve_function(method, function_type);
        }

        self.end_scope();

        // Static methods never see 'this'; they resolve as plain functions.
        for static_method in statics {
            self.resolve_function(static_method, FunctionType::Function);
        }

        if let Some(Expr::Variable {
            name: superclass_name,
            ..
        }) = superclass
        {
            if superclass_name.lexeme == name.lexeme {
                self.error(superclass_name, ResolveErrorKind::ClassInheritsItself);
            }
        }

        if superclass.is_some() {
            self.end_scope();
        }

        self.class_type = enclosing_class;
    }

    fn resolve_expression(&mut self, expression: &Expr) {
        match expression {
            Expr::Variable { id, name } => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(&name.lexeme) == Some(&false) {
                        self.error(name, ResolveErrorKind::ReadInOwnInitializer);
                    }
                }
                self.resolve_local(*id, name);
            }
            Expr::Assign { id, name, value } => {
                self.resolve_expression(value);
                self.resolve_local(*id, name);
            }
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                self.resolve_expression(left);
                self.resolve_expression(right);
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                self.resolve_expression(condition);
                self.resolve_expression(then_branch);
                self.resolve_expression(else_branch);
            }
            Expr::Call {
                callee, arguments, ..
            } => {
                self.resolve_expression(callee);
                for argument in arguments {
                    self.resolve_expression(argument);
                }
            }
            Expr::Get { object, .. } => self.resolve_expression(object),
            Expr::Set { object, value, .. } => {
                self.resolve_expression(value);
                self.resolve_expression(object);
            }
            Expr::Grouping(inner) => self.resolve_expression(inner),
            Expr::Unary { operand, .. } => self.resolve_expression(operand),
            Expr::Literal(_) => {}
            Expr::This { id, keyword } => {
                if matches!(self.class_type, ClassType::None) {
                    self.error(keyword, ResolveErrorKind::ThisOutsideClass);
                    return;
                }
                self.resolve_local(*id, keyword);
            }
            Expr::Super { id, keyword, .. } => {
                match self.class_type {
                    ClassType::None => {
                        self.error(keyword, ResolveErrorKind::SuperOutsideClass);
                    }
                    ClassType::Class => {
                        self.error(keyword, ResolveErrorKind::SuperWithoutSuperclass);
                    }
                    ClassType::Subclass => {}
                }
                self.resolve_local(*id, keyword);
            }
        }
    }

    fn resolve_local(&mut self, id: ExprId, name: &Token) {
        for (distance, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(&name.lexeme) {
                self.locals.insert(id, distance);
                return;
            }
        }
        // No enclosing scope declares it; the interpreter will look it up
        // in the global environment.
    }

    fn resolve_function(&mut self, decl: &FunctionDecl, function_type: FunctionType) {
        let enclosing_function = self.function_type;
        self.function_type = function_type;

        self.begin_scope();
        for param in &decl.params {
            self.declare(param);
            self.define(param);
        }
        for statement in &decl.body {
            self.resolve_statement(statement);
        }
        self.end_scope();

        self.function_type = enclosing_function;
    }

    fn begin_scope(&mut self) {
        self.scopes.push(FxHashMap::default());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &Token) {
        if self.scopes.is_empty() {
            return;
        }
        let already_declared = self
            .scopes
            .last()
            .is_some_and(|scope| scope.contains_key(&name.lexeme));
        if already_declared {
            self.error(name, ResolveErrorKind::AlreadyDeclared);
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), false);
        }
    }

    fn define(&mut self, name: &Token) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.lexeme.clone(), true);
        }
    }

    fn scope_define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn error(&mut self, token: &Token, kind: ResolveErrorKind) {
        self.errors.push(ResolveError {
            token: token.clone(),
            kind,
        });
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{parser, scanner};

    fn resolve_source(source: &str) -> Result<FxHashMap<ExprId, usize>, ResolveErrors> {
        let tokens = scanner::scan(source).expect("should scan");
        let program = parser::program(&tokens).expect("should parse");
        resolve(&program)
    }

    fn error_kinds(source: &str) -> Vec<ResolveErrorKind> {
        resolve_source(source)
            .expect_err("should report resolver errors")
            .0
            .into_iter()
            .map(|e| e.kind)
            .collect()
    }

    #[test]
    fn test_duplicate_declaration_in_one_scope() {
        assert!(matches!(
            error_kinds("{ var a = 1; var a = 2; }").as_slice(),
            [ResolveErrorKind::AlreadyDeclared]
        ));
    }

    #[test]
    fn test_shadowing_in_nested_blocks_is_allowed() {
        assert!(resolve_source("{ var a = 1; { var a = 2; } }").is_ok());
    }

    #[test]
    fn test_duplicate_globals_are_allowed() {
        // Redeclaring at the top level is how a REPL session redefines names.
        assert!(resolve_source("var a = 1; var a = 2;").is_ok());
    }

    #[test]
    fn test_read_in_own_initializer() {
        assert!(matches!(
            error_kinds("{ var a = 1; { var a = a; } }").as_slice(),
            [ResolveErrorKind::ReadInOwnInitializer]
        ));
    }

    #[test]
    fn test_return_outside_function() {
        assert!(matches!(
            error_kinds("return 1;").as_slice(),
            [ResolveErrorKind::ReturnOutsideFunction]
        ));
    }

    #[test]
    fn test_return_value_from_initializer() {
        assert!(matches!(
            error_kinds("class A { init() { return 1; } }").as_slice(),
            [ResolveErrorKind::ReturnValueFromInitializer]
        ));
    }

    #[test]
    fn test_bare_return_from_initializer_is_allowed() {
        assert!(resolve_source("class A { init() { return; } }").is_ok());
    }

    #[test]
    fn test_this_outside_class() {
        assert!(matches!(
            error_kinds("print this;").as_slice(),
            [ResolveErrorKind::ThisOutsideClass]
        ));
    }

    #[test]
    fn test_super_outside_class() {
        assert!(matches!(
            error_kinds("fun f() { return super.f(); }").as_slice(),
            [ResolveErrorKind::SuperOutsideClass]
        ));
    }

    #[test]
    fn test_super_without_superclass() {
        assert!(matches!(
            error_kinds("class A { f() { return super.f(); } }").as_slice(),
            [ResolveErrorKind::SuperWithoutSuperclass]
        ));
    }

    #[test]
    fn test_class_inheriting_itself() {
        assert!(matches!(
            error_kinds("class A < A {}").as_slice(),
            [ResolveErrorKind::ClassInheritsItself]
        ));
    }

    #[test]
    fn test_errors_accumulate() {
        let kinds = error_kinds("return 1; print this;");
        assert_eq!(kinds.len(), 2);
    }

    #[test]
    fn test_distances() {
        // In `inner`, `a` crosses the function scope to reach the block that
        // declares it; `b` is local.
        let source = r#"
        {
            var a = 1;
            fun inner(b) {
                print a;
                print b;
            }
        }
        "#;
        let locals = resolve_source(source).expect("should resolve");
        let mut distances: Vec<usize> = locals.values().copied().collect();
        distances.sort_unstable();
        assert_eq!(distances, vec![0, 1]);
    }

    #[test]
    fn test_globals_have_no_distance() {
        let locals = resolve_source("var a = 1; print a;").expect("should resolve");
        assert!(locals.is_empty());
    }
}
