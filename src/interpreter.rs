pub mod callable;
pub mod class;
pub mod environment;

use std::cell::RefCell;
use std::fmt::Display;
use std::io::Write;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{Expr, ExprId, FunctionDecl, Literal, Program, Stmt};
use crate::token::{Token, TokenType};

use self::callable::{Callable, Function};
use self::class::Class;
use self::environment::Environment;

const DEFAULT_MAX_CALL_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    String(String),
    Callable(Rc<Callable>),
    Instance(Rc<RefCell<class::Instance>>),
}

impl Value {
    fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => {
                if a.is_nan() && b.is_nan() {
                    // NaN is equal to itself here, unlike in IEEE comparison.
                    true
                } else {
                    a == b
                }
            }
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Callable(a), Value::Callable(b)) => Rc::ptr_eq(a, b),
            (Value::Instance(a), Value::Instance(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Callable(callable) => write!(f, "{}", callable),
            Value::Instance(instance) => write!(f, "{} instance", instance.borrow().class.name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("[line {}] {kind}", token.line)]
    Raised { token: Token, kind: RuntimeErrorKind },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl RuntimeError {
    fn raised(token: &Token, kind: RuntimeErrorKind) -> Self {
        RuntimeError::Raised {
            token: token.clone(),
            kind,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeErrorKind {
    #[error("Operand must be a number.")]
    OperandMustBeNumber,
    #[error("Operands must be numbers.")]
    OperandsMustBeNumbers,
    #[error("Operands must be two numbers, or one of them a string.")]
    InvalidAddition,
    #[error("Cannot divide by zero.")]
    DivisionByZero,
    #[error("Can only call functions and classes.")]
    NotCallable,
    #[error("Expected {expected} arguments but got {got}.")]
    ArityMismatch { expected: usize, got: usize },
    #[error("Undefined variable '{0}'.")]
    UndefinedVariable(String),
    #[error("Undefined property '{0}'.")]
    UndefinedProperty(String),
    #[error("Only instances and classes have properties.")]
    OnlyInstancesHaveProperties,
    #[error("Only instances have fields.")]
    OnlyInstancesHaveFields,
    #[error("Superclass must be a class.")]
    SuperclassNotClass,
    #[error("Exceeded the maximum call depth of {0}.")]
    CallDepthExceeded(usize),
}

pub struct Interpreter {
    globals: Rc<RefCell<Environment>>,
    environment: Rc<RefCell<Environment>>,
    locals: FxHashMap<ExprId, usize>,
    stdout: Rc<RefCell<dyn Write>>,
    max_call_depth: usize,
    call_depth: usize,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(Rc::new(RefCell::new(std::io::stdout())))
    }
}

impl std::fmt::Debug for Interpreter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Interpreter")
            .field("environment", &self.environment)
            .field("locals", &self.locals)
            .finish()
    }
}

fn clock(_arguments: &[Value]) -> Result<Value, RuntimeErrorKind> {
    let seconds = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default();
    Ok(Value::Number(seconds))
}

impl Interpreter {
    pub fn new(stdout: Rc<RefCell<dyn Write>>) -> Self {
        let globals = Rc::new(RefCell::new(Environment::default()));
        globals.borrow_mut().define(
            "clock".to_string(),
            Value::Callable(Rc::new(Callable::Native {
                name: "clock",
                arity: 0,
                function: clock,
            })),
        );

        Self {
            environment: globals.clone(),
            globals,
            locals: FxHashMap::default(),
            stdout,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            call_depth: 0,
        }
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    /// Merges resolver-computed distances into the side-table. In a REPL each
    /// line is resolved separately and accumulates here.
    pub fn resolve(&mut self, locals: FxHashMap<ExprId, usize>) {
        self.locals.extend(locals);
    }

    pub fn interpret(&mut self, program: &Program) -> Result<(), RuntimeError> {
        for statement in &program.0 {
            self.execute(statement)?;
        }
        Ok(())
    }

    fn execute(&mut self, statement: &Stmt) -> Result<Option<Value>, RuntimeError> {
        let result = match statement {
            Stmt::Expression(expr) => {
                self.evaluate(expr)?;
                None
            }
            Stmt::Print(expr) => {
                let value = self.evaluate(expr)?;
                writeln!(self.stdout.borrow_mut(), "{}", value)?;
                None
            }
            Stmt::Var { name, initializer } => {
                let value = match initializer {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::Nil,
                };
                self.environment
                    .borrow_mut()
                    .define(name.lexeme.clone(), value);
                None
            }
            Stmt::Block(statements) => self.execute_in_env(
                Environment::nested(self.environment.clone()),
                |interpreter| {
                    for statement in statements {
                        let result = interpreter.execute(statement)?;
                        if result.is_some() {
                            return Ok(result);
                        }
                    }
                    Ok(None)
                },
            )?,
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.execute(then_branch)?
                } else if let Some(else_branch) = else_branch {
                    self.execute(else_branch)?
                } else {
                    None
                }
            }
            Stmt::While { condition, body } => {
                let mut result = None;
                while self.evaluate(condition)?.is_truthy() {
                    result = self.execute(body)?;
                    if result.is_some() {
                        break;
                    }
                }
                result
            }
            Stmt::Function(decl) => {
                let function = Function {
                    declaration: decl.clone(),
                    closure: self.environment.clone(),
                    is_initializer: false,
                };
                self.environment.borrow_mut().define(
                    decl.name.lexeme.clone(),
                    Value::Callable(Rc::new(Callable::Function(function))),
                );
                None
            }
            Stmt::Return { value, .. } => match value {
                Some(expr) => Some(self.evaluate(expr)?),
                None => Some(Value::Nil),
            },
            Stmt::Class {
                name,
                superclass,
                methods,
                statics,
            } => {
                self.execute_class(name, superclass.as_ref(), methods, statics)?;
                None
            }
        };

        Ok(result)
    }

    fn execute_class(
        &mut self,
        name: &Token,
        superclass: Option<&Expr>,
        methods: &[Rc<FunctionDecl>],
        statics: &[Rc<FunctionDecl>],
    ) -> Result<(), RuntimeError> {
        let superclass_value = match superclass {
            Some(expr) => {
                let value = self.evaluate(expr)?;
                let class = match &value {
                    Value::Callable(callable) => match callable.as_ref() {
                        Callable::Class(class) => Some(class.clone()),
                        _ => None,
                    },
                    _ => None,
                };
                match class {
                    Some(class) => Some(class),
                    None => {
                        let token = match expr {
                            Expr::Variable { name, .. } => name,
                            _ => name,
                        };
                        return Err(RuntimeError::raised(
                            token,
                            RuntimeErrorKind::SuperclassNotClass,
                        ));
                    }
                }
            }
            None => None,
        };

        self.environment
            .borrow_mut()
            .define(name.lexeme.clone(), Value::Nil);

        // Methods close over an extra environment holding 'super' so that
        // super calls start the lookup one level above this class, whatever
        // the receiver's runtime type is.
        let class_environment = match &superclass_value {
            Some(superclass) => {
                let environment = Environment::nested(self.environment.clone());
                environment.borrow_mut().define(
                    "super".to_string(),
                    Value::Callable(Rc::new(Callable::Class(superclass.clone()))),
                );
                environment
            }
            None => self.environment.clone(),
        };

        let methods = methods
            .iter()
            .map(|decl| {
                (
                    decl.name.lexeme.clone(),
                    Function {
                        declaration: decl.clone(),
                        closure: class_environment.clone(),
                        is_initializer: decl.name.lexeme == "init",
                    },
                )
            })
            .collect();
        let statics = statics
            .iter()
            .map(|decl| {
                (
                    decl.name.lexeme.clone(),
                    Function {
                        declaration: decl.clone(),
                        closure: class_environment.clone(),
                        is_initializer: false,
                    },
                )
            })
            .collect();

        let class = Rc::new(Class {
            name: name.lexeme.clone(),
            superclass: superclass_value,
            methods,
            statics,
        });
        self.environment
            .borrow_mut()
            .assign(&name.lexeme, Value::Callable(Rc::new(Callable::Class(class))));

        Ok(())
    }

    fn execute_in_env<T>(
        &mut self,
        environment: Rc<RefCell<Environment>>,
        f: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        let previous = std::mem::replace(&mut self.environment, environment);
        let result = f(self);
        self.environment = previous;
        result
    }

    pub fn evaluate(&mut self, expression: &Expr) -> Result<Value, RuntimeError> {
        match expression {
            Expr::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
                Literal::Nil => Value::Nil,
            }),
            Expr::Grouping(inner) => self.evaluate(inner),
            Expr::Variable { id, name } => self.look_up_variable(*id, name),
            Expr::Assign { id, name, value } => {
                let value = self.evaluate(value)?;
                if let Some(&distance) = self.locals.get(id) {
                    Environment::assign_at(&self.environment, distance, &name.lexeme, value.clone());
                } else if !self.globals.borrow_mut().assign(&name.lexeme, value.clone()) {
                    return Err(RuntimeError::raised(
                        name,
                        RuntimeErrorKind::UndefinedVariable(name.lexeme.clone()),
                    ));
                }
                Ok(value)
            }
            Expr::Binary {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                self.binary_operation(operator, left, right)
            }
            Expr::Logical {
                left,
                operator,
                right,
            } => {
                let left = self.evaluate(left)?;
                match operator.token_type() {
                    TokenType::Or if left.is_truthy() => Ok(left),
                    TokenType::And if !left.is_truthy() => Ok(left),
                    _ => self.evaluate(right),
                }
            }
            Expr::Unary { operator, operand } => {
                let value = self.evaluate(operand)?;
                match operator.token_type() {
                    TokenType::Minus => match value {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(RuntimeError::raised(
                            operator,
                            RuntimeErrorKind::OperandMustBeNumber,
                        )),
                    },
                    TokenType::Bang => Ok(Value::Boolean(!value.is_truthy())),
                    _ => unreachable!("the parser only builds unary nodes from unary operators"),
                }
            }
            Expr::Ternary {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    self.evaluate(then_branch)
                } else {
                    self.evaluate(else_branch)
                }
            }
            Expr::Call {
                callee,
                paren,
                arguments,
            } => {
                let callee = self.evaluate(callee)?;
                let Value::Callable(callable) = callee else {
                    return Err(RuntimeError::raised(paren, RuntimeErrorKind::NotCallable));
                };

                let mut values = Vec::with_capacity(arguments.len());
                for argument in arguments {
                    values.push(self.evaluate(argument)?);
                }

                if values.len() != callable.arity() {
                    return Err(RuntimeError::raised(
                        paren,
                        RuntimeErrorKind::ArityMismatch {
                            expected: callable.arity(),
                            got: values.len(),
                        },
                    ));
                }

                if self.call_depth >= self.max_call_depth {
                    return Err(RuntimeError::raised(
                        paren,
                        RuntimeErrorKind::CallDepthExceeded(self.max_call_depth),
                    ));
                }
                self.call_depth += 1;
                let result = callable.call(self, paren, &values);
                self.call_depth -= 1;
                result
            }
            Expr::Get { object, name } => {
                let object = self.evaluate(object)?;
                match object {
                    Value::Instance(instance) => {
                        if let Some(value) = instance.borrow().fields.get(&name.lexeme).cloned() {
                            return Ok(value);
                        }
                        let class = instance.borrow().class.clone();
                        if let Some(method) = class.find_method(&name.lexeme) {
                            return Ok(Value::Callable(Rc::new(Callable::Function(
                                method.bind(&instance),
                            ))));
                        }
                        Err(RuntimeError::raised(
                            name,
                            RuntimeErrorKind::UndefinedProperty(name.lexeme.clone()),
                        ))
                    }
                    Value::Callable(callable) => match callable.as_ref() {
                        Callable::Class(class) => match class.find_static(&name.lexeme) {
                            Some(function) => Ok(Value::Callable(Rc::new(Callable::Function(
                                function.clone(),
                            )))),
                            None => Err(RuntimeError::raised(
                                name,
                                RuntimeErrorKind::UndefinedProperty(name.lexeme.clone()),
                            )),
                        },
                        _ => Err(RuntimeError::raised(
                            name,
                            RuntimeErrorKind::OnlyInstancesHaveProperties,
                        )),
                    },
                    _ => Err(RuntimeError::raised(
                        name,
                        RuntimeErrorKind::OnlyInstancesHaveProperties,
                    )),
                }
            }
            Expr::Set {
                object,
                name,
                value,
            } => {
                let object = self.evaluate(object)?;
                let Value::Instance(instance) = object else {
                    return Err(RuntimeError::raised(
                        name,
                        RuntimeErrorKind::OnlyInstancesHaveFields,
                    ));
                };
                let value = self.evaluate(value)?;
                // Fields spring into existence on first assignment.
                instance
                    .borrow_mut()
                    .fields
                    .insert(name.lexeme.clone(), value.clone());
                Ok(value)
            }
            Expr::This { id, keyword } => self.look_up_variable(*id, keyword),
            Expr::Super { id, keyword, method } => {
                let Some(&distance) = self.locals.get(id) else {
                    return Err(RuntimeError::raised(
                        keyword,
                        RuntimeErrorKind::UndefinedVariable("super".to_string()),
                    ));
                };
                let superclass = match Environment::get_at(&self.environment, distance, "super") {
                    Some(Value::Callable(callable)) => match callable.as_ref() {
                        Callable::Class(class) => class.clone(),
                        _ => {
                            return Err(RuntimeError::raised(
                                keyword,
                                RuntimeErrorKind::UndefinedVariable("super".to_string()),
                            ))
                        }
                    },
                    _ => {
                        return Err(RuntimeError::raised(
                            keyword,
                            RuntimeErrorKind::UndefinedVariable("super".to_string()),
                        ))
                    }
                };
                // 'this' lives one environment below the 'super' binding.
                let instance = match Environment::get_at(&self.environment, distance - 1, "this") {
                    Some(Value::Instance(instance)) => instance,
                    _ => {
                        return Err(RuntimeError::raised(
                            keyword,
                            RuntimeErrorKind::UndefinedVariable("this".to_string()),
                        ))
                    }
                };
                match superclass.find_method(&method.lexeme) {
                    Some(function) => Ok(Value::Callable(Rc::new(Callable::Function(
                        function.bind(&instance),
                    )))),
                    None => Err(RuntimeError::raised(
                        method,
                        RuntimeErrorKind::UndefinedProperty(method.lexeme.clone()),
                    )),
                }
            }
        }
    }

    fn binary_operation(
        &mut self,
        operator: &Token,
        left: Value,
        right: Value,
    ) -> Result<Value, RuntimeError> {
        match operator.token_type() {
            TokenType::Plus => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, b))),
                (a, Value::String(b)) => Ok(Value::String(format!("{}{}", b, a))),
                _ => Err(RuntimeError::raised(
                    operator,
                    RuntimeErrorKind::InvalidAddition,
                )),
            },
            TokenType::Minus => {
                let (a, b) = number_operands(operator, &left, &right)?;
                Ok(Value::Number(a - b))
            }
            TokenType::Star => {
                let (a, b) = number_operands(operator, &left, &right)?;
                Ok(Value::Number(a * b))
            }
            TokenType::Slash => {
                let (a, b) = number_operands(operator, &left, &right)?;
                if b == 0.0 {
                    return Err(RuntimeError::raised(
                        operator,
                        RuntimeErrorKind::DivisionByZero,
                    ));
                }
                Ok(Value::Number(a / b))
            }
            TokenType::Greater => {
                let (a, b) = number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a > b))
            }
            TokenType::GreaterEqual => {
                let (a, b) = number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a >= b))
            }
            TokenType::Less => {
                let (a, b) = number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a < b))
            }
            TokenType::LessEqual => {
                let (a, b) = number_operands(operator, &left, &right)?;
                Ok(Value::Boolean(a <= b))
            }
            TokenType::EqualEqual => Ok(Value::Boolean(left.equals(&right))),
            TokenType::BangEqual => Ok(Value::Boolean(!left.equals(&right))),
            _ => unreachable!("the parser only builds binary nodes from binary operators"),
        }
    }

    fn look_up_variable(&self, id: ExprId, name: &Token) -> Result<Value, RuntimeError> {
        let value = if let Some(&distance) = self.locals.get(&id) {
            Environment::get_at(&self.environment, distance, &name.lexeme)
        } else {
            self.globals.borrow().get(&name.lexeme)
        };
        value.ok_or_else(|| {
            RuntimeError::raised(name, RuntimeErrorKind::UndefinedVariable(name.lexeme.clone()))
        })
    }
}

fn number_operands(
    operator: &Token,
    left: &Value,
    right: &Value,
) -> Result<(f64, f64), RuntimeError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(RuntimeError::raised(
            operator,
            RuntimeErrorKind::OperandsMustBeNumbers,
        )),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::Nil.is_truthy());
        assert!(!Value::Boolean(false).is_truthy());
        assert!(Value::Boolean(true).is_truthy());
        assert!(Value::Number(0.0).is_truthy());
        assert!(Value::String(String::new()).is_truthy());
    }

    #[test]
    fn test_equality() {
        assert!(Value::Nil.equals(&Value::Nil));
        assert!(!Value::Nil.equals(&Value::Boolean(false)));
        assert!(Value::Number(1.0).equals(&Value::Number(1.0)));
        assert!(!Value::Number(1.0).equals(&Value::String("1".to_string())));
        assert!(Value::Number(f64::NAN).equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_number_display_drops_integral_fraction() {
        assert_eq!(Value::Number(2.0).to_string(), "2");
        assert_eq!(Value::Number(2.5).to_string(), "2.5");
        assert_eq!(Value::Number(-0.5).to_string(), "-0.5");
    }
}
