use std::cell::RefCell;
use std::fmt::Display;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::FunctionDecl;
use crate::token::Token;

use super::class::{Class, Instance};
use super::environment::Environment;
use super::{Interpreter, RuntimeError, RuntimeErrorKind, Value};

/// A user-defined function value: the shared declaration plus the
/// environment it closed over. Binding a method produces a fresh `Function`
/// with the same declaration and a one-entry child environment for `this`.
#[derive(Clone)]
pub struct Function {
    pub declaration: Rc<FunctionDecl>,
    pub closure: Rc<RefCell<Environment>>,
    pub is_initializer: bool,
}

impl Function {
    pub fn bind(&self, instance: &Rc<RefCell<Instance>>) -> Function {
        let environment = Environment::nested(self.closure.clone());
        environment
            .borrow_mut()
            .define("this".to_string(), Value::Instance(instance.clone()));
        Function {
            declaration: self.declaration.clone(),
            closure: environment,
            is_initializer: self.is_initializer,
        }
    }

    fn call(
        &self,
        interpreter: &mut Interpreter,
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        // The call environment hangs off the captured closure, not the
        // caller's environment.
        let environment = Environment::nested(self.closure.clone());
        for (param, argument) in self.declaration.params.iter().zip(arguments) {
            environment
                .borrow_mut()
                .define(param.lexeme.clone(), argument.clone());
        }

        let returned = interpreter.execute_in_env(environment, |interpreter| {
            for statement in &self.declaration.body {
                if let Some(value) = interpreter.execute(statement)? {
                    return Ok(Some(value));
                }
            }
            Ok(None)
        })?;

        if self.is_initializer {
            // An initializer yields its instance no matter how it exits.
            return Ok(Environment::get_at(&self.closure, 0, "this").unwrap_or(Value::Nil));
        }
        Ok(returned.unwrap_or(Value::Nil))
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.declaration.name.lexeme)
            .field("closure", &self.closure.as_ptr())
            .field("is_initializer", &self.is_initializer)
            .finish()
    }
}

#[derive(Debug)]
pub enum Callable {
    Native {
        name: &'static str,
        arity: usize,
        function: fn(&[Value]) -> Result<Value, RuntimeErrorKind>,
    },
    Function(Function),
    Class(Rc<Class>),
}

impl Callable {
    pub fn arity(&self) -> usize {
        match self {
            Callable::Native { arity, .. } => *arity,
            Callable::Function(function) => function.declaration.params.len(),
            Callable::Class(class) => class
                .find_method("init")
                .map_or(0, |init| init.declaration.params.len()),
        }
    }

    pub fn call(
        &self,
        interpreter: &mut Interpreter,
        paren: &Token,
        arguments: &[Value],
    ) -> Result<Value, RuntimeError> {
        match self {
            Callable::Native { function, .. } => function(arguments).map_err(|kind| {
                RuntimeError::Raised {
                    token: paren.clone(),
                    kind,
                }
            }),
            Callable::Function(function) => function.call(interpreter, arguments),
            Callable::Class(class) => {
                let instance = Rc::new(RefCell::new(Instance {
                    class: class.clone(),
                    fields: FxHashMap::default(),
                }));
                if let Some(init) = class.find_method("init") {
                    init.bind(&instance).call(interpreter, arguments)?;
                }
                Ok(Value::Instance(instance))
            }
        }
    }
}

impl Display for Callable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Callable::Native { .. } => write!(f, "<native fn>"),
            Callable::Function(function) => write!(f, "<fn {}>", function.declaration.name.lexeme),
            Callable::Class(class) => write!(f, "{}", class.name),
        }
    }
}
