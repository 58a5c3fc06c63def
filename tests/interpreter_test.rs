use std::{cell::RefCell, rc::Rc};

use loxide::interpreter::{Interpreter, RuntimeError, RuntimeErrorKind};

fn run(source: &str) -> (Result<(), RuntimeError>, String) {
    let tokens = loxide::scanner::scan(source).expect("scan should succeed on a valid program");
    let program =
        loxide::parser::program(&tokens).expect("parse should succeed on a valid program");
    let locals =
        loxide::resolver::resolve(&program).expect("resolve should succeed on a valid program");

    let output = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(output.clone());
    interpreter.resolve(locals);
    let result = interpreter.interpret(&program);
    let printed = String::from_utf8(output.take()).expect("output should be valid UTF-8");
    (result, printed)
}

fn test_valid_program(source: &str, expected_output: &str) {
    let (result, output) = run(source);
    result.expect("interpret should succeed on a valid program");
    assert_eq!(output, expected_output);
}

fn expect_runtime_error(source: &str) -> (RuntimeError, String) {
    let (result, output) = run(source);
    (
        result.expect_err("program should stop with a runtime error"),
        output,
    )
}

#[test]
fn test_fib() {
    let source = r#"
    fun fib(n) {
        if (n <= 1) return n;
        return fib(n - 1) + fib(n - 2);
    }

    for (var i = 0; i < 10; i = i + 1) {
        print fib(i);
    }
    "#;
    test_valid_program(source, "0\n1\n1\n2\n3\n5\n8\n13\n21\n34\n");
}

#[test]
fn test_precedence_and_grouping() {
    test_valid_program("print 1 + 2 * 3; print (1 + 2) * 3;", "7\n9\n");
}

#[test]
fn test_string_concatenation_either_side() {
    test_valid_program("print \"a\" + 1; print 1 + \"a\";", "a1\na1\n");
}

#[test]
fn test_integral_numbers_print_without_fraction() {
    test_valid_program("print 2.0 + 1; print 5 / 2;", "3\n2.5\n");
}

#[test]
fn test_division_by_zero_is_an_error_not_infinity() {
    let (error, output) = expect_runtime_error("print \"before\"; print 1 / 0;");
    assert_eq!(output, "before\n");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::DivisionByZero,
            ..
        }
    ));
}

#[test]
fn test_runtime_errors_carry_the_line() {
    let (error, _) = expect_runtime_error("var a = 1;\nprint a / 0;");
    assert_eq!(error.to_string(), "[line 2] Cannot divide by zero.");
}

#[test]
fn test_truthiness() {
    test_valid_program(
        "print !nil; print !0; print !\"\"; print !false;",
        "true\nfalse\nfalse\ntrue\n",
    );
}

#[test]
fn test_logical_operators_return_the_decisive_operand() {
    test_valid_program(
        "print \"hi\" or 2; print nil or \"yes\"; print nil and 2; print 1 and 2;",
        "hi\nyes\nnil\n2\n",
    );
}

#[test]
fn test_ternary_evaluates_only_the_chosen_branch() {
    let source = r#"
    fun loud() {
        print "evaluated";
        return 1;
    }
    print true ? 1 : 2;
    print false ? loud() : 2;
    print 1 < 2 ? "yes" : "no";
    "#;
    test_valid_program(source, "1\n2\nyes\n");
}

#[test]
fn test_closure_counter() {
    let source = r#"
    fun makeCounter() {
        var i = 0;
        fun count() {
            i = i + 1;
            return i;
        }
        return count;
    }

    var counter = makeCounter();
    var i = 100;
    print counter(); // 1
    print counter(); // 2
    print i;
    "#;
    test_valid_program(source, "1\n2\n100\n");
}

#[test]
fn test_functions_cant_break_scope() {
    let source = r#"
    var a = "global";
    {
        fun showA() {
            print a;
        }
        showA(); // global
        var a = "block";
        showA(); // global
    }
    "#;
    test_valid_program(source, "global\nglobal\n");
}

#[test]
fn test_for_loop_matches_hand_written_while() {
    let source = r#"
    for (var i = 0; i < 3; i = i + 1) print i;
    {
        var i = 0;
        while (i < 3) {
            print i;
            i = i + 1;
        }
    }
    "#;
    test_valid_program(source, "0\n1\n2\n0\n1\n2\n");
}

#[test]
fn test_assignment_is_an_expression() {
    test_valid_program("var a = 1; print a = 2; print a;", "2\n2\n");
}

#[test]
fn test_function_without_return_yields_nil() {
    test_valid_program("fun noop() {} print noop();", "nil\n");
}

#[test]
fn test_return_unwinds_nested_blocks() {
    let source = r#"
    fun find() {
        var i = 0;
        while (true) {
            if (i == 3) {
                return i;
            }
            i = i + 1;
        }
    }
    print find();
    "#;
    test_valid_program(source, "3\n");
}

#[test]
fn test_classes_and_fields() {
    let source = r#"
    class Bag {}
    var bag = Bag();
    bag.x = 1;
    bag.x = bag.x + 1;
    print bag.x;
    "#;
    test_valid_program(source, "2\n");
}

#[test]
fn test_methods_and_this() {
    let source = r#"
    class Counter {
        init() {
            this.count = 0;
        }
        increment() {
            this.count = this.count + 1;
            return this.count;
        }
    }

    var counter = Counter();
    print counter.increment(); // 1
    print counter.increment(); // 2
    "#;
    test_valid_program(source, "1\n2\n");
}

#[test]
fn test_bound_methods_remember_their_instance() {
    let source = r#"
    class Person {
        init(name) {
            this.name = name;
        }
        greet() {
            return "hi " + this.name;
        }
    }

    var person = Person("ada");
    var greet = person.greet;
    print greet();
    "#;
    test_valid_program(source, "hi ada\n");
}

#[test]
fn test_initializer_always_yields_the_instance() {
    let source = r#"
    class Thing {
        init() {
            this.x = 1;
        }
    }
    var thing = Thing();
    print thing;
    print thing.init();
    "#;
    test_valid_program(source, "Thing instance\nThing instance\n");
}

#[test]
fn test_early_return_from_initializer() {
    let source = r#"
    class Early {
        init(flag) {
            if (flag) return;
            this.tagged = true;
        }
    }
    print Early(true);
    "#;
    test_valid_program(source, "Early instance\n");
}

#[test]
fn test_inheritance_and_super() {
    let source = r#"
    class Base {
        greet() {
            return "base";
        }
    }
    class Derived < Base {
        greet() {
            return super.greet() + "-derived";
        }
    }
    print Derived().greet();
    "#;
    test_valid_program(source, "base-derived\n");
}

#[test]
fn test_inherited_methods_and_overrides() {
    let source = r#"
    class Counter {
        init() {
            this.count = 0;
        }
        increment() {
            this.count = this.count + 1;
            return this.count;
        }
    }

    class DecCounter < Counter {
        init() {
            super.init();
        }
        increment() {
            this.count = this.count - 1;
            return this.count;
        }
    }

    var counter = DecCounter();
    print counter.increment(); // -1
    print counter.increment(); // -2
    "#;
    test_valid_program(source, "-1\n-2\n");
}

#[test]
fn test_static_methods() {
    let source = r#"
    class Math {
        class square(n) {
            return n * n;
        }
    }
    print Math.square(3);
    "#;
    test_valid_program(source, "9\n");
}

#[test]
fn test_static_methods_are_not_inherited() {
    let source = r#"
    class Base {
        class origin() {
            return "Base";
        }
    }
    class Derived < Base {}
    print Base.origin();
    Derived.origin();
    "#;
    let (error, output) = expect_runtime_error(source);
    assert_eq!(output, "Base\n");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::UndefinedProperty(name),
            ..
        } if name == "origin"
    ));
}

#[test]
fn test_value_display() {
    let source = r#"
    fun greet() {}
    class Thing {}
    print greet;
    print Thing;
    print Thing();
    print clock;
    "#;
    test_valid_program(source, "<fn greet>\nThing\nThing instance\n<native fn>\n");
}

#[test]
fn test_clock_returns_a_positive_number() {
    test_valid_program("print clock() > 0;", "true\n");
}

#[test]
fn test_calling_a_non_callable_is_an_error() {
    let (error, _) = expect_runtime_error("\"hi\"();");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::NotCallable,
            ..
        }
    ));
}

#[test]
fn test_arity_is_checked_exactly() {
    let (error, _) = expect_runtime_error("fun f(a) {} f(1, 2);");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::ArityMismatch {
                expected: 1,
                got: 2
            },
            ..
        }
    ));
}

#[test]
fn test_undefined_variable() {
    let (error, _) = expect_runtime_error("print missing;");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::UndefinedVariable(name),
            ..
        } if name == "missing"
    ));
}

#[test]
fn test_undefined_property() {
    let (error, _) = expect_runtime_error("class Thing {} Thing().missing;");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::UndefinedProperty(name),
            ..
        } if name == "missing"
    ));
}

#[test]
fn test_property_access_requires_an_instance_or_class() {
    let (error, _) = expect_runtime_error("var a = 1; print a.b;");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::OnlyInstancesHaveProperties,
            ..
        }
    ));

    let (error, _) = expect_runtime_error("var a = 1; a.b = 2;");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::OnlyInstancesHaveFields,
            ..
        }
    ));
}

#[test]
fn test_superclass_must_be_a_class() {
    let (error, _) = expect_runtime_error("var NotAClass = 1; class Broken < NotAClass {}");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::SuperclassNotClass,
            ..
        }
    ));
}

#[test]
fn test_call_depth_is_bounded() {
    let source = "fun recurse() { return recurse(); } recurse();";
    let tokens = loxide::scanner::scan(source).expect("should scan");
    let program = loxide::parser::program(&tokens).expect("should parse");
    let locals = loxide::resolver::resolve(&program).expect("should resolve");

    let output = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(output).with_max_call_depth(32);
    interpreter.resolve(locals);
    let error = interpreter
        .interpret(&program)
        .expect_err("unbounded recursion should be cut off");
    assert!(matches!(
        error,
        RuntimeError::Raised {
            kind: RuntimeErrorKind::CallDepthExceeded(32),
            ..
        }
    ));
}

#[test]
fn test_separately_resolved_batches_share_one_session() {
    let output = Rc::new(RefCell::new(Vec::new()));
    let mut interpreter = Interpreter::new(output.clone());

    let lines = [
        "var a = 1;",
        "fun add(n) { return a + n; }",
        "print add(2);",
    ];
    for line in lines {
        let tokens = loxide::scanner::scan(line).expect("should scan");
        let program = loxide::parser::program(&tokens).expect("should parse");
        let locals = loxide::resolver::resolve(&program).expect("should resolve");
        interpreter.resolve(locals);
        interpreter.interpret(&program).expect("should interpret");
    }

    let printed = String::from_utf8(output.take()).expect("output should be valid UTF-8");
    assert_eq!(printed, "3\n");
}
