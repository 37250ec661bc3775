//! Function broker (C2, spec.md §4.2).
//!
//! A registry mapping `(library, name)` to a descriptor. Invocation checks
//! arity/variadic first, then calls the implementation; any `Error` argument
//! short-circuits to itself without invoking the implementation at all.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::EvalError;
use crate::value::Value;

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

#[derive(Clone)]
pub struct FunctionDescriptor {
    pub arity: usize,
    pub variadic: bool,
    pub implementation: NativeFn,
}

/// `(library, name)` -- `library` is `None` for unqualified (no-namespace) calls.
#[derive(Clone, PartialEq, Eq, Hash)]
struct FunctionKey(Option<String>, String);

#[derive(Clone)]
pub struct FunctionBroker {
    functions: HashMap<FunctionKey, FunctionDescriptor>,
}

impl FunctionBroker {
    pub fn empty() -> Self {
        FunctionBroker { functions: HashMap::new() }
    }

    /// The illustrative standard library the function broker ships with
    /// (SPEC_FULL.md §4.2 "a small illustrative library"). Real deployments
    /// register their own libraries the same way with `register`.
    pub fn with_stdlib() -> Self {
        let mut broker = FunctionBroker::empty();
        broker.register_stdlib();
        broker
    }

    pub fn register(&mut self, library: Option<&str>, name: &str, descriptor: FunctionDescriptor) {
        let key = FunctionKey(library.map(str::to_owned), name.to_owned());
        self.functions.insert(key, descriptor);
    }

    pub fn contains(&self, library: Option<&str>, name: &str) -> bool {
        let key = FunctionKey(library.map(str::to_owned), name.to_owned());
        self.functions.contains_key(&key)
    }

    /// Invoke a function. Total: always returns a `Value`, possibly `Value::Error`.
    pub fn invoke(&self, library: Option<&str>, name: &str, args: &[Value]) -> Value {
        if let Some(err) = args.iter().find(|a| a.is_error()) {
            return err.clone();
        }

        let key = FunctionKey(library.map(str::to_owned), name.to_owned());
        let Some(descriptor) = self.functions.get(&key) else {
            return Value::error(
                EvalError::UnknownFunction { library: library.map(str::to_owned), name: name.to_owned() }.to_string(),
            );
        };

        if descriptor.variadic {
            if args.len() < descriptor.arity {
                return Value::error(
                    EvalError::ArityMismatch { name: name.to_owned(), expected: descriptor.arity, got: args.len() }.to_string(),
                );
            }
        } else if args.len() != descriptor.arity {
            return Value::error(
                EvalError::ArityMismatch { name: name.to_owned(), expected: descriptor.arity, got: args.len() }.to_string(),
            );
        }

        (descriptor.implementation)(args)
    }

    fn register_stdlib(&mut self) {
        self.register(
            Some("string"),
            "length",
            FunctionDescriptor {
                arity: 1,
                variadic: false,
                implementation: Arc::new(|args| match &args[0] {
                    Value::Text(s) => Value::Number(s.chars().count().into()),
                    other => Value::error(format!("string.length: expected Text, got {}", other.type_name())),
                }),
            },
        );
        self.register(
            Some("string"),
            "concat",
            FunctionDescriptor {
                arity: 2,
                variadic: true,
                implementation: Arc::new(|args| {
                    let mut out = String::new();
                    for a in args {
                        match a {
                            Value::Text(s) => out.push_str(s),
                            other => return Value::error(format!("string.concat: expected Text, got {}", other.type_name())),
                        }
                    }
                    Value::Text(out)
                }),
            },
        );
        self.register(
            Some("number"),
            "abs",
            FunctionDescriptor {
                arity: 1,
                variadic: false,
                implementation: Arc::new(|args| match &args[0] {
                    Value::Number(d) => Value::Number(d.abs()),
                    other => Value::error(format!("number.abs: expected Number, got {}", other.type_name())),
                }),
            },
        );
        self.register(
            Some("array"),
            "length",
            FunctionDescriptor {
                arity: 1,
                variadic: false,
                implementation: Arc::new(|args| match &args[0] {
                    Value::Array(items) => Value::Number(items.len().into()),
                    other => Value::error(format!("array.length: expected Array, got {}", other.type_name())),
                }),
            },
        );
        self.register(
            Some("array"),
            "contains",
            FunctionDescriptor {
                arity: 2,
                variadic: false,
                implementation: Arc::new(|args| match &args[0] {
                    Value::Array(items) => Value::Boolean(items.iter().any(|v| v.deep_equals(&args[1]))),
                    other => Value::error(format!("array.contains: expected Array, got {}", other.type_name())),
                }),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_argument_short_circuits_without_calling_the_implementation() {
        let broker = FunctionBroker::with_stdlib();
        let result = broker.invoke(Some("string"), "length", &[Value::error("boom")]);
        assert_eq!(result, Value::error("boom"));
    }

    #[test]
    fn arity_mismatch_is_an_error_value_not_a_panic() {
        let broker = FunctionBroker::with_stdlib();
        let result = broker.invoke(Some("string"), "length", &[]);
        assert!(result.is_error());
    }

    #[test]
    fn unknown_function_is_an_error_value() {
        let broker = FunctionBroker::with_stdlib();
        let result = broker.invoke(Some("nope"), "nope", &[]);
        assert!(result.is_error());
    }

    #[test]
    fn stdlib_string_concat_is_variadic() {
        let broker = FunctionBroker::with_stdlib();
        let result = broker.invoke(
            Some("string"),
            "concat",
            &[Value::text("a"), Value::text("b"), Value::text("c")],
        );
        assert_eq!(result, Value::text("abc"));
    }

    #[test]
    fn stdlib_array_contains() {
        let broker = FunctionBroker::with_stdlib();
        let arr = Value::Array(vec![Value::Number(1.into()), Value::Number(2.into())]);
        let result = broker.invoke(Some("array"), "contains", &[arr, Value::Number(2.into())]);
        assert_eq!(result, Value::Boolean(true));
    }
}
