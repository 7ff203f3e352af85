// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! JMESPath runtime used by rule patterns: the builtin functions plus
//! `split(subject, separator)`.
//!
//! `split` returns the parts of a string as an array and `null` for any other
//! subject, so `split(properties.user, '[')[0]` stays `null` when the field is
//! missing instead of failing the whole attribute.

use std::sync::{Arc, OnceLock};

use jmespath::functions::{ArgumentType, CustomFunction, Signature};
use jmespath::{Context, Expression, JmespathError, Rcvar, Runtime, Variable};

fn split(args: &[Rcvar], _ctx: &mut Context<'_>) -> Result<Rcvar, JmespathError> {
    let (Some(Variable::String(subject)), Some(Variable::String(separator))) =
        (args.first().map(|a| &**a), args.get(1).map(|a| &**a))
    else {
        return Ok(Arc::new(Variable::Null));
    };
    if separator.is_empty() {
        return Ok(Arc::new(Variable::Array(vec![Arc::new(Variable::String(
            subject.clone(),
        ))])));
    }
    let parts = subject
        .split(separator.as_str())
        .map(|part| Arc::new(Variable::String(part.to_string())))
        .collect();
    Ok(Arc::new(Variable::Array(parts)))
}

fn runtime() -> &'static Runtime {
    // Runtime is Sync but not Send, so a leaked reference is what gets shared.
    static RUNTIME: OnceLock<&'static Runtime> = OnceLock::new();
    RUNTIME.get_or_init(|| {
        let mut runtime = Runtime::new();
        runtime.register_builtin_functions();
        runtime.register_function(
            "split",
            Box::new(CustomFunction::new(
                Signature::new(vec![ArgumentType::Any, ArgumentType::String], None),
                Box::new(split),
            )),
        );
        Box::leak(Box::new(runtime))
    })
}

/// Compiles a rule pattern against the shared runtime.
///
/// # Errors
///
/// Returns the compile error if `pattern` is not valid JMESPath. Unknown
/// function names are only reported when the expression is searched.
pub fn compile(pattern: &str) -> Result<Expression<'static>, JmespathError> {
    runtime().compile(pattern)
}
