//! Script execution inside a borrowed isolate
//!
//! Everything here runs synchronously on a blocking thread: binding the
//! request data, evaluating the script, and turning whatever came back into
//! an [`ExecutionOutcome`].

use rquickjs::context::EvalOptions;
use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Error as EngineError, Type, Value};
use serde_json::{Number, Value as JsonValue};
use tracing::{debug, instrument, warn};

use crate::isolate::{Isolate, Thrown};
use crate::types::{ExecutionOutcome, ExecutionRequest, InputData};

/// Name of the global the request data is bound to
pub const DATA_GLOBAL: &str = "data";

/// Largest integer a JavaScript number represents exactly
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// Run one request in the isolate's current global scope
#[instrument(skip_all, fields(id = isolate.id(), generation = isolate.generation()))]
pub(crate) fn run_script(isolate: &Isolate, request: &ExecutionRequest) -> ExecutionOutcome {
    isolate.context().with(|ctx| {
        if let Some(data) = &request.data
            && let Err(message) = bind_data(&ctx, data)
        {
            return ExecutionOutcome::InternalError { message };
        }

        let mut options = EvalOptions::default();
        options.global = true;
        options.strict = false;

        match ctx.eval_with_options::<Value, _>(request.script.as_str(), options) {
            Ok(value) => classify(&ctx, value),
            Err(EngineError::Exception) => {
                let thrown = Thrown::catch(&ctx);
                debug!(message = %thrown.message, "script threw");
                ExecutionOutcome::ScriptError {
                    message: thrown.message,
                    source: thrown.source,
                    stack_trace: thrown.stack_trace,
                }
            }
            Err(error) => {
                warn!(%error, "engine fault while running script");
                ExecutionOutcome::InternalError {
                    message: error.to_string(),
                }
            }
        }
    })
}

/// Bind the request data as the global `data`
///
/// Text that parses as JSON is bound as the parsed value; anything else is
/// bound as the literal string.
fn bind_data(ctx: &Ctx<'_>, data: &InputData) -> Result<(), String> {
    let text = data
        .to_text()
        .map_err(|error| format!("failed to serialize data: {error}"))?;
    let globals = ctx.globals();

    if serde_json::from_str::<serde::de::IgnoredAny>(&text).is_ok() {
        match ctx.json_parse(text.as_str()) {
            Ok(value) => {
                return globals
                    .set(DATA_GLOBAL, value)
                    .map_err(|error| format!("failed to bind data: {error}"));
            }
            Err(_) => {
                // Engine disagreed with serde_json; fall through to text
                let _ = ctx.catch();
            }
        }
    }

    globals
        .set(DATA_GLOBAL, text.as_str())
        .map_err(|error| format!("failed to bind data: {error}"))
}

/// Classify a completion value
fn classify<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> ExecutionOutcome {
    match value.type_of() {
        Type::Undefined | Type::Null | Type::Uninitialized => ExecutionOutcome::EmptyResult,
        Type::Bool => scalar(value.as_bool().map(JsonValue::Bool)),
        Type::Int => scalar(value.as_int().map(JsonValue::from)),
        Type::Float => match value.as_float().and_then(float_to_json) {
            Some(number) => ExecutionOutcome::Value(number),
            None => coerce(ctx, value),
        },
        Type::String => match value.as_string().map(|text| text.to_string()) {
            Some(Ok(text)) => ExecutionOutcome::Value(JsonValue::String(text)),
            Some(Err(error)) => internal("failed to read string result", error),
            None => coerce(ctx, value),
        },
        Type::Symbol => describe_symbol(ctx, value),
        _ if value.is_object() => serialize_object(ctx, value),
        _ => coerce(ctx, value),
    }
}

fn scalar(value: Option<JsonValue>) -> ExecutionOutcome {
    match value {
        Some(value) => ExecutionOutcome::Value(value),
        None => ExecutionOutcome::InternalError {
            message: "result type changed during conversion".to_string(),
        },
    }
}

/// Objects and arrays go through the engine's own JSON serialization
fn serialize_object<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> ExecutionOutcome {
    let text = match ctx.json_stringify(value) {
        Ok(Some(text)) => match text.to_string() {
            Ok(text) => text,
            Err(error) => return internal("failed to read serialized result", error),
        },
        // Functions and other values JSON has no form for
        Ok(None) => return ExecutionOutcome::Object(JsonValue::Object(Default::default())),
        Err(EngineError::Exception) => {
            let thrown = Thrown::catch(ctx);
            return ExecutionOutcome::InternalError {
                message: format!("failed to serialize result: {}", thrown.message),
            };
        }
        Err(error) => return internal("failed to serialize result", error),
    };

    match serde_json::from_str(&text) {
        Ok(result) => ExecutionOutcome::Object(result),
        Err(error) => internal("engine produced invalid JSON", error),
    }
}

/// String form of values JSON has no scalar for (`NaN`, `Infinity`, BigInt)
fn coerce<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> ExecutionOutcome {
    match value.get::<Coerced<String>>() {
        Ok(Coerced(text)) => ExecutionOutcome::Value(JsonValue::String(text)),
        Err(error) => conversion_failed(ctx, error),
    }
}

/// Symbols print as `Symbol(description)`, like `String(symbol)`
///
/// Implicit string conversion of a symbol throws, so the description is
/// read directly.
fn describe_symbol<'js>(ctx: &Ctx<'js>, value: Value<'js>) -> ExecutionOutcome {
    let Some(symbol) = value.as_symbol() else {
        return coerce(ctx, value);
    };
    let description = match symbol.description() {
        Ok(description) => description,
        Err(error) => return conversion_failed(ctx, error),
    };
    if description.is_undefined() {
        return ExecutionOutcome::Value(JsonValue::String("Symbol()".to_string()));
    }
    match description.get::<Coerced<String>>() {
        Ok(Coerced(text)) => ExecutionOutcome::Value(JsonValue::String(format!("Symbol({text})"))),
        Err(error) => conversion_failed(ctx, error),
    }
}

/// An exception raised while converting is taken off the context
fn conversion_failed(ctx: &Ctx<'_>, error: EngineError) -> ExecutionOutcome {
    match error {
        EngineError::Exception => {
            let thrown = Thrown::catch(ctx);
            internal("failed to convert result", thrown.message)
        }
        error => internal("failed to convert result", error),
    }
}

/// Integral floats render the way JavaScript prints them, without a fraction
fn float_to_json(number: f64) -> Option<JsonValue> {
    if number.fract() == 0.0 && number.abs() <= MAX_SAFE_INTEGER {
        return Some(JsonValue::from(number as i64));
    }
    Number::from_f64(number).map(JsonValue::Number)
}

fn internal(what: &str, error: impl std::fmt::Display) -> ExecutionOutcome {
    warn!(%error, "{what}");
    ExecutionOutcome::InternalError {
        message: format!("{what}: {error}"),
    }
}
