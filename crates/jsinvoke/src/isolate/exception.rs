//! Extraction of thrown values from the engine
//!
//! QuickJS reports a throw as `Error::Exception` and parks the thrown value on
//! the context; it has to be taken with `Ctx::catch` before anything else runs.

use rquickjs::convert::Coerced;
use rquickjs::{Ctx, Error as EngineError};

/// A value thrown by script code, as surfaced by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thrown {
    pub message: String,
    pub source: Option<String>,
    pub stack_trace: Option<String>,
}

impl Thrown {
    /// Take the pending exception off the context
    pub fn catch(ctx: &Ctx<'_>) -> Self {
        let value = ctx.catch();

        if let Some(exception) = value.as_exception() {
            let stack_trace = exception.stack().filter(|stack| !stack.is_empty());
            let source = match (exception.file(), exception.line()) {
                (Some(file), Some(line)) if !file.is_empty() => Some(format!("{file}:{line}")),
                _ => stack_trace.as_deref().and_then(first_frame_location),
            };
            return Self {
                message: exception.message().unwrap_or_default(),
                source,
                stack_trace,
            };
        }

        // `throw "text"` and friends carry no location or stack
        let message = value
            .get::<Coerced<String>>()
            .map(|Coerced(text)| text)
            .unwrap_or_else(|_| "uncaught exception".to_string());
        Self {
            message,
            source: None,
            stack_trace: None,
        }
    }
}

/// Describe an engine error, taking the pending exception if there is one
pub fn describe(ctx: &Ctx<'_>, error: EngineError) -> String {
    if matches!(error, EngineError::Exception) {
        let thrown = Thrown::catch(ctx);
        match thrown.source {
            Some(source) => format!("{} ({source})", thrown.message),
            None => thrown.message,
        }
    } else {
        error.to_string()
    }
}

/// Location of the innermost frame of a QuickJS stack trace
///
/// Frames look like `    at fn (file:line)` or `    at file:line`.
pub fn first_frame_location(stack: &str) -> Option<String> {
    let frame = stack.lines().map(str::trim).find(|line| line.starts_with("at "))?;
    let location = match (frame.rfind('('), frame.ends_with(')')) {
        (Some(open), true) => &frame[open + 1..frame.len() - 1],
        _ => frame.trim_start_matches("at ").trim(),
    };
    (!location.is_empty()).then(|| location.to_string())
}
