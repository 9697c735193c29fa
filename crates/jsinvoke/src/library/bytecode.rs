//! Global script bytecode
//!
//! rquickjs only serializes modules, and module bodies do not leak their
//! top-level declarations into the global object. Library scripts have to
//! behave like plain `<script>` files, so compile-only evaluation and object
//! (de)serialization go through the raw bindings here.

use std::ffi::CString;
use std::os::raw::c_int;

use rquickjs::{Ctx, Error as EngineError, qjs};

/// Why running a code cache failed
///
/// Both leave the exception pending on the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunError {
    /// The engine did not accept the bytes as bytecode
    Rejected,

    /// The script body threw
    Threw,
}

/// Compile `source` as a non-strict global script and serialize it
///
/// Syntax errors come back as [`EngineError::Exception`] with the exception
/// pending on `ctx`.
pub(crate) fn compile(ctx: &Ctx<'_>, name: &str, source: &str) -> Result<Vec<u8>, EngineError> {
    let filename = CString::new(name)?;
    let text = CString::new(source)?;
    let raw = ctx.as_raw().as_ptr();
    let flags = (qjs::JS_EVAL_TYPE_GLOBAL | qjs::JS_EVAL_FLAG_COMPILE_ONLY) as c_int;

    // SAFETY: `raw` is the live context borrowed through `ctx`, `text` is
    // NUL-terminated and its length excludes the terminator. The compiled
    // function is freed exactly once, and the written buffer is copied out
    // before it is released with the engine allocator that produced it.
    unsafe {
        let function = qjs::JS_Eval(
            raw,
            text.as_ptr(),
            source.len() as _,
            filename.as_ptr(),
            flags,
        );
        if qjs::JS_IsException(function) {
            return Err(EngineError::Exception);
        }

        let mut len: qjs::size_t = 0;
        let buf = qjs::JS_WriteObject(
            raw,
            &mut len,
            function,
            qjs::JS_WRITE_OBJ_BYTECODE as c_int,
        );
        qjs::JS_FreeValue(raw, function);
        if buf.is_null() {
            return Err(EngineError::Exception);
        }

        let bytes = std::slice::from_raw_parts(buf, len as usize).to_vec();
        qjs::js_free(raw, buf.cast());
        Ok(bytes)
    }
}

/// Run bytecode from [`compile`] in the context's global scope
///
/// Top-level `function` and `var` declarations become properties of the
/// global object.
///
/// # Safety
///
/// `bytes` must come from [`compile`] running against the same engine build.
/// The reader validates the header but not arbitrary bytecode.
pub(crate) unsafe fn run(ctx: &Ctx<'_>, bytes: &[u8]) -> Result<(), RunError> {
    let raw = ctx.as_raw().as_ptr();

    let function = qjs::JS_ReadObject(
        raw,
        bytes.as_ptr(),
        bytes.len() as _,
        qjs::JS_READ_OBJ_BYTECODE as c_int,
    );
    if qjs::JS_IsException(function) {
        return Err(RunError::Rejected);
    }

    // Takes ownership of `function`
    let result = qjs::JS_EvalFunction(raw, function);
    if qjs::JS_IsException(result) {
        return Err(RunError::Threw);
    }
    qjs::JS_FreeValue(raw, result);
    Ok(())
}
