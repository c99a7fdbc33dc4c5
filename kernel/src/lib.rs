pub mod ast;
pub mod nbe;

pub use ast::{renote, Builtin, Chunks, Const, Expr, Import, Projection, RawDouble, Span, Var};
pub use nbe::{
    app, conv, eval, judgmentally_equal, normalize, quote, text_show, Closure, Env, Names,
    VChunks, Val, ValProjection,
};

use thiserror::Error;

/// Fixed preamble of the one error the kernel can raise.
pub const INTERNAL_ERROR_MESSAGE: &str = "\
Error: Compiler bug

An ill-typed expression reached the normalizer. This means the type
checker or the normalizer itself has a bug; your program is not at
fault.

Please report it: https://github.com/tarn-lang/tarn/issues";

/// A reduction rule met a shape that well-typed input cannot produce.
/// The kernel does not recover from this; it surfaces as a panic whose
/// payload renders the message below.
#[derive(Error, Debug)]
#[error("{INTERNAL_ERROR_MESSAGE}\n\nContext: {context}")]
pub struct InternalInconsistency {
    pub context: String,
}

pub(crate) fn internal_error(context: impl Into<String>) -> ! {
    panic!(
        "{}",
        InternalInconsistency {
            context: context.into(),
        }
    )
}
