//! Diagnostic Context
//!
//! Task-local key/value pairs describing the current unit of work (for
//! example the request id). The cache copies one of them onto the span it
//! opens while decoding remote values, so decode failures can be traced back
//! to the request that triggered them.

use std::collections::HashMap;
use std::future::Future;

tokio::task_local! {
    static CONTEXT: HashMap<String, String>;
}

/// Runs `future` with `values` as its diagnostic context.
pub async fn scope<F>(values: HashMap<String, String>, future: F) -> F::Output
where
    F: Future,
{
    CONTEXT.scope(values, future).await
}

/// Returns the value of `name` in the current task's context, if any.
pub fn current(name: &str) -> Option<String> {
    CONTEXT
        .try_with(|values| values.get(name).cloned())
        .ok()
        .flatten()
}
