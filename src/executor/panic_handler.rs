use crate::error::{Error, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Run `f`, turning a panic into an [`Error::WorkerPanic`] tagged with
/// `label`. The calling thread survives and can take the next submission.
pub(crate) fn catch_panic<F, R>(label: &str, f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let message = panic_message(payload);
        error!(context = label, %message, "submission panicked");
        Error::WorkerPanic(format!("{}: {}", label, message))
    })
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
