//! Miscellaneous utility structs and functions.

mod errors;
pub mod retry;
mod task_scope;

#[doc(inline)]
pub use self::{
    errors::{Categorized, ErrorKind},
    retry::Retryable,
    task_scope::{Cancelled, TaskHandle, TaskScope},
};
