//! # Stack Lifecycle
//!
//! Template parameter construction and the poller that follows a stack to a
//! terminal state.

pub mod params;
pub mod waiter;

pub use params::{
    AppStackParameters, CoreStackParameters, ParameterError, ParameterOverrides, ParameterSlot,
    ParameterValue, StackParameter, StackParameters, TenantStackParameters,
};
pub use waiter::{StackWaiter, TerminalStack, WaitError};
