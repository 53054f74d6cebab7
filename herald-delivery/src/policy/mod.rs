//! Policy types that shape delivery.

mod retry;

pub use retry::RetryPolicy;
