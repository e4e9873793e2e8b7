pub mod circuit_breaker;
pub mod shutdown;

pub use circuit_breaker::{BreakerSnapshot, CircuitBreakerRegistry, CircuitState};
pub use shutdown::Shutdown;
