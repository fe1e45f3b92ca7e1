//! The `utils` module holds the pieces every other module leans on:
//! the gateway error type and the tracing setup.

pub mod error;
pub mod logging;

pub use error::{GatewayError, Result};

#[cfg(test)]
mod tests {
    use super::logging;

    #[test]
    fn logging_init_accepts_levels() {
        // Should not panic
        logging::init("info");
        logging::init("debug");
        logging::init("warn");
        logging::init("nonsense");
    }
}
