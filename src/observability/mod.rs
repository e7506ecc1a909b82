//! Observability for the edge agent: structured logging via `tracing`

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat, LogSettings};

pub use logging::session_span;
