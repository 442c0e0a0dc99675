pub mod command;
pub mod telemetry;

pub use command::*;
pub use telemetry::*;
