pub mod clock;
pub mod retry;
pub mod telemetry;

pub use clock::*;
pub use retry::*;
pub use telemetry::*;
