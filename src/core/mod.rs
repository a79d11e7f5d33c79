pub mod calendar;
pub mod clock;
pub mod datetime;
pub mod errors;
pub mod interpreter;
pub mod locks;
pub mod orchestrator;
pub mod scheduler;
pub mod services;
pub mod traits;
pub mod transport;
