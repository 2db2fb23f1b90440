pub mod driver;
pub mod error;
pub mod types;

pub use driver::SessionDriver;
pub use error::{SchedulerError, SchedulerResult};
pub use types::{DriveOutcome, DriverUpdate, SchedulerConfig};
