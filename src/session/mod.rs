pub mod error;
pub mod store;
pub mod types;

pub use error::{SessionError, SessionResult};
pub use store::LedgerStore;
pub use types::{PartLedger, SessionSnapshot, UploadSession, UploadStatus};
