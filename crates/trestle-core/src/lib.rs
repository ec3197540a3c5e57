pub mod approvals;
pub mod error;
pub mod sessions;

pub use approvals::*;
pub use error::*;
pub use sessions::*;
