pub mod redirect;
mod store;
mod token;

pub use store::{CorrelationStore, PendingEntry};
pub use token::{CorrelationToken, HEADER_NAME};
