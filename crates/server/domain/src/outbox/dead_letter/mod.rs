//! Dead letters
//!
//! Events that can never be sent (mapping defect, unencodable message) or
//! that exhausted their attempts leave the outbox for a separate store where
//! an operator resolves or requeues them.

mod handler;
mod model;
mod repository;

pub use handler::DeadLetterHandler;
pub use model::{DeadLetterEntry, DeadLetterKind, DeadLetterStats};
pub use repository::DeadLetterRepository;
