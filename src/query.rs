//! Question answering: mode classification, context assembly, follow-up
//! windows, and orchestration.

pub mod context;
pub mod followup;
pub mod handler;
pub mod mode;
pub mod prompts;

pub use context::{ContextBuilder, QueryContext};
pub use followup::FollowUpTracker;
pub use handler::QueryHandler;
pub use mode::QueryMode;
