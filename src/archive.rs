//! Archived-conversation storage (SQLite).
//!
//! Repositories over the archive schema. The context pipeline and query
//! handler consume these; the platform gateway writes into them as
//! messages arrive.

pub mod channels;
pub mod links;
pub mod messages;
pub mod profiles;
pub mod query_log;
pub mod users;

pub use channels::ChannelStore;
pub use links::LinkStore;
pub use messages::{GuildStats, MessageStore};
pub use profiles::ProfileStore;
pub use query_log::QueryLogStore;
pub use users::UserStore;
