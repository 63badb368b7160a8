pub mod connection;
pub mod store;

pub use store::{ImapStore, MailStore};
