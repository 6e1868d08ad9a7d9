//! Mailbox entities consumed by automation.

pub mod model;

pub use model::{Account, Draft, EmailMessage, MailProvider};
