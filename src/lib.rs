//! Conversational appointment scheduling for a furniture upholstery store.
//!
//! Clients chat with an assistant that books, cancels and reschedules
//! ONLINE or IN_STORE appointments; operators manage the same calendar over
//! HTTP and can take a conversation over from the bot.

pub mod api;
pub mod core;
pub mod infrastructure;
