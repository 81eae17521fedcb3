//! Session and message persistence for Taskloom.
//!
//! Both backends implement [`SessionStore`] and [`MessageStore`] on a single
//! type and publish message events on a [`Broker`] so observers can follow
//! a streaming turn.
//!
//! [`SessionStore`]: taskloom_core::SessionStore
//! [`MessageStore`]: taskloom_core::MessageStore
//! [`Broker`]: taskloom_core::Broker

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
