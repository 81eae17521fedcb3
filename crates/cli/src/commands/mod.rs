pub mod agents;
pub mod chat;
pub mod init;
pub mod pricing;
pub mod sessions;
pub mod tools;
