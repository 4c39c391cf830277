//! IRC gateway: one IRC client per connection, with instant-messaging
//! accounts exposed as servers, buddies as nicks and group conversations
//! as channels.

pub mod backend;
pub mod config;
pub mod dcc;
pub mod directory;
pub mod error;
pub mod irc;
pub mod listener;
pub mod server;
pub mod session;
pub mod settings;
pub mod transport;
