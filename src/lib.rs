pub mod broadcast;
pub mod config;
pub mod error;
pub mod messages;
pub mod outbound;
pub mod registry;
pub mod room;
pub mod routes;
pub mod server;
pub mod signaling;

pub use config::Config;
pub use error::RelayError;
pub use server::Server;
