use std::net::{IpAddr, SocketAddr};

use clap::Parser;

/// Real-time message relay and call signaling server.
#[derive(Parser, Debug, Clone)]
#[command(name = "room-relay", version, about)]
pub struct Config {
    /// Address to listen on.
    #[arg(long, env = "RELAY_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to listen on.
    #[arg(long, short, env = "RELAY_PORT", default_value_t = 2052)]
    pub port: u16,
}

impl Config {
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
