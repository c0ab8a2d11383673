//! Destination planning.
//!
//! # Responsibilities
//! - Turn a parsed envelope into the ordered list of endpoints to dial
//! - Reroute DNS datagrams to the public resolver
//! - Always end the list with the fallback relay

use crate::config::UpstreamConfig;
use crate::protocol::{Command, Destination, ParsedHeader};

/// Process-wide endpoints every plan may include.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upstreams {
    /// Always-last candidate.
    pub fallback_relay: Destination,
    /// Where DNS datagrams are sent, whatever address the caller named.
    pub public_resolver: Destination,
}

impl Upstreams {
    pub fn from_config(config: &UpstreamConfig) -> Self {
        Self {
            fallback_relay: Destination::new(&config.fallback_host, config.fallback_port),
            public_resolver: Destination::new(&config.resolver_host, config.resolver_port),
        }
    }
}

/// Build the candidate list for a tunnel.
pub fn plan(header: &ParsedHeader, upstreams: &Upstreams) -> Vec<Destination> {
    let primary = match header.command {
        Command::Stream => header.destination.clone(),
        // The port-53 check already passed in the codec; the caller's
        // address is not dialed.
        Command::DatagramDns => upstreams.public_resolver.clone(),
    };
    vec![primary, upstreams.fallback_relay.clone()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upstreams() -> Upstreams {
        Upstreams {
            fallback_relay: Destination::new("relay.example.net", 443),
            public_resolver: Destination::new("8.8.4.4", 53),
        }
    }

    fn header(command: Command, host: &str, port: u16) -> ParsedHeader {
        ParsedHeader {
            version: 0,
            command,
            destination: Destination::new(host, port),
            payload_offset: 26,
        }
    }

    #[test]
    fn stream_dials_destination_then_fallback() {
        let plan = plan(&header(Command::Stream, "example.com", 80), &upstreams());
        assert_eq!(
            plan,
            vec![
                Destination::new("example.com", 80),
                Destination::new("relay.example.net", 443),
            ]
        );
    }

    #[test]
    fn dns_datagram_goes_to_public_resolver() {
        let plan = plan(&header(Command::DatagramDns, "10.0.0.1", 53), &upstreams());
        assert_eq!(
            plan,
            vec![
                Destination::new("8.8.4.4", 53),
                Destination::new("relay.example.net", 443),
            ]
        );
    }

    #[test]
    fn from_config_uses_defaults() {
        let mut config = UpstreamConfig::default();
        config.fallback_host = "relay.example.net".into();
        assert_eq!(Upstreams::from_config(&config), upstreams());
    }
}
