//! `Transport` header grammar (RFC 2326 section 12.39).
//!
//! A `Transport` header value is a comma-separated list of alternatives,
//! offered in preference order; each alternative is a `;`-separated list
//! of tokens. This module parses and builds single alternatives; the
//! endpoint picks among them.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Udp,
    Tcp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Unicast,
    Multicast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Play,
    Record,
}

/// A port pair, e.g. `client_port=3456-3457`. The second element defaults
/// to `first + 1` when absent from the wire form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPair {
    pub first: u16,
    pub second: u16,
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.second)
    }
}

/// One alternative from a `Transport` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportDescriptor {
    pub transport: String,
    pub profile: String,
    pub protocol: Protocol,
    pub delivery: Delivery,
    pub client_port: Option<PortPair>,
    pub server_port: Option<PortPair>,
    pub interleaved: Option<PortPair>,
    pub ttl: Option<u8>,
    pub mode: Mode,
}

impl Default for TransportDescriptor {
    fn default() -> Self {
        Self {
            transport: "RTP".to_string(),
            profile: "AVP".to_string(),
            protocol: Protocol::Udp,
            delivery: Delivery::Multicast,
            client_port: None,
            server_port: None,
            interleaved: None,
            ttl: None,
            mode: Mode::Play,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TransportParseError {
    #[error("empty transport header value")]
    Empty,
    #[error("malformed transport specifier: {0}")]
    BadSpecifier(String),
    #[error("malformed port range: {0}")]
    BadPortRange(String),
}

/// Parse every alternative in a `Transport` header value.
///
/// # Examples
///
/// ```
/// use rtsp_proto::transport::{parse, Delivery, Mode, Protocol};
///
/// let descriptors = parse(
///     r#"RTP/AVP;unicast;client_port=3456-3457;server_port=6543-6544;mode="PLAY""#
/// ).unwrap();
/// let d = &descriptors[0];
/// assert_eq!(d.protocol, Protocol::Udp);
/// assert_eq!(d.delivery, Delivery::Unicast);
/// assert_eq!(d.client_port.unwrap().first, 3456);
/// assert_eq!(d.mode, Mode::Play);
/// ```
pub fn parse(value: &str) -> Result<Vec<TransportDescriptor>, TransportParseError> {
    if value.trim().is_empty() {
        return Err(TransportParseError::Empty);
    }

    value.split(',').map(parse_one).collect()
}

fn parse_one(alt: &str) -> Result<TransportDescriptor, TransportParseError> {
    let mut descriptor = TransportDescriptor::default();
    let mut tokens = alt.split(';').map(str::trim);

    let specifier = tokens
        .next()
        .ok_or_else(|| TransportParseError::BadSpecifier(alt.to_string()))?;
    let mut specifier_parts = specifier.split('/');
    descriptor.transport = specifier_parts
        .next()
        .ok_or_else(|| TransportParseError::BadSpecifier(alt.to_string()))?
        .to_string();
    descriptor.profile = specifier_parts.next().unwrap_or("AVP").to_string();
    descriptor.protocol = match specifier_parts.next() {
        Some(p) if p.eq_ignore_ascii_case("TCP") => Protocol::Tcp,
        _ => Protocol::Udp,
    };

    for token in tokens {
        if token.is_empty() {
            continue;
        }

        let unquoted = token.trim_matches('"');

        if unquoted.eq_ignore_ascii_case("unicast") {
            descriptor.delivery = Delivery::Unicast;
            continue;
        }
        if unquoted.eq_ignore_ascii_case("multicast") {
            descriptor.delivery = Delivery::Multicast;
            continue;
        }
        if unquoted.eq_ignore_ascii_case("append") {
            continue;
        }

        let Some(eq) = token.find('=') else {
            continue;
        };
        let key = token[..eq].trim();
        let raw_value = token[eq + 1..].trim().trim_matches('"');

        match key.to_ascii_lowercase().as_str() {
            "client_port" => descriptor.client_port = Some(parse_port_pair(raw_value)?),
            "server_port" => descriptor.server_port = Some(parse_port_pair(raw_value)?),
            "interleaved" => descriptor.interleaved = Some(parse_port_pair(raw_value)?),
            "ttl" => {
                descriptor.ttl = Some(
                    raw_value
                        .parse()
                        .map_err(|_| TransportParseError::BadPortRange(raw_value.to_string()))?,
                )
            }
            "mode" => {
                descriptor.mode = if raw_value.eq_ignore_ascii_case("RECORD") {
                    Mode::Record
                } else {
                    Mode::Play
                };
            }
            _ => {}
        }
    }

    Ok(descriptor)
}

fn parse_port_pair(raw: &str) -> Result<PortPair, TransportParseError> {
    let mut parts = raw.splitn(2, '-');
    let first: u16 = parts
        .next()
        .ok_or_else(|| TransportParseError::BadPortRange(raw.to_string()))?
        .parse()
        .map_err(|_| TransportParseError::BadPortRange(raw.to_string()))?;

    let second = match parts.next() {
        Some(s) => s
            .parse()
            .map_err(|_| TransportParseError::BadPortRange(raw.to_string()))?,
        None => first + 1,
    };

    Ok(PortPair { first, second })
}

/// Serialize a descriptor back into a `Transport` header value.
///
/// # Examples
///
/// ```
/// use rtsp_proto::transport::{build, Delivery, PortPair, Protocol, TransportDescriptor};
///
/// let descriptor = TransportDescriptor {
///     protocol: Protocol::Tcp,
///     delivery: Delivery::Unicast,
///     interleaved: Some(PortPair { first: 0, second: 1 }),
///     ..Default::default()
/// };
/// assert_eq!(build(&descriptor), "RTP/AVP/TCP;unicast;interleaved=0-1");
/// ```
pub fn build(descriptor: &TransportDescriptor) -> String {
    let mut parts = vec![format!(
        "{}/{}{}",
        descriptor.transport,
        descriptor.profile,
        match descriptor.protocol {
            Protocol::Tcp => "/TCP",
            Protocol::Udp => "",
        }
    )];

    parts.push(
        match descriptor.delivery {
            Delivery::Unicast => "unicast",
            Delivery::Multicast => "multicast",
        }
        .to_string(),
    );

    if let Some(pair) = descriptor.client_port {
        parts.push(format!("client_port={pair}"));
    }
    if let Some(pair) = descriptor.server_port {
        parts.push(format!("server_port={pair}"));
    }
    if let Some(pair) = descriptor.interleaved {
        parts.push(format!("interleaved={pair}"));
    }
    if let Some(ttl) = descriptor.ttl {
        parts.push(format!("ttl={ttl}"));
    }
    if descriptor.mode == Mode::Record {
        parts.push("mode=RECORD".to_string());
    }

    parts.join(";")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_the_spec_example() {
        let descriptors =
            parse(r#"RTP/AVP;unicast;client_port=3456-3457;server_port=6543-6544;mode="PLAY""#)
                .unwrap();
        assert_eq!(descriptors.len(), 1);
        let d = &descriptors[0];
        assert_eq!(d.protocol, Protocol::Udp);
        assert_eq!(d.delivery, Delivery::Unicast);
        assert_eq!(d.client_port, Some(PortPair { first: 3456, second: 3457 }));
        assert_eq!(d.server_port, Some(PortPair { first: 6543, second: 6544 }));
        assert_eq!(d.mode, Mode::Play);
    }

    #[test]
    fn tcp_interleaved_round_trips() {
        let descriptor = TransportDescriptor {
            protocol: Protocol::Tcp,
            delivery: Delivery::Unicast,
            interleaved: Some(PortPair { first: 0, second: 1 }),
            ..Default::default()
        };

        let built = build(&descriptor);
        let parsed = parse(&built).unwrap();
        assert_eq!(parsed[0], descriptor);
    }

    #[test]
    fn unspecified_protocol_defaults_to_udp_and_multicast() {
        let descriptors = parse("RTP/AVP").unwrap();
        assert_eq!(descriptors[0].protocol, Protocol::Udp);
        assert_eq!(descriptors[0].delivery, Delivery::Multicast);
    }

    #[test]
    fn port_pair_without_explicit_second_defaults_to_first_plus_one() {
        let descriptors = parse("RTP/AVP;unicast;client_port=5000").unwrap();
        assert_eq!(
            descriptors[0].client_port,
            Some(PortPair { first: 5000, second: 5001 })
        );
    }

    #[test]
    fn multiple_alternatives_are_all_parsed_in_order() {
        let descriptors = parse("RTP/AVP/TCP;unicast;interleaved=0-1,RTP/AVP;unicast;client_port=3456-3457").unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].protocol, Protocol::Tcp);
        assert_eq!(descriptors[1].protocol, Protocol::Udp);
    }

    #[test]
    fn empty_value_is_rejected() {
        assert!(parse("").is_err());
    }
}
