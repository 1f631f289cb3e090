//! Building and validating the `Transport` header offer/echo for the two
//! concrete transport kinds this crate supports.

use rtsp_proto::transport::{Delivery, Mode, PortPair, Protocol, TransportDescriptor};

/// The client's offer for a UDP unicast pair: even RTP port, odd RTCP
/// port, matching the allocation convention in [`crate::udp::UdpTransport`].
pub fn udp_offer(client_rtp_port: u16, client_rtcp_port: u16) -> TransportDescriptor {
    TransportDescriptor {
        protocol: Protocol::Udp,
        delivery: Delivery::Unicast,
        client_port: Some(PortPair {
            first: client_rtp_port,
            second: client_rtcp_port,
        }),
        mode: Mode::Play,
        ..Default::default()
    }
}

/// The client's offer for a TCP-interleaved pair: channel `rtp_channel`
/// carries RTP, `rtp_channel + 1` carries RTCP.
pub fn tcp_offer(rtp_channel: u8, rtcp_channel: u8) -> TransportDescriptor {
    TransportDescriptor {
        protocol: Protocol::Tcp,
        delivery: Delivery::Unicast,
        interleaved: Some(PortPair {
            first: rtp_channel as u16,
            second: rtcp_channel as u16,
        }),
        mode: Mode::Play,
        ..Default::default()
    }
}

/// Confirm a server's echoed `Transport` header matches a UDP offer,
/// returning the server's advertised port pair for send-back.
pub fn confirm_udp(offer: &TransportDescriptor, echoed: &TransportDescriptor) -> Option<PortPair> {
    if echoed.protocol != Protocol::Udp || offer.client_port != echoed.client_port {
        return None;
    }
    echoed.server_port
}

/// Confirm a server's echoed `Transport` header matches a TCP-interleaved
/// offer: the interleaved channel pair must be echoed back unchanged.
pub fn confirm_tcp(offer: &TransportDescriptor, echoed: &TransportDescriptor) -> bool {
    echoed.protocol == Protocol::Tcp && offer.interleaved == echoed.interleaved
}
