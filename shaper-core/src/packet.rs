use std::{fmt, net::IpAddr};

use bytes::Bytes;
use pnet::packet::{
    ip::{IpNextHeaderProtocol, IpNextHeaderProtocols},
    ipv4::Ipv4Packet,
    ipv6::Ipv6Packet,
    tcp::TcpPacket,
    udp::UdpPacket,
};

use crate::{Direction, Protocol};

/// A captured network frame, transiently owned by whichever pipeline stage
/// currently holds it. Every [`Packet`] handed to the pipeline must end up
/// either reinjected or deliberately dropped.
#[derive(Debug, Clone)]
pub struct Packet {
    raw: Bytes,
    src_addr: IpAddr,
    src_port: u16,
    dst_addr: IpAddr,
    dst_port: u16,
    protocol: Protocol,
    direction: Direction,
    /// Backend-specific reinjection context (e.g. the capture address the
    /// interception driver needs to put the frame back on the wire).
    /// Carried opaquely through the pipeline.
    context: Bytes,
}

impl Packet {
    /// Parses the IP and transport headers of a raw captured frame.
    /// Returns `None` if the frame is not a parseable IPv4/IPv6 packet.
    pub fn parse(raw: Bytes, direction: Direction) -> Option<Self> {
        let version = raw.first()? >> 4;

        let (src_addr, dst_addr, next, transport) = match version {
            4 => {
                let ip = Ipv4Packet::new(&raw)?;
                let header_len = ip.get_header_length() as usize * 4;
                (
                    IpAddr::V4(ip.get_source()),
                    IpAddr::V4(ip.get_destination()),
                    ip.get_next_level_protocol(),
                    header_len,
                )
            }
            6 => {
                let ip = Ipv6Packet::new(&raw)?;
                (
                    IpAddr::V6(ip.get_source()),
                    IpAddr::V6(ip.get_destination()),
                    ip.get_next_header(),
                    40,
                )
            }
            _ => return None,
        };

        let payload = raw.get(transport..)?;
        let (protocol, src_port, dst_port) = match next {
            IpNextHeaderProtocols::Tcp => {
                let tcp = TcpPacket::new(payload)?;
                (Protocol::Tcp, tcp.get_source(), tcp.get_destination())
            }
            IpNextHeaderProtocols::Udp => {
                let udp = UdpPacket::new(payload)?;
                (Protocol::Udp, udp.get_source(), udp.get_destination())
            }
            IpNextHeaderProtocol(_) => (Protocol::Any, 0, 0),
        };

        Some(Self {
            raw,
            src_addr,
            src_port,
            dst_addr,
            dst_port,
            protocol,
            direction,
            context: Bytes::new(),
        })
    }

    /// Wraps a frame whose headers could not (or need not) be parsed. The
    /// 5-tuple is zeroed; the payload is still carried and reinjectable.
    pub fn opaque(raw: Bytes, direction: Direction) -> Self {
        Self {
            raw,
            src_addr: IpAddr::from([0, 0, 0, 0]),
            src_port: 0,
            dst_addr: IpAddr::from([0, 0, 0, 0]),
            dst_port: 0,
            protocol: Protocol::Any,
            direction,
            context: Bytes::new(),
        }
    }

    /// Attaches a backend-specific reinjection context.
    pub fn with_context(mut self, context: Bytes) -> Self {
        self.context = context;
        self
    }

    /// The backend-specific reinjection context, empty if none was attached.
    pub fn context(&self) -> &Bytes {
        &self.context
    }

    /// The raw frame bytes, as captured.
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// The on-wire length of the frame in bytes.
    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn src_addr(&self) -> IpAddr {
        self.src_addr
    }

    pub fn src_port(&self) -> u16 {
        self.src_port
    }

    pub fn dst_addr(&self) -> IpAddr {
        self.dst_addr
    }

    pub fn dst_port(&self) -> u16 {
        self.dst_port
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} {} {}B",
            self.src_addr,
            self.src_port,
            self.dst_addr,
            self.dst_port,
            self.protocol,
            self.raw.len()
        )
    }
}
