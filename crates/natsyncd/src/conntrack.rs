//! Conntrack message model and NAT rule translation
//!
//! Messages arrive from the kernel conntrack feed with addresses and ports in
//! network byte order, exactly as the netlink attributes carry them. Missing
//! attributes read as zero. [`translate`] turns one message into a
//! host-order [`NatRule`].
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Connection tracking events
//! - SI-10: Information Input Validation - Zero fields tolerated and logged
//! - SC-7: Boundary Protection - Public/private endpoint derivation

use crate::types::NatRule;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, trace};

/// Conntrack attributes read by the translator (ATTR_* in libnetfilter_conntrack)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CtAttr {
    OrigIpv4Src,
    OrigIpv4Dst,
    OrigPortSrc,
    OrigPortDst,
    ReplIpv4Src,
    ReplIpv4Dst,
    ReplPortSrc,
    ReplPortDst,
    OrigL4Proto,
    ReplL4Proto,
    Status,
    TcpState,
}

impl CtAttr {
    const ALL: [CtAttr; 12] = [
        CtAttr::OrigIpv4Src,
        CtAttr::OrigIpv4Dst,
        CtAttr::OrigPortSrc,
        CtAttr::OrigPortDst,
        CtAttr::ReplIpv4Src,
        CtAttr::ReplIpv4Dst,
        CtAttr::ReplPortSrc,
        CtAttr::ReplPortDst,
        CtAttr::OrigL4Proto,
        CtAttr::ReplL4Proto,
        CtAttr::Status,
        CtAttr::TcpState,
    ];
}

/// Conntrack status bits (IPS_* from linux/netfilter/nf_conntrack_common.h)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NatStatus {
    /// IPS_SRC_NAT
    pub src_nat: bool,
    /// IPS_DST_NAT
    pub dst_nat: bool,
    /// IPS_SRC_NAT_DONE
    pub src_nat_done: bool,
    /// IPS_DST_NAT_DONE
    pub dst_nat_done: bool,
}

impl NatStatus {
    pub const IPS_SRC_NAT: u32 = 1 << 4;
    pub const IPS_DST_NAT: u32 = 1 << 5;
    pub const IPS_SRC_NAT_DONE: u32 = 1 << 7;
    pub const IPS_DST_NAT_DONE: u32 = 1 << 8;

    /// Parse from the kernel status word
    pub fn from_kernel(status: u32) -> Self {
        Self {
            src_nat: status & Self::IPS_SRC_NAT != 0,
            dst_nat: status & Self::IPS_DST_NAT != 0,
            src_nat_done: status & Self::IPS_SRC_NAT_DONE != 0,
            dst_nat_done: status & Self::IPS_DST_NAT_DONE != 0,
        }
    }
}

/// TCP conntrack state (TCP_CONNTRACK_* values)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TcpConntrackState {
    None = 0,
    SynSent = 1,
    SynRecv = 2,
    Established = 3,
    FinWait = 4,
    CloseWait = 5,
    LastAck = 6,
    TimeWait = 7,
    Close = 8,
    SynSent2 = 9,
    Unknown = 0xff,
}

impl TcpConntrackState {
    pub fn from_kernel(state: u8) -> Self {
        match state {
            0 => Self::None,
            1 => Self::SynSent,
            2 => Self::SynRecv,
            3 => Self::Established,
            4 => Self::FinWait,
            5 => Self::CloseWait,
            6 => Self::LastAck,
            7 => Self::TimeWait,
            8 => Self::Close,
            9 => Self::SynSent2,
            _ => Self::Unknown,
        }
    }
}

/// Conntrack message lifecycle type (NFCT_T_* values)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConntrackMsgType {
    New,
    Update,
    Destroy,
}

impl ConntrackMsgType {
    pub fn from_raw(msg_type: u32) -> Option<Self> {
        match msg_type {
            1 => Some(Self::New),
            2 => Some(Self::Update),
            4 => Some(Self::Destroy),
            _ => None,
        }
    }
}

/// One conntrack message as delivered by the feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConntrackMessage {
    attrs: HashMap<CtAttr, u32>,
}

impl ConntrackMessage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw 32-bit attribute, zero when absent
    pub fn get_u32(&self, attr: CtAttr) -> u32 {
        self.attrs.get(&attr).copied().unwrap_or(0)
    }

    /// Raw 16-bit attribute, zero when absent
    pub fn get_u16(&self, attr: CtAttr) -> u16 {
        self.get_u32(attr) as u16
    }

    /// Raw 8-bit attribute, zero when absent
    pub fn get_u8(&self, attr: CtAttr) -> u8 {
        self.get_u32(attr) as u8
    }

    pub fn set_u32(&mut self, attr: CtAttr, value: u32) {
        self.attrs.insert(attr, value);
    }

    pub fn set_u16(&mut self, attr: CtAttr, value: u16) {
        self.attrs.insert(attr, u32::from(value));
    }

    pub fn set_u8(&mut self, attr: CtAttr, value: u8) {
        self.attrs.insert(attr, u32::from(value));
    }

    /// Address attribute converted to host order
    pub fn ipv4(&self, attr: CtAttr) -> Ipv4Addr {
        Ipv4Addr::from(u32::from_be(self.get_u32(attr)))
    }

    /// Port attribute converted to host order
    pub fn port(&self, attr: CtAttr) -> u16 {
        u16::from_be(self.get_u16(attr))
    }

    pub fn status(&self) -> NatStatus {
        NatStatus::from_kernel(self.get_u32(CtAttr::Status))
    }

    pub fn tcp_state(&self) -> TcpConntrackState {
        TcpConntrackState::from_kernel(self.get_u8(CtAttr::TcpState))
    }

    /// Original-direction layer-4 protocol
    pub fn orig_l4_proto(&self) -> u8 {
        self.get_u8(CtAttr::OrigL4Proto)
    }

    /// Set the original tuple from host-order endpoints
    pub fn with_orig(mut self, src: SocketAddrV4, dst: SocketAddrV4) -> Self {
        self.set_endpoint(CtAttr::OrigIpv4Src, CtAttr::OrigPortSrc, src);
        self.set_endpoint(CtAttr::OrigIpv4Dst, CtAttr::OrigPortDst, dst);
        self
    }

    /// Set the reply tuple from host-order endpoints
    pub fn with_reply(mut self, src: SocketAddrV4, dst: SocketAddrV4) -> Self {
        self.set_endpoint(CtAttr::ReplIpv4Src, CtAttr::ReplPortSrc, src);
        self.set_endpoint(CtAttr::ReplIpv4Dst, CtAttr::ReplPortDst, dst);
        self
    }

    /// Set both original and reply layer-4 protocol
    pub fn with_protocol(mut self, proto: u8) -> Self {
        self.set_u8(CtAttr::OrigL4Proto, proto);
        self.set_u8(CtAttr::ReplL4Proto, proto);
        self
    }

    pub fn with_status(mut self, status: u32) -> Self {
        self.set_u32(CtAttr::Status, status);
        self
    }

    pub fn with_tcp_state(mut self, state: TcpConntrackState) -> Self {
        self.set_u8(CtAttr::TcpState, state as u8);
        self
    }

    fn set_endpoint(&mut self, ip_attr: CtAttr, port_attr: CtAttr, addr: SocketAddrV4) {
        self.set_u32(ip_attr, u32::from(*addr.ip()).to_be());
        self.set_u16(port_attr, addr.port().to_be());
    }

    /// Dump every attribute at trace level
    pub fn trace_dump(&self) {
        for attr in CtAttr::ALL {
            trace!(attr = ?attr, value = %format!("{:#x}", self.get_u32(attr)), "conntrack attribute");
        }
        let status = self.status();
        trace!(
            src_nat = status.src_nat,
            dst_nat = status.dst_nat,
            src_nat_done = status.src_nat_done,
            dst_nat_done = status.dst_nat_done,
            "conntrack status"
        );
    }
}

/// Conntrack message plus its lifecycle type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConntrackEvent {
    pub message: ConntrackMessage,
    pub msg_type: ConntrackMsgType,
}

impl ConntrackEvent {
    pub fn new(message: ConntrackMessage, msg_type: ConntrackMsgType) -> Self {
        Self { message, msg_type }
    }
}

/// Derive the NAT rule for a conntrack message
///
/// With destination NAT the client-visible target is the original source and
/// the private endpoint is the reply source; the public port is the original
/// destination port. Otherwise the target is the original destination, the
/// private endpoint the original source, and the public port the reply
/// destination port. Zero fields are logged and kept.
pub fn translate(msg: &ConntrackMessage) -> NatRule {
    let dst_nat = msg.status().dst_nat;

    let rule = if dst_nat {
        debug!("Destination nat flag set, parsing reply tuple");
        NatRule {
            target_ip: msg.ipv4(CtAttr::OrigIpv4Src),
            target_port: msg.port(CtAttr::OrigPortSrc),
            private_ip: msg.ipv4(CtAttr::ReplIpv4Src),
            private_port: msg.port(CtAttr::ReplPortSrc),
            public_port: msg.port(CtAttr::OrigPortDst),
            protocol: msg.get_u8(CtAttr::ReplL4Proto),
            dst_nat,
        }
    } else {
        debug!("Destination nat flag reset, parsing source tuple");
        NatRule {
            target_ip: msg.ipv4(CtAttr::OrigIpv4Dst),
            target_port: msg.port(CtAttr::OrigPortDst),
            private_ip: msg.ipv4(CtAttr::OrigIpv4Src),
            private_port: msg.port(CtAttr::OrigPortSrc),
            public_port: msg.port(CtAttr::ReplPortDst),
            protocol: msg.get_u8(CtAttr::ReplL4Proto),
            dst_nat,
        }
    };

    if rule.target_ip.is_unspecified() {
        debug!("unable to retrieve target ip address");
    }
    if rule.target_port == 0 {
        debug!("unable to retrieve target port");
    }
    if rule.private_ip.is_unspecified() {
        debug!("unable to retrieve private ip address");
    }
    if rule.private_port == 0 {
        debug!("unable to retrieve private port");
    }
    if rule.public_port == 0 {
        debug!("unable to retrieve public port");
    }

    rule
}
