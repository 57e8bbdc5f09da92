//! Zebra API (ZAPI v6) message encoding and stream framing
//!
//! Only the subset the route core exchanges with the RIB manager is modelled:
//! route add/delete, redistributed route notifications, the hello and the
//! redistribution registration sent at session start.
//!
//! All multi-byte fields are network byte order. Every length and tag read
//! from the wire is validated; anything malformed becomes
//! [`NhrpRouteError::Decode`] instead of a short read or a panic.

use crate::error::{NhrpRouteError, Result};
use crate::types::IfIndex;
use byteorder::{BigEndian, ReadBytesExt};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use nhrp_types::{AddressFamily, IpAddress, IpPrefix};
use std::fmt;
use std::io::{Cursor, Read};
use tokio_util::codec::{Decoder, Encoder};

/// Frame header marker byte
pub const ZSERV_MARKER: u8 = 0xFE;
/// Protocol version spoken on the session
pub const ZSERV_VERSION: u8 = 6;
/// length(2) + marker(1) + version(1) + vrf(4) + command(2)
pub const ZAPI_HEADER_SIZE: usize = 10;
/// Largest frame the codec accepts
pub const ZAPI_MAX_PACKET_SIZE: usize = 16384;

/// Default VRF id
pub const VRF_DEFAULT: u32 = 0;
/// Unicast SAFI
pub const SAFI_UNICAST: u8 = 1;

/// Route owner protocol ids
pub mod route_type {
    pub const KERNEL: u8 = 1;
    pub const CONNECT: u8 = 2;
    pub const STATIC: u8 = 3;
    pub const BGP: u8 = 9;
    pub const NHRP: u8 = 12;
    pub const PBR: u8 = 24;
    /// Wildcard used for "redistribute everything"
    pub const ALL: u8 = 30;
}

/// Route flag bits
pub mod route_flag {
    pub const ALLOW_RECURSION: u32 = 0x01;
    pub const FIB_OVERRIDE: u32 = 0x10;
}

/// Route message bits: which optional sections follow the prefix
pub mod message {
    pub const NEXTHOP: u8 = 0x01;
    pub const DISTANCE: u8 = 0x02;
    pub const METRIC: u8 = 0x04;
    pub const TAG: u8 = 0x08;
    pub const MTU: u8 = 0x10;
    pub const SRCPFX: u8 = 0x20;
    pub const TABLEID: u8 = 0x80;
}

/// Nexthop type tags
pub mod nexthop_type {
    pub const IFINDEX: u8 = 1;
    pub const IPV4: u8 = 2;
    pub const IPV4_IFINDEX: u8 = 3;
    pub const IPV6: u8 = 4;
    pub const IPV6_IFINDEX: u8 = 5;
    pub const BLACKHOLE: u8 = 6;
}

/// Per-nexthop flag bits that add trailing fields
mod nexthop_flag {
    pub const LABEL: u8 = 0x02;
    pub const WEIGHT: u8 = 0x04;
}

/// ZAPI commands used by the route core
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    InterfaceAdd,
    RouteAdd,
    RouteDelete,
    RedistributeAdd,
    RouterIdAdd,
    Hello,
    RedistributeRouteAdd,
    RedistributeRouteDel,
    Unknown(u16),
}

impl Command {
    pub const fn to_u16(self) -> u16 {
        match self {
            Command::InterfaceAdd => 0,
            Command::RouteAdd => 8,
            Command::RouteDelete => 9,
            Command::RedistributeAdd => 11,
            Command::RouterIdAdd => 15,
            Command::Hello => 18,
            Command::RedistributeRouteAdd => 33,
            Command::RedistributeRouteDel => 34,
            Command::Unknown(value) => value,
        }
    }
}

impl From<u16> for Command {
    fn from(value: u16) -> Self {
        match value {
            0 => Command::InterfaceAdd,
            8 => Command::RouteAdd,
            9 => Command::RouteDelete,
            11 => Command::RedistributeAdd,
            15 => Command::RouterIdAdd,
            18 => Command::Hello,
            33 => Command::RedistributeRouteAdd,
            34 => Command::RedistributeRouteDel,
            other => Command::Unknown(other),
        }
    }
}

/// Blackhole flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlackholeType {
    Unspec,
    Null,
    Reject,
    AdminProhibited,
}

impl BlackholeType {
    fn to_u8(self) -> u8 {
        match self {
            BlackholeType::Unspec => 0,
            BlackholeType::Null => 1,
            BlackholeType::Reject => 2,
            BlackholeType::AdminProhibited => 3,
        }
    }

    fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(BlackholeType::Unspec),
            1 => Ok(BlackholeType::Null),
            2 => Ok(BlackholeType::Reject),
            3 => Ok(BlackholeType::AdminProhibited),
            other => Err(NhrpRouteError::decode(format!("unknown blackhole type {other}"))),
        }
    }
}

/// Where a nexthop points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NexthopGate {
    /// Interface only, no gateway address
    Ifindex(IfIndex),
    Address(IpAddress),
    AddressIfindex(IpAddress, IfIndex),
    Blackhole(BlackholeType),
}

impl NexthopGate {
    fn type_tag(&self) -> u8 {
        match self {
            NexthopGate::Ifindex(_) => nexthop_type::IFINDEX,
            NexthopGate::Address(IpAddress::V4(_)) => nexthop_type::IPV4,
            NexthopGate::Address(IpAddress::V6(_)) => nexthop_type::IPV6,
            NexthopGate::AddressIfindex(IpAddress::V4(_), _) => nexthop_type::IPV4_IFINDEX,
            NexthopGate::AddressIfindex(IpAddress::V6(_), _) => nexthop_type::IPV6_IFINDEX,
            NexthopGate::Blackhole(_) => nexthop_type::BLACKHOLE,
        }
    }

    /// Gateway address, if the nexthop carries one.
    pub fn address(&self) -> Option<IpAddress> {
        match self {
            NexthopGate::Address(addr) | NexthopGate::AddressIfindex(addr, _) => Some(*addr),
            _ => None,
        }
    }

    /// Outgoing interface, if the nexthop carries one.
    pub fn ifindex(&self) -> Option<IfIndex> {
        match self {
            NexthopGate::Ifindex(ifindex) | NexthopGate::AddressIfindex(_, ifindex) => {
                Some(*ifindex)
            }
            _ => None,
        }
    }
}

/// One nexthop of a route message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapiNexthop {
    pub vrf_id: u32,
    pub gate: NexthopGate,
    pub labels: Vec<u32>,
    pub weight: Option<u32>,
}

impl ZapiNexthop {
    pub fn new(gate: NexthopGate) -> Self {
        Self {
            vrf_id: VRF_DEFAULT,
            gate,
            labels: Vec::new(),
            weight: None,
        }
    }
}

/// A route add/delete or redistribution message body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapiRoute {
    /// Owning protocol (see [`route_type`])
    pub route_type: u8,
    pub instance: u16,
    /// See [`route_flag`]
    pub flags: u32,
    pub safi: u8,
    pub prefix: IpPrefix,
    /// Source prefix of a source-destination route
    pub src_prefix: Option<IpPrefix>,
    pub nexthops: Vec<ZapiNexthop>,
    pub distance: Option<u8>,
    pub metric: Option<u32>,
    pub tag: Option<u32>,
    pub mtu: Option<u32>,
    pub table_id: Option<u32>,
}

impl ZapiRoute {
    /// Unicast route owned by `route_type` with no optional sections.
    pub fn new(route_type: u8, prefix: IpPrefix) -> Self {
        Self {
            route_type,
            instance: 0,
            flags: 0,
            safi: SAFI_UNICAST,
            prefix,
            src_prefix: None,
            nexthops: Vec::new(),
            distance: None,
            metric: None,
            tag: None,
            mtu: None,
            table_id: None,
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// True for source-destination routes.
    pub fn is_srcdest(&self) -> bool {
        self.src_prefix.is_some()
    }

    fn message_bits(&self) -> u8 {
        let mut bits = 0;
        if !self.nexthops.is_empty() {
            bits |= message::NEXTHOP;
        }
        if self.distance.is_some() {
            bits |= message::DISTANCE;
        }
        if self.metric.is_some() {
            bits |= message::METRIC;
        }
        if self.tag.is_some() {
            bits |= message::TAG;
        }
        if self.mtu.is_some() {
            bits |= message::MTU;
        }
        if self.src_prefix.is_some() {
            bits |= message::SRCPFX;
        }
        if self.table_id.is_some() {
            bits |= message::TABLEID;
        }
        bits
    }

    /// Appends the wire form of this route to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.route_type);
        buf.put_u16(self.instance);
        buf.put_u32(self.flags);
        buf.put_u8(self.message_bits());
        buf.put_u8(self.safi);

        buf.put_u8(self.prefix.family().to_af());
        put_prefix_bits(buf, &self.prefix);

        if let Some(src) = &self.src_prefix {
            put_prefix_bits(buf, src);
        }

        if !self.nexthops.is_empty() {
            buf.put_u16(self.nexthops.len() as u16);
            for nh in &self.nexthops {
                let mut flags = 0;
                if !nh.labels.is_empty() {
                    flags |= nexthop_flag::LABEL;
                }
                if nh.weight.is_some() {
                    flags |= nexthop_flag::WEIGHT;
                }
                buf.put_u32(nh.vrf_id);
                buf.put_u8(nh.gate.type_tag());
                buf.put_u8(flags);
                match nh.gate {
                    NexthopGate::Ifindex(ifindex) => buf.put_u32(ifindex),
                    NexthopGate::Address(addr) => buf.put_slice(&addr.octets()),
                    NexthopGate::AddressIfindex(addr, ifindex) => {
                        buf.put_slice(&addr.octets());
                        buf.put_u32(ifindex);
                    }
                    NexthopGate::Blackhole(bh) => buf.put_u8(bh.to_u8()),
                }
                if !nh.labels.is_empty() {
                    buf.put_u8(nh.labels.len() as u8);
                    for label in &nh.labels {
                        buf.put_u32(*label);
                    }
                }
                if let Some(weight) = nh.weight {
                    buf.put_u32(weight);
                }
            }
        }

        if let Some(distance) = self.distance {
            buf.put_u8(distance);
        }
        if let Some(metric) = self.metric {
            buf.put_u32(metric);
        }
        if let Some(tag) = self.tag {
            buf.put_u32(tag);
        }
        if let Some(mtu) = self.mtu {
            buf.put_u32(mtu);
        }
        if let Some(table_id) = self.table_id {
            buf.put_u32(table_id);
        }
    }

    /// Parses a route message body.
    pub fn decode(body: &[u8]) -> Result<Self> {
        let mut rd = WireReader::new(body);

        let route_type = rd.u8("route type")?;
        let instance = rd.u16("instance")?;
        let flags = rd.u32("flags")?;
        let msg = rd.u8("message")?;
        let safi = rd.u8("safi")?;

        let af = rd.u8("prefix family")?;
        let family = AddressFamily::from_af(af)
            .ok_or_else(|| NhrpRouteError::decode(format!("unsupported prefix family {af}")))?;
        let prefix = rd.prefix(family)?;

        let src_prefix = if msg & message::SRCPFX != 0 {
            Some(rd.prefix(family)?)
        } else {
            None
        };

        let mut nexthops = Vec::new();
        if msg & message::NEXTHOP != 0 {
            let count = rd.u16("nexthop count")?;
            for _ in 0..count {
                nexthops.push(rd.nexthop()?);
            }
        }

        let distance = (msg & message::DISTANCE != 0)
            .then(|| rd.u8("distance"))
            .transpose()?;
        let metric = (msg & message::METRIC != 0)
            .then(|| rd.u32("metric"))
            .transpose()?;
        let tag = (msg & message::TAG != 0).then(|| rd.u32("tag")).transpose()?;
        let mtu = (msg & message::MTU != 0).then(|| rd.u32("mtu")).transpose()?;
        let table_id = (msg & message::TABLEID != 0)
            .then(|| rd.u32("table id"))
            .transpose()?;

        Ok(Self {
            route_type,
            instance,
            flags,
            safi,
            prefix,
            src_prefix,
            nexthops,
            distance,
            metric,
            tag,
            mtu,
            table_id,
        })
    }
}

/// Writes prefix length and the significant prefix bytes.
fn put_prefix_bits(buf: &mut BytesMut, prefix: &IpPrefix) {
    let len = prefix.prefix_len();
    buf.put_u8(len);
    let octets = prefix.address().octets();
    buf.put_slice(&octets[..prefix_bytes(len)]);
}

fn prefix_bytes(prefix_len: u8) -> usize {
    usize::from(prefix_len).div_ceil(8)
}

/// Bounds-checked cursor over a message body
struct WireReader<'a> {
    cur: Cursor<&'a [u8]>,
}

impl<'a> WireReader<'a> {
    fn new(body: &'a [u8]) -> Self {
        Self {
            cur: Cursor::new(body),
        }
    }

    fn truncated(what: &str) -> NhrpRouteError {
        NhrpRouteError::decode(format!("truncated {what}"))
    }

    fn u8(&mut self, what: &str) -> Result<u8> {
        self.cur.read_u8().map_err(|_| Self::truncated(what))
    }

    fn u16(&mut self, what: &str) -> Result<u16> {
        self.cur
            .read_u16::<BigEndian>()
            .map_err(|_| Self::truncated(what))
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        self.cur
            .read_u32::<BigEndian>()
            .map_err(|_| Self::truncated(what))
    }

    fn bytes(&mut self, out: &mut [u8], what: &str) -> Result<()> {
        self.cur.read_exact(out).map_err(|_| Self::truncated(what))
    }

    fn address(&mut self, family: AddressFamily) -> Result<IpAddress> {
        let mut raw = [0u8; 16];
        let raw = &mut raw[..family.addr_len()];
        self.bytes(raw, "nexthop address")?;
        IpAddress::from_bytes(family, raw)
            .ok_or_else(|| NhrpRouteError::decode("bad nexthop address length"))
    }

    fn prefix(&mut self, family: AddressFamily) -> Result<IpPrefix> {
        let len = self.u8("prefix length")?;
        if len > family.max_prefix_len() {
            return Err(NhrpRouteError::decode(format!(
                "prefix length {len} too long for {family}"
            )));
        }
        let mut raw = [0u8; 16];
        self.bytes(&mut raw[..prefix_bytes(len)], "prefix")?;
        let addr = IpAddress::from_bytes(family, &raw[..family.addr_len()])
            .ok_or_else(|| NhrpRouteError::decode("bad prefix address length"))?;
        IpPrefix::new(addr, len).map_err(|e| NhrpRouteError::decode(e.to_string()))
    }

    fn nexthop(&mut self) -> Result<ZapiNexthop> {
        let vrf_id = self.u32("nexthop vrf")?;
        let tag = self.u8("nexthop type")?;
        let flags = self.u8("nexthop flags")?;

        let gate = match tag {
            nexthop_type::IFINDEX => NexthopGate::Ifindex(self.u32("nexthop ifindex")?),
            nexthop_type::IPV4 => NexthopGate::Address(self.address(AddressFamily::Ipv4)?),
            nexthop_type::IPV4_IFINDEX => {
                let addr = self.address(AddressFamily::Ipv4)?;
                NexthopGate::AddressIfindex(addr, self.u32("nexthop ifindex")?)
            }
            nexthop_type::IPV6 => NexthopGate::Address(self.address(AddressFamily::Ipv6)?),
            nexthop_type::IPV6_IFINDEX => {
                let addr = self.address(AddressFamily::Ipv6)?;
                NexthopGate::AddressIfindex(addr, self.u32("nexthop ifindex")?)
            }
            nexthop_type::BLACKHOLE => {
                NexthopGate::Blackhole(BlackholeType::from_u8(self.u8("blackhole type")?)?)
            }
            other => {
                return Err(NhrpRouteError::decode(format!("unknown nexthop type {other}")));
            }
        };

        let mut labels = Vec::new();
        if flags & nexthop_flag::LABEL != 0 {
            let count = self.u8("label count")?;
            for _ in 0..count {
                labels.push(self.u32("label")?);
            }
        }
        let weight = if flags & nexthop_flag::WEIGHT != 0 {
            Some(self.u32("nexthop weight")?)
        } else {
            None
        };

        Ok(ZapiNexthop {
            vrf_id,
            gate,
            labels,
            weight,
        })
    }
}

/// Frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZapiHeader {
    pub vrf_id: u32,
    pub command: Command,
}

/// One framed message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZapiFrame {
    pub header: ZapiHeader,
    pub body: Bytes,
}

impl ZapiFrame {
    pub fn new(command: Command, vrf_id: u32, body: Bytes) -> Self {
        Self {
            header: ZapiHeader { vrf_id, command },
            body,
        }
    }

    pub fn command(&self) -> Command {
        self.header.command
    }

    /// Route add/delete or redistribution frame.
    pub fn route(command: Command, vrf_id: u32, route: &ZapiRoute) -> Self {
        let mut body = BytesMut::with_capacity(64);
        route.encode(&mut body);
        Self::new(command, vrf_id, body.freeze())
    }

    /// Client hello announcing the protocol this session speaks for.
    pub fn hello(route_type: u8, instance: u16) -> Self {
        let mut body = BytesMut::with_capacity(8);
        body.put_u8(route_type);
        body.put_u16(instance);
        // session id
        body.put_u32(0);
        // receive notify
        body.put_u8(0);
        Self::new(Command::Hello, VRF_DEFAULT, body.freeze())
    }

    /// Subscribes to interface and address notifications.
    pub fn interface_add() -> Self {
        Self::new(Command::InterfaceAdd, VRF_DEFAULT, Bytes::new())
    }

    /// Subscribes to router-id updates for `family`.
    pub fn router_id_add(family: AddressFamily) -> Self {
        let mut body = BytesMut::with_capacity(2);
        body.put_u16(u16::from(family.afi()));
        Self::new(Command::RouterIdAdd, VRF_DEFAULT, body.freeze())
    }

    /// Registers interest in routes of `route_type` for `family`.
    pub fn redistribute_add(family: AddressFamily, route_type: u8, instance: u16) -> Self {
        let mut body = BytesMut::with_capacity(4);
        body.put_u8(family.afi());
        body.put_u8(route_type);
        body.put_u16(instance);
        Self::new(Command::RedistributeAdd, VRF_DEFAULT, body.freeze())
    }

    /// Decodes the body as a route message.
    pub fn decode_route(&self) -> Result<ZapiRoute> {
        ZapiRoute::decode(&self.body)
    }
}

impl fmt::Display for ZapiFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} vrf {} ({} bytes)",
            self.header.command,
            self.header.vrf_id,
            self.body.len()
        )
    }
}

/// Length-prefixed framing of ZAPI messages on a byte stream
#[derive(Debug, Default)]
pub struct ZapiCodec;

impl Decoder for ZapiCodec {
    type Item = ZapiFrame;
    type Error = NhrpRouteError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        if src.len() < 2 {
            return Ok(None);
        }

        let length = usize::from(u16::from_be_bytes([src[0], src[1]]));
        if !(ZAPI_HEADER_SIZE..=ZAPI_MAX_PACKET_SIZE).contains(&length) {
            return Err(NhrpRouteError::decode(format!("bad frame length {length}")));
        }
        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(length);
        frame.advance(2);
        let marker = frame.get_u8();
        let version = frame.get_u8();
        if marker != ZSERV_MARKER || version != ZSERV_VERSION {
            return Err(NhrpRouteError::decode(format!(
                "bad frame marker {marker:#x} / version {version}"
            )));
        }
        let vrf_id = frame.get_u32();
        let command = Command::from(frame.get_u16());

        Ok(Some(ZapiFrame::new(command, vrf_id, frame.freeze())))
    }
}

impl Encoder<ZapiFrame> for ZapiCodec {
    type Error = NhrpRouteError;

    fn encode(&mut self, item: ZapiFrame, dst: &mut BytesMut) -> Result<()> {
        let length = ZAPI_HEADER_SIZE + item.body.len();
        if length > ZAPI_MAX_PACKET_SIZE {
            return Err(NhrpRouteError::decode(format!("frame too large ({length} bytes)")));
        }
        dst.reserve(length);
        dst.put_u16(length as u16);
        dst.put_u8(ZSERV_MARKER);
        dst.put_u8(ZSERV_VERSION);
        dst.put_u32(item.header.vrf_id);
        dst.put_u16(item.header.command.to_u16());
        dst.put_slice(&item.body);
        Ok(())
    }
}
