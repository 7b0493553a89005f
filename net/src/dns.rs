//! Minimal DNS: A-record queries over UDP.
//!
//! One query per lookup, no retry, no CNAME chasing: the resolver sends a
//! single recursive-desired question and accepts the first A record in a
//! matching response. Datagrams that do not match the outstanding query
//! (wrong source, id, or question name) are dropped and the wait continues
//! until the timeout expires.

use core::sync::atomic::{AtomicU16, Ordering};

use log::debug;
use tether_hal::{Clock, Ipv4Addr, Port, SocketChip};

use crate::datagram::UdpSocket;
use crate::iface::Netif;
use crate::types::NetError;

/// Well-known DNS server port.
pub const DNS_PORT: Port = Port(53);

/// Default bound on one lookup, in milliseconds.
pub const RESOLVE_TIMEOUT_MS: u32 = 5000;

const HEADER_LEN: usize = 12;
const NAME_MAX: usize = 253;
const LABEL_MAX: usize = 63;
const MAX_RESPONSE: usize = 512;
const POLL_INTERVAL_MS: u32 = 1;

const FLAG_QR: u16 = 0x8000;
const RCODE_MASK: u16 = 0x000f;
/// Recursion desired, everything else clear.
const QUERY_FLAGS: u16 = 0x0100;

const TYPE_A: u16 = 1;
const CLASS_IN: u16 = 1;

static QUERY_ID: AtomicU16 = AtomicU16::new(1);

// ============================================================================
// Wire codec
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct DnsHeader {
    id: u16,
    flags: u16,
    qdcount: u16,
    ancount: u16,
    nscount: u16,
    arcount: u16,
}

impl DnsHeader {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..2].copy_from_slice(&self.id.to_be_bytes());
        out[2..4].copy_from_slice(&self.flags.to_be_bytes());
        out[4..6].copy_from_slice(&self.qdcount.to_be_bytes());
        out[6..8].copy_from_slice(&self.ancount.to_be_bytes());
        out[8..10].copy_from_slice(&self.nscount.to_be_bytes());
        out[10..12].copy_from_slice(&self.arcount.to_be_bytes());
        out
    }

    fn from_bytes(raw: &[u8]) -> Option<Self> {
        if raw.len() < HEADER_LEN {
            return None;
        }
        Some(Self {
            id: u16::from_be_bytes([raw[0], raw[1]]),
            flags: u16::from_be_bytes([raw[2], raw[3]]),
            qdcount: u16::from_be_bytes([raw[4], raw[5]]),
            ancount: u16::from_be_bytes([raw[6], raw[7]]),
            nscount: u16::from_be_bytes([raw[8], raw[9]]),
            arcount: u16::from_be_bytes([raw[10], raw[11]]),
        })
    }

    fn is_response(&self) -> bool {
        self.flags & FLAG_QR != 0
    }

    fn rcode(&self) -> u16 {
        self.flags & RCODE_MASK
    }
}

/// Encode `name` as length-prefixed labels into `out`, returning the bytes
/// written (including the terminating zero). `None` when the name violates
/// the 63-byte label or 253-byte name limits, is empty, or has an empty
/// label.
fn encode_name(name: &str, out: &mut [u8]) -> Option<usize> {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > NAME_MAX {
        return None;
    }
    let mut written = 0;
    for label in name.split('.') {
        if label.is_empty() || label.len() > LABEL_MAX {
            return None;
        }
        if written + 1 + label.len() + 1 > out.len() {
            return None;
        }
        out[written] = label.len() as u8;
        written += 1;
        out[written..written + label.len()].copy_from_slice(label.as_bytes());
        written += label.len();
    }
    if written >= out.len() {
        return None;
    }
    out[written] = 0;
    Some(written + 1)
}

/// Build a single-question A/IN query into `out`, returning the total
/// length. `None` when the name does not encode.
fn build_query(id: u16, name: &str, out: &mut [u8]) -> Option<usize> {
    let header = DnsHeader {
        id,
        flags: QUERY_FLAGS,
        qdcount: 1,
        ancount: 0,
        nscount: 0,
        arcount: 0,
    };
    out[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    let name_len = encode_name(name, &mut out[HEADER_LEN..])?;
    let mut at = HEADER_LEN + name_len;
    if at + 4 > out.len() {
        return None;
    }
    out[at..at + 2].copy_from_slice(&TYPE_A.to_be_bytes());
    out[at + 2..at + 4].copy_from_slice(&CLASS_IN.to_be_bytes());
    at += 4;
    Some(at)
}

/// Advance past an encoded name starting at `at`, following the first
/// compression pointer if one appears. `None` on truncation.
fn skip_name(packet: &[u8], mut at: usize) -> Option<usize> {
    loop {
        let len = *packet.get(at)? as usize;
        if len == 0 {
            return Some(at + 1);
        }
        // Compression pointer: two bytes, terminates the name.
        if len & 0xc0 == 0xc0 {
            return if at + 1 < packet.len() {
                Some(at + 2)
            } else {
                None
            };
        }
        at += 1 + len;
        if at >= packet.len() {
            return None;
        }
    }
}

/// Validate `packet` against the outstanding query and extract the first
/// A-record address.
///
/// `question` is the encoded name plus qtype/qclass exactly as sent, used
/// to reject responses echoing a different question. Mismatches are the
/// transient [`NetError::QueryMismatch`]; a well-matched response with a
/// non-zero rcode or no usable answer is the terminal
/// [`NetError::BadResponse`].
fn parse_response(packet: &[u8], expected_id: u16, question: &[u8]) -> Result<Ipv4Addr, NetError> {
    let Some(header) = DnsHeader::from_bytes(packet) else {
        return Err(NetError::QueryMismatch);
    };
    if !header.is_response() || header.id != expected_id {
        return Err(NetError::QueryMismatch);
    }
    if header.qdcount != 1 || packet.len() < HEADER_LEN + question.len() {
        return Err(NetError::QueryMismatch);
    }
    if &packet[HEADER_LEN..HEADER_LEN + question.len()] != question {
        return Err(NetError::QueryMismatch);
    }
    if header.rcode() != 0 {
        debug!("dns: server rcode {}", header.rcode());
        return Err(NetError::BadResponse);
    }

    let mut at = HEADER_LEN + question.len();
    for _ in 0..header.ancount {
        at = skip_name(packet, at).ok_or(NetError::BadResponse)?;
        if at + 10 > packet.len() {
            return Err(NetError::BadResponse);
        }
        let rtype = u16::from_be_bytes([packet[at], packet[at + 1]]);
        let rclass = u16::from_be_bytes([packet[at + 2], packet[at + 3]]);
        let rdlength = u16::from_be_bytes([packet[at + 8], packet[at + 9]]) as usize;
        at += 10;
        if at + rdlength > packet.len() {
            return Err(NetError::BadResponse);
        }
        if rtype == TYPE_A && rclass == CLASS_IN && rdlength == 4 {
            return Ok(Ipv4Addr::from_bytes([
                packet[at],
                packet[at + 1],
                packet[at + 2],
                packet[at + 3],
            ]));
        }
        at += rdlength;
    }
    Err(NetError::BadResponse)
}

/// Parse a strict dotted-decimal IPv4 literal. Rejects empty octets,
/// values over 255, and anything but exactly four fields.
pub fn inet_aton(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut count = 0;
    for field in s.split('.') {
        if count == 4 || field.is_empty() || field.len() > 3 {
            return None;
        }
        let mut value: u16 = 0;
        for ch in field.bytes() {
            if !ch.is_ascii_digit() {
                return None;
            }
            value = value * 10 + (ch - b'0') as u16;
        }
        if value > 255 {
            return None;
        }
        octets[count] = value as u8;
        count += 1;
    }
    if count == 4 {
        Some(Ipv4Addr::from_bytes(octets))
    } else {
        None
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Blocking A-record resolver bound to one interface.
pub struct DnsResolver<'n, C: SocketChip, K: Clock> {
    netif: &'n Netif<C, K>,
    server: Ipv4Addr,
}

impl<'n, C: SocketChip, K: Clock> DnsResolver<'n, C, K> {
    pub fn new(netif: &'n Netif<C, K>) -> Self {
        Self {
            netif,
            server: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Set the server to query.
    pub fn begin(&mut self, server: Ipv4Addr) {
        self.server = server;
    }

    /// Resolve `name` to an IPv4 address, blocking up to `timeout_ms`.
    ///
    /// A dotted-decimal literal short-circuits without touching the
    /// network. Otherwise one query goes to the configured server over a
    /// transient UDP socket; the socket is always released before
    /// returning, on every path.
    pub fn get_host_by_name(&mut self, name: &str, timeout_ms: u32) -> Result<Ipv4Addr, NetError> {
        if let Some(addr) = inet_aton(name) {
            return Ok(addr);
        }
        if self.server.is_unspecified() || self.server.is_broadcast() {
            return Err(NetError::InvalidAddress);
        }

        let id = QUERY_ID.fetch_add(1, Ordering::Relaxed);
        let mut query = [0u8; HEADER_LEN + NAME_MAX + 2 + 4];
        let Some(query_len) = build_query(id, name, &mut query) else {
            debug!("dns: name {:?} does not encode", name);
            return Err(NetError::HostUnreachable);
        };
        let question = &query[HEADER_LEN..query_len];

        let mut udp = UdpSocket::new(self.netif);
        udp.begin(self.netif.ephemeral_port())?;

        let sent = udp
            .begin_packet(self.server, DNS_PORT)
            .and_then(|()| {
                if udp.write(&query[..query_len]) == query_len {
                    Ok(())
                } else {
                    Err(NetError::SendRejected)
                }
            })
            .and_then(|()| udp.end_packet());
        if let Err(err) = sent {
            udp.stop();
            return Err(err);
        }

        let start = self.netif.clock().uptime_ms();
        let result = loop {
            let len = udp.parse_packet();
            if len > 0 {
                // Only the queried server:53 may answer.
                if udp.remote_ip() != self.server || udp.remote_port() != DNS_PORT {
                    continue;
                }
                let mut response = [0u8; MAX_RESPONSE];
                let mut got = 0;
                while got < len.min(MAX_RESPONSE) {
                    match udp.read(&mut response[got..len.min(MAX_RESPONSE)]) {
                        Some(n) => got += n,
                        None => break,
                    }
                }
                match parse_response(&response[..got], id, question) {
                    Ok(addr) => break Ok(addr),
                    Err(NetError::QueryMismatch) => continue,
                    Err(err) => break Err(err),
                }
            }
            if self
                .netif
                .clock()
                .uptime_ms()
                .wrapping_sub(start)
                > timeout_ms as u64
            {
                debug!("dns: lookup of {:?} timed out", name);
                break Err(NetError::TimedOut);
            }
            self.netif.clock().sleep_ms(POLL_INTERVAL_MS);
        };

        udp.stop();
        result
    }
}
