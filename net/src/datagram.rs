//! Datagram (UDP) sessions.
//!
//! The chip delivers each received datagram with an 8-byte pseudo-header
//! carrying the sender's address and port plus the payload length. A
//! [`UdpSocket`] tracks one received datagram at a time: `parse_packet`
//! consumes the header and arms the read cursor, and any remainder of that
//! datagram is discarded when the next `parse_packet` runs.

use log::debug;
use tether_hal::{ChipBus, Clock, Ipv4Addr, Port, SlotId, SocketChip, SocketMode};

use crate::dns::{self, DnsResolver};
use crate::iface::Netif;
use crate::types::NetError;

/// The chip's receive framing for one datagram.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DatagramHeader {
    pub remote_addr: Ipv4Addr,
    pub remote_port: Port,
    pub len: u16,
}

impl DatagramHeader {
    pub const LEN: usize = 8;

    /// Decode the raw header: 4 address bytes, then port and payload
    /// length, both big-endian.
    pub fn decode(raw: [u8; Self::LEN]) -> Self {
        Self {
            remote_addr: Ipv4Addr::from_bytes([raw[0], raw[1], raw[2], raw[3]]),
            remote_port: Port::from_network_bytes([raw[4], raw[5]]),
            len: u16::from_be_bytes([raw[6], raw[7]]),
        }
    }
}

/// One UDP endpoint on one hardware slot.
pub struct UdpSocket<'n, C: SocketChip, K: Clock> {
    netif: &'n Netif<C, K>,
    slot: Option<SlotId>,
    local_port: Port,
    /// Bytes staged into the outgoing datagram so far.
    offset: u16,
    /// Unread bytes of the datagram armed by `parse_packet`.
    remaining: u16,
    remote: (Ipv4Addr, Port),
}

impl<'n, C: SocketChip, K: Clock> UdpSocket<'n, C, K> {
    /// A new, unbound socket on `netif`.
    pub fn new(netif: &'n Netif<C, K>) -> Self {
        Self {
            netif,
            slot: None,
            local_port: Port(0),
            offset: 0,
            remaining: 0,
            remote: (Ipv4Addr::UNSPECIFIED, Port(0)),
        }
    }

    /// Bind to `port`. Rebinding an already-bound socket closes the old
    /// slot first.
    pub fn begin(&mut self, port: Port) -> Result<(), NetError> {
        self.release();
        let slot = {
            let mut bus = self.netif.chip().bus();
            bus.acquire_slot(SocketMode::UDP, port)
        };
        let Some(slot) = slot else {
            debug!("udp: no free slot for port {}", port.as_u16());
            return Err(NetError::NoFreeSlots);
        };
        self.slot = Some(slot);
        self.local_port = port;
        Ok(())
    }

    /// Bind to `port` and join the multicast group `group`. The address
    /// must be in 224.0.0.0/4.
    pub fn begin_multicast(&mut self, group: Ipv4Addr, port: Port) -> Result<(), NetError> {
        if !group.is_multicast() {
            return Err(NetError::InvalidAddress);
        }
        self.release();
        let slot = {
            let mut bus = self.netif.chip().bus();
            bus.acquire_multicast_slot(group, port)
        };
        let Some(slot) = slot else {
            debug!("udp: no free slot for multicast group {}", group);
            return Err(NetError::NoFreeSlots);
        };
        self.slot = Some(slot);
        self.local_port = port;
        Ok(())
    }

    /// Start staging an outgoing datagram to `addr:port`. Discards any
    /// previously staged, unsent data.
    pub fn begin_packet(&mut self, addr: Ipv4Addr, port: Port) -> Result<(), NetError> {
        let Some(slot) = self.slot else {
            return Err(NetError::NotBound);
        };
        self.offset = 0;
        let ok = self.netif.chip().bus().start_datagram(slot, addr, port);
        if ok { Ok(()) } else { Err(NetError::InvalidAddress) }
    }

    /// Resolve `host` against the interface's DNS server, then start an
    /// outgoing datagram. No staging state changes when resolution fails.
    pub fn begin_packet_host(&mut self, host: &str, port: Port) -> Result<(), NetError> {
        if self.slot.is_none() {
            return Err(NetError::NotBound);
        }
        let mut resolver = DnsResolver::new(self.netif);
        resolver.begin(self.netif.dns_server());
        let addr = resolver.get_host_by_name(host, dns::RESOLVE_TIMEOUT_MS)?;
        self.begin_packet(addr, port)
    }

    /// Append `buf` to the staged datagram. Returns the count accepted,
    /// which is short when the chip's transmit buffer fills.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let Some(slot) = self.slot else {
            return 0;
        };
        let accepted = self
            .netif
            .chip()
            .bus()
            .buffer_datagram(slot, self.offset, buf);
        self.offset += accepted as u16;
        accepted
    }

    /// Transmit the staged datagram.
    pub fn end_packet(&mut self) -> Result<(), NetError> {
        let Some(slot) = self.slot else {
            return Err(NetError::NotBound);
        };
        if self.netif.chip().bus().send_datagram(slot) {
            Ok(())
        } else {
            debug!("udp: chip rejected datagram send");
            Err(NetError::SendRejected)
        }
    }

    /// Arm the next received datagram for reading.
    ///
    /// Any unread remainder of the previous datagram is discarded first,
    /// so one slow consumer cannot smear two senders' payloads together.
    /// Returns the armed payload length, or 0 when nothing is pending.
    pub fn parse_packet(&mut self) -> usize {
        let Some(slot) = self.slot else {
            return 0;
        };

        while self.remaining > 0 {
            let drained = {
                let mut bus = self.netif.chip().bus();
                bus.discard(slot, self.remaining as usize)
            };
            if drained == 0 {
                break;
            }
            self.remaining -= drained as u16;
        }
        self.remaining = 0;

        let mut bus = self.netif.chip().bus();
        if bus.recv_available(slot) == 0 {
            return 0;
        }
        let mut raw = [0u8; DatagramHeader::LEN];
        if bus.recv(slot, &mut raw) != DatagramHeader::LEN {
            return 0;
        }
        let header = DatagramHeader::decode(raw);
        self.remote = (header.remote_addr, header.remote_port);
        self.remaining = header.len;
        self.remaining as usize
    }

    /// Read from the armed datagram into `buf`, never crossing into the
    /// next datagram. `None` once the armed payload is exhausted.
    pub fn read(&mut self, buf: &mut [u8]) -> Option<usize> {
        let slot = self.slot?;
        if self.remaining == 0 {
            return None;
        }
        let want = buf.len().min(self.remaining as usize);
        let got = self.netif.chip().bus().recv(slot, &mut buf[..want]);
        if got == 0 {
            return None;
        }
        self.remaining -= got as u16;
        Some(got)
    }

    /// Read one byte of the armed datagram.
    pub fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        match self.read(&mut byte) {
            Some(1) => Some(byte[0]),
            _ => None,
        }
    }

    /// Next byte of the armed datagram without consuming it.
    pub fn peek(&self) -> Option<u8> {
        let slot = self.slot?;
        if self.remaining == 0 {
            return None;
        }
        self.netif.chip().bus().peek(slot)
    }

    /// Unread bytes of the armed datagram. 0 until `parse_packet` arms one.
    pub fn available(&self) -> usize {
        self.remaining as usize
    }

    /// Sender address of the armed datagram.
    pub fn remote_ip(&self) -> Ipv4Addr {
        self.remote.0
    }

    /// Sender port of the armed datagram.
    pub fn remote_port(&self) -> Port {
        self.remote.1
    }

    /// The bound local port; 0 when unbound.
    pub fn local_port(&self) -> Port {
        self.local_port
    }

    /// Release the slot and reset all session state. Idempotent.
    pub fn stop(&mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(slot) = self.slot.take() {
            self.netif.chip().bus().close(slot);
        }
        self.local_port = Port(0);
        self.offset = 0;
        self.remaining = 0;
        self.remote = (Ipv4Addr::UNSPECIFIED, Port(0));
    }
}
