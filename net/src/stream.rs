//! Byte-stream (TCP) sessions.
//!
//! A [`TcpStream`] owns at most one hardware slot. It is unbound at
//! construction, binds on a successful connect, and returns to unbound on
//! `stop` or a failed connect; no call ever leaves the session
//! half-initialized.

use log::debug;
use tether_hal::{ChipBus, Clock, Ipv4Addr, Port, SlotId, SocketChip, SocketMode, SocketStatus};

use crate::dns::{self, DnsResolver};
use crate::iface::Netif;
use crate::types::NetError;

/// Default bound on connect and stop waits, in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u32 = 1000;

/// Interval between status polls while waiting on the chip.
const POLL_INTERVAL_MS: u32 = 1;

/// One TCP connection on one hardware slot.
pub struct TcpStream<'n, C: SocketChip, K: Clock> {
    netif: &'n Netif<C, K>,
    slot: Option<SlotId>,
    timeout_ms: u32,
    write_error: bool,
}

impl<'n, C: SocketChip, K: Clock> TcpStream<'n, C, K> {
    /// A new, unbound session on `netif`.
    pub fn new(netif: &'n Netif<C, K>) -> Self {
        Self {
            netif,
            slot: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            write_error: false,
        }
    }

    /// Bound on connect and stop waits. Applies to calls made after it is
    /// set; an in-flight wait keeps the value it started with.
    pub fn set_timeout(&mut self, timeout_ms: u32) {
        self.timeout_ms = timeout_ms;
    }

    /// Establish a connection to `addr:port`, blocking until the chip
    /// reports a terminal state or the timeout expires.
    ///
    /// The unspecified and broadcast addresses are rejected before any
    /// hardware access. On return the session is either fully connected or
    /// fully unbound; a slot left half-open by a timeout is force-closed
    /// first.
    pub fn connect(&mut self, addr: Ipv4Addr, port: Port) -> Result<(), NetError> {
        self.abandon_previous();

        if addr.is_unspecified() || addr.is_broadcast() {
            return Err(NetError::InvalidAddress);
        }

        let local_port = self.netif.ephemeral_port();
        let slot = {
            let mut bus = self.netif.chip().bus();
            bus.acquire_slot(SocketMode::TCP, local_port)
        };
        let Some(slot) = slot else {
            debug!("tcp: no free slot for connect to {}:{}", addr, port);
            return Err(NetError::NoFreeSlots);
        };

        self.netif.chip().bus().connect(slot, addr, port);

        let start = self.netif.clock().uptime_ms();
        loop {
            let status = self.netif.chip().bus().slot_status(slot);
            match status {
                SocketStatus::Established | SocketStatus::CloseWait => {
                    self.slot = Some(slot);
                    return Ok(());
                }
                SocketStatus::Closed => {
                    debug!("tcp: connect to {}:{} refused", addr, port);
                    return Err(NetError::ConnectionRefused);
                }
                _ => {}
            }
            if self.elapsed_since(start) > self.timeout_ms as u64 {
                break;
            }
            self.netif.clock().sleep_ms(POLL_INTERVAL_MS);
        }

        // Timed out mid-handshake: the slot is half-open and must not leak.
        self.netif.chip().bus().close(slot);
        debug!("tcp: connect to {}:{} timed out", addr, port);
        Err(NetError::TimedOut)
    }

    /// Resolve `host` against the interface's DNS server, then connect.
    /// Fails without consuming a slot when resolution fails.
    pub fn connect_host(&mut self, host: &str, port: Port) -> Result<(), NetError> {
        self.abandon_previous();

        let mut resolver = DnsResolver::new(self.netif);
        resolver.begin(self.netif.dns_server());
        let addr = resolver.get_host_by_name(host, dns::RESOLVE_TIMEOUT_MS)?;
        self.connect(addr, port)
    }

    /// Queue `buf` for transmission. All-or-nothing: returns `buf.len()`
    /// when the chip accepted the data, else 0. A rejection also latches
    /// the sticky [`Self::write_error`] flag; the connection stays
    /// nominally open, so callers that care must check the flag.
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let Some(slot) = self.slot else {
            return 0;
        };
        if self.netif.chip().bus().send(slot, buf) {
            buf.len()
        } else {
            self.write_error = true;
            0
        }
    }

    /// `true` once a write has been rejected by the chip. Sticky until
    /// [`Self::clear_write_error`].
    pub fn write_error(&self) -> bool {
        self.write_error
    }

    pub fn clear_write_error(&mut self) {
        self.write_error = false;
    }

    /// Move received bytes into `buf`. Returns the count moved, 0 when
    /// unbound or nothing is pending.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let Some(slot) = self.slot else {
            return 0;
        };
        self.netif.chip().bus().recv(slot, buf)
    }

    /// Read a single byte, `None` when unbound or nothing is pending.
    pub fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8; 1];
        if self.read(&mut byte) == 1 {
            Some(byte[0])
        } else {
            None
        }
    }

    /// Bytes receivable without blocking; 0 when unbound.
    pub fn available(&self) -> usize {
        let Some(slot) = self.slot else {
            return 0;
        };
        self.netif.chip().bus().recv_available(slot)
    }

    /// Free space in the chip's send buffer; 0 when unbound.
    pub fn available_for_write(&self) -> usize {
        let Some(slot) = self.slot else {
            return 0;
        };
        self.netif.chip().bus().send_available(slot)
    }

    /// Next received byte without consuming it; `None` when unbound or
    /// nothing is pending.
    pub fn peek(&self) -> Option<u8> {
        let slot = self.slot?;
        self.netif.chip().bus().peek(slot)
    }

    /// Wait until the chip's send buffer drains back to full capacity or
    /// the connection leaves the established/half-closed states.
    ///
    /// This approximates "delivered to the peer": a full send buffer only
    /// proves the chip has taken the data onto the wire and seen it
    /// acknowledged up to its own window logic, not that the peer
    /// application consumed it. The weaker contract is deliberate.
    pub fn flush(&self) {
        while let Some(slot) = self.slot {
            {
                let mut bus = self.netif.chip().bus();
                let status = bus.slot_status(slot);
                if status != SocketStatus::Established && status != SocketStatus::CloseWait {
                    return;
                }
                if bus.send_available(slot) >= bus.send_buffer_size() {
                    return;
                }
            }
            self.netif.clock().sleep_ms(POLL_INTERVAL_MS);
        }
    }

    /// Close the connection: request a graceful close, wait up to the
    /// timeout for the chip to report CLOSED, then force-close. The
    /// session is always unbound afterwards; calling `stop` on an unbound
    /// session is a no-op.
    pub fn stop(&mut self) {
        let Some(slot) = self.slot.take() else {
            return;
        };

        self.netif.chip().bus().disconnect(slot);

        let start = self.netif.clock().uptime_ms();
        loop {
            if self.netif.chip().bus().slot_status(slot) == SocketStatus::Closed {
                return;
            }
            if self.elapsed_since(start) >= self.timeout_ms as u64 {
                break;
            }
            self.netif.clock().sleep_ms(POLL_INTERVAL_MS);
        }

        self.netif.chip().bus().close(slot);
    }

    /// `true` while the connection is usable. A half-closed connection
    /// (CLOSE_WAIT) still counts as connected while received data remains
    /// to be read.
    pub fn connected(&self) -> bool {
        let Some(slot) = self.slot else {
            return false;
        };
        let status = self.netif.chip().bus().slot_status(slot);
        match status {
            SocketStatus::Listen | SocketStatus::Closed | SocketStatus::FinWait => false,
            SocketStatus::CloseWait => self.available() > 0,
            _ => true,
        }
    }

    /// The chip's view of this session; `Closed` when unbound.
    pub fn status(&self) -> SocketStatus {
        let Some(slot) = self.slot else {
            return SocketStatus::Closed;
        };
        self.netif.chip().bus().slot_status(slot)
    }

    /// Local port of the bound slot; 0 when unbound.
    pub fn local_port(&self) -> Port {
        let Some(slot) = self.slot else {
            return Port(0);
        };
        self.netif.chip().bus().local_port(slot)
    }

    /// Remote address of the bound slot; unspecified when unbound.
    pub fn remote_ip(&self) -> Ipv4Addr {
        let Some(slot) = self.slot else {
            return Ipv4Addr::UNSPECIFIED;
        };
        self.netif.chip().bus().remote_endpoint(slot).0
    }

    /// Remote port of the bound slot; 0 when unbound.
    pub fn remote_port(&self) -> Port {
        let Some(slot) = self.slot else {
            return Port(0);
        };
        self.netif.chip().bus().remote_endpoint(slot).1
    }

    /// Best-effort disconnect of a previously bound, still-open slot before
    /// starting a new connection attempt. The session is unbound either way.
    fn abandon_previous(&mut self) {
        if let Some(slot) = self.slot.take() {
            let mut bus = self.netif.chip().bus();
            if bus.slot_status(slot) != SocketStatus::Closed {
                bus.disconnect(slot);
            }
        }
    }

    fn elapsed_since(&self, start: u64) -> u64 {
        self.netif.clock().uptime_ms().wrapping_sub(start)
    }
}

/// Two sessions are equal only when both are bound to the same slot.
impl<C: SocketChip, K: Clock> PartialEq for TcpStream<'_, C, K> {
    fn eq(&self, other: &Self) -> bool {
        match (self.slot, other.slot) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
