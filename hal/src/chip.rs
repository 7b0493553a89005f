//! Socket-offload chip capability traits.
//!
//! The controller chip owns a fixed pool of hardware socket contexts
//! ("slots"), each with its own buffers and status register, and performs
//! all TCP/IP packet processing on its own. The host reaches it over a
//! shared serial bus that must be held exclusively for the duration of a
//! register burst.
//!
//! That exclusivity is encoded in the type system: [`SocketChip::bus`]
//! returns an RAII guard implementing [`ChipBus`]; acquiring the guard
//! claims the bus, dropping it releases the bus. Callers scope the guard to
//! a single burst; polling loops must re-acquire it on every iteration
//! rather than holding it across a wait.

use core::fmt;

use bitflags::bitflags;

use crate::addr::{Ipv4Addr, MacAddr, Port};

/// Number of hardware socket slots on the controller chip.
pub const SLOT_COUNT: usize = 8;

/// Index of one hardware socket slot.
///
/// A slot is exclusively owned by one session from acquisition until it is
/// closed. "No slot" is expressed as `Option<SlotId>`, never as an
/// out-of-range index.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(pub u8);

impl SlotId {
    /// Return the raw slot index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SlotId({})", self.0)
    }
}

bitflags! {
    /// Per-slot mode register bits.
    #[derive(Clone, Copy, PartialEq, Eq, Debug)]
    pub struct SocketMode: u8 {
        /// Byte-stream (TCP) operation.
        const TCP = 0x01;
        /// Datagram (UDP) operation.
        const UDP = 0x02;
        /// Multicast reception; only meaningful together with [`Self::UDP`].
        const MULTICAST = 0x80;
    }
}

/// Per-slot status register values, as reported by the chip.
///
/// The driver observes these; the chip owns the transitions.
#[repr(u8)]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SocketStatus {
    Closed = 0x00,
    Init = 0x13,
    Listen = 0x14,
    SynSent = 0x15,
    SynRecv = 0x16,
    Established = 0x17,
    FinWait = 0x18,
    Closing = 0x1a,
    TimeWait = 0x1b,
    CloseWait = 0x1c,
    LastAck = 0x1d,
    Udp = 0x22,
}

impl SocketStatus {
    /// Decode a raw status register value. Unknown values read as `Closed`,
    /// which is the safe interpretation for every caller.
    pub const fn from_raw(raw: u8) -> Self {
        match raw {
            0x13 => Self::Init,
            0x14 => Self::Listen,
            0x15 => Self::SynSent,
            0x16 => Self::SynRecv,
            0x17 => Self::Established,
            0x18 => Self::FinWait,
            0x1a => Self::Closing,
            0x1b => Self::TimeWait,
            0x1c => Self::CloseWait,
            0x1d => Self::LastAck,
            0x22 => Self::Udp,
            _ => Self::Closed,
        }
    }

    /// Return the raw register value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Handle to the offload chip.
///
/// The only operation is claiming the bus; all register access goes through
/// the returned [`ChipBus`] guard.
pub trait SocketChip {
    /// Bus guard type; releases the bus when dropped.
    type Bus<'a>: ChipBus
    where
        Self: 'a;

    /// Claim the bus for one register burst.
    fn bus(&self) -> Self::Bus<'_>;
}

/// One register burst worth of chip operations.
///
/// Implementations bracket the underlying transport (chip-select assertion,
/// SPI transaction, ...) around the lifetime of the guard. The methods
/// mirror the chip's command set one-to-one and perform no protocol logic;
/// policy lives entirely in `tether-net`.
pub trait ChipBus {
    // -------------------------------------------------------------------------
    // Chip-wide setup
    // -------------------------------------------------------------------------

    /// Reset and probe the chip. `false` if no supported hardware responds.
    fn init(&mut self) -> bool;

    /// Program the station MAC address.
    fn set_station(&mut self, mac: MacAddr);

    /// Read back the station MAC address.
    fn station(&mut self) -> MacAddr;

    fn set_local_ip(&mut self, addr: Ipv4Addr);
    fn local_ip(&mut self) -> Ipv4Addr;
    fn set_gateway_ip(&mut self, addr: Ipv4Addr);
    fn gateway_ip(&mut self) -> Ipv4Addr;
    fn set_subnet_mask(&mut self, mask: Ipv4Addr);
    fn subnet_mask(&mut self) -> Ipv4Addr;

    /// Program the chip's TCP retransmission interval, in units of 100 µs.
    fn set_retransmission_time(&mut self, value: u16);

    /// Program the chip's TCP retransmission count.
    fn set_retransmission_count(&mut self, count: u8);

    // -------------------------------------------------------------------------
    // Slot registry
    // -------------------------------------------------------------------------

    /// Claim a free slot and open it in the given mode on `local_port`.
    /// Returns `None` when every slot is busy.
    fn acquire_slot(&mut self, mode: SocketMode, local_port: Port) -> Option<SlotId>;

    /// Claim a free slot, join `group`, and open it for multicast UDP
    /// reception on `local_port`. Returns `None` when every slot is busy.
    fn acquire_multicast_slot(&mut self, group: Ipv4Addr, local_port: Port) -> Option<SlotId>;

    /// Read the slot's status register.
    fn slot_status(&mut self, slot: SlotId) -> SocketStatus;

    /// Immediately close the slot, discarding any connection state.
    fn close(&mut self, slot: SlotId);

    // -------------------------------------------------------------------------
    // TCP
    // -------------------------------------------------------------------------

    /// Start the chip's active-open handshake toward `addr:port`. Completion
    /// is observed through [`Self::slot_status`].
    fn connect(&mut self, slot: SlotId, addr: Ipv4Addr, port: Port);

    /// Request a graceful close (FIN). Completion is observed through
    /// [`Self::slot_status`].
    fn disconnect(&mut self, slot: SlotId);

    /// Queue `buf` into the slot's send buffer and commit it. `false` if the
    /// chip refused the data (connection gone or buffer unavailable); in
    /// that case none of `buf` was accepted.
    fn send(&mut self, slot: SlotId, buf: &[u8]) -> bool;

    /// Free space in the slot's send buffer, in bytes.
    fn send_available(&mut self, slot: SlotId) -> usize;

    /// Total size of a slot's send buffer, in bytes.
    fn send_buffer_size(&self) -> usize;

    // -------------------------------------------------------------------------
    // Receive path (shared by TCP and UDP byte streams)
    // -------------------------------------------------------------------------

    /// Bytes waiting in the slot's receive buffer.
    fn recv_available(&mut self, slot: SlotId) -> usize;

    /// Move up to `buf.len()` bytes out of the receive buffer. Returns the
    /// number of bytes moved (0 when empty).
    fn recv(&mut self, slot: SlotId, buf: &mut [u8]) -> usize;

    /// Drop up to `len` bytes from the receive buffer without copying them
    /// out. Returns the number of bytes dropped.
    fn discard(&mut self, slot: SlotId, len: usize) -> usize;

    /// Next receive-buffer byte without consuming it; `None` when empty.
    fn peek(&mut self, slot: SlotId) -> Option<u8>;

    // -------------------------------------------------------------------------
    // UDP
    // -------------------------------------------------------------------------

    /// Begin staging an outgoing datagram to `addr:port`. `false` if the
    /// destination is unusable (unspecified address or port zero).
    fn start_datagram(&mut self, slot: SlotId, addr: Ipv4Addr, port: Port) -> bool;

    /// Append `buf` to the staged datagram at `offset` bytes into the send
    /// buffer. Returns the number of bytes the chip accepted, which may be
    /// less than `buf.len()` when the buffer fills.
    fn buffer_datagram(&mut self, slot: SlotId, offset: u16, buf: &[u8]) -> usize;

    /// Commit the staged bytes as one datagram to the destination recorded
    /// by [`Self::start_datagram`]. `false` if transmission failed.
    fn send_datagram(&mut self, slot: SlotId) -> bool;

    // -------------------------------------------------------------------------
    // Per-slot address registers
    // -------------------------------------------------------------------------

    /// The slot's local (source) port register.
    fn local_port(&mut self, slot: SlotId) -> Port;

    /// The slot's remote address and port registers.
    fn remote_endpoint(&mut self, slot: SlotId) -> (Ipv4Addr, Port);
}
