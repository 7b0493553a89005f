//! Scripted chip, clock, and DHCP doubles for the session-layer tests.
//!
//! [`TestChip`] models the offload chip as plain state behind a mutex: the
//! bus guard is the mutex guard, so the bracketing rules the real driver
//! lives by hold in tests too (a test that deadlocks is holding the bus
//! across a polling iteration). Behavior knobs on [`ChipState`] script the
//! interesting hardware outcomes: refused connects, hung handshakes,
//! rejected sends, slow transmit drains.

use std::boxed::Box;
use std::collections::VecDeque;
use std::vec::Vec;

use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, MutexGuard};
use tether_hal::{
    ChipBus, Clock, DhcpClient, DhcpLease, Ipv4Addr, LeaseCheck, MacAddr, Port, SLOT_COUNT,
    SlotId, SocketChip, SocketMode, SocketStatus,
};

/// How a scripted chip answers an active open.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ConnectScript {
    /// Handshake completes: status goes to `Established`.
    Accept,
    /// Peer refuses: status goes to `Closed`.
    Refuse,
    /// No answer: status sticks at `SynSent` until the test intervenes.
    Hang,
}

/// Synthesizes a reply datagram for an outgoing one: given the destination
/// and payload, returns the reply's source address, source port, and bytes.
pub type Responder = Box<dyn FnMut(Ipv4Addr, Port, &[u8]) -> Option<(Ipv4Addr, Port, Vec<u8>)> + Send>;

/// One datagram the scripted chip transmitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentDatagram {
    pub slot: SlotId,
    pub dest: (Ipv4Addr, Port),
    pub payload: Vec<u8>,
}

#[derive(Clone)]
pub struct SlotState {
    pub status: SocketStatus,
    pub mode: SocketMode,
    pub local_port: Port,
    pub remote: (Ipv4Addr, Port),
    pub multicast_group: Option<Ipv4Addr>,
    /// Receive buffer, front is next byte out.
    pub rx: VecDeque<u8>,
    /// Every byte ever accepted by a stream send.
    pub sent_stream: Vec<u8>,
    /// Stream bytes accepted but not yet drained onto the wire.
    pub pending_tx: usize,
    /// Outgoing datagram being staged.
    pub staged: Vec<u8>,
    pub dest: (Ipv4Addr, Port),
}

impl Default for SlotState {
    fn default() -> Self {
        Self {
            status: SocketStatus::Closed,
            mode: SocketMode::empty(),
            local_port: Port(0),
            remote: (Ipv4Addr::UNSPECIFIED, Port(0)),
            multicast_group: None,
            rx: VecDeque::new(),
            sent_stream: Vec::new(),
            pending_tx: 0,
            staged: Vec::new(),
            dest: (Ipv4Addr::UNSPECIFIED, Port(0)),
        }
    }
}

impl SlotState {
    fn reset(&mut self) {
        *self = SlotState::default();
    }
}

pub struct ChipState {
    pub init_ok: bool,
    pub station: MacAddr,
    pub local: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub retrans_time: u16,
    pub retrans_count: u8,
    pub connect_script: ConnectScript,
    /// Graceful close sticks at `FinWait` instead of reaching `Closed`.
    pub disconnect_hangs: bool,
    pub refuse_send: bool,
    pub send_capacity: usize,
    /// Pending stream bytes drained per `send_available` poll.
    pub drain_rate: usize,
    pub slots: [SlotState; SLOT_COUNT],
    pub sent: Vec<SentDatagram>,
    pub responder: Option<Responder>,
}

impl Default for ChipState {
    fn default() -> Self {
        Self {
            init_ok: true,
            station: MacAddr::ZERO,
            local: Ipv4Addr::UNSPECIFIED,
            gateway: Ipv4Addr::UNSPECIFIED,
            subnet: Ipv4Addr::UNSPECIFIED,
            retrans_time: 0,
            retrans_count: 0,
            connect_script: ConnectScript::Accept,
            disconnect_hangs: false,
            refuse_send: false,
            send_capacity: 2048,
            drain_rate: usize::MAX,
            slots: Default::default(),
            sent: Vec::new(),
            responder: None,
        }
    }
}

impl ChipState {
    fn free_slot(&self) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.status == SocketStatus::Closed)
    }

    /// Frame `payload` from `from:from_port` into the slot's receive
    /// buffer the way the chip does: 8-byte pseudo-header, then payload.
    pub fn deliver_datagram(
        &mut self,
        slot: usize,
        from: Ipv4Addr,
        from_port: Port,
        payload: &[u8],
    ) {
        let s = &mut self.slots[slot];
        s.rx.extend(from.as_bytes());
        s.rx.extend(from_port.to_network_bytes());
        s.rx.extend((payload.len() as u16).to_be_bytes());
        s.rx.extend(payload.iter().copied());
    }
}

#[derive(Default)]
pub struct TestChip {
    state: Mutex<ChipState>,
}

impl TestChip {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access to the scripted state. Must not be held while driver
    /// code runs, for the same reason the driver never holds the bus across
    /// a poll.
    pub fn state(&self) -> MutexGuard<'_, ChipState> {
        self.state.lock()
    }

    /// Number of slots not currently closed.
    pub fn in_use(&self) -> usize {
        self.state
            .lock()
            .slots
            .iter()
            .filter(|s| s.status != SocketStatus::Closed)
            .count()
    }

    /// Deliver a datagram to whichever UDP slot is bound to `local_port`.
    pub fn push_datagram(&self, local_port: Port, from: Ipv4Addr, from_port: Port, payload: &[u8]) {
        let mut state = self.state.lock();
        let slot = state
            .slots
            .iter()
            .position(|s| s.status == SocketStatus::Udp && s.local_port == local_port)
            .unwrap_or_else(|| panic!("no UDP slot bound to {}", local_port.as_u16()));
        state.deliver_datagram(slot, from, from_port, payload);
    }

    /// Queue received stream bytes on a slot.
    pub fn push_stream(&self, slot: SlotId, bytes: &[u8]) {
        self.state.lock().slots[slot.index()]
            .rx
            .extend(bytes.iter().copied());
    }

    pub fn set_status(&self, slot: SlotId, status: SocketStatus) {
        self.state.lock().slots[slot.index()].status = status;
    }
}

impl SocketChip for TestChip {
    type Bus<'a> = TestBus<'a>;

    fn bus(&self) -> TestBus<'_> {
        TestBus {
            state: self.state.lock(),
        }
    }
}

pub struct TestBus<'a> {
    state: MutexGuard<'a, ChipState>,
}

impl ChipBus for TestBus<'_> {
    fn init(&mut self) -> bool {
        self.state.init_ok
    }

    fn set_station(&mut self, mac: MacAddr) {
        self.state.station = mac;
    }

    fn station(&mut self) -> MacAddr {
        self.state.station
    }

    fn set_local_ip(&mut self, addr: Ipv4Addr) {
        self.state.local = addr;
    }

    fn local_ip(&mut self) -> Ipv4Addr {
        self.state.local
    }

    fn set_gateway_ip(&mut self, addr: Ipv4Addr) {
        self.state.gateway = addr;
    }

    fn gateway_ip(&mut self) -> Ipv4Addr {
        self.state.gateway
    }

    fn set_subnet_mask(&mut self, mask: Ipv4Addr) {
        self.state.subnet = mask;
    }

    fn subnet_mask(&mut self) -> Ipv4Addr {
        self.state.subnet
    }

    fn set_retransmission_time(&mut self, value: u16) {
        self.state.retrans_time = value;
    }

    fn set_retransmission_count(&mut self, count: u8) {
        self.state.retrans_count = count;
    }

    fn acquire_slot(&mut self, mode: SocketMode, local_port: Port) -> Option<SlotId> {
        let index = self.state.free_slot()?;
        let slot = &mut self.state.slots[index];
        slot.reset();
        slot.mode = mode;
        slot.local_port = local_port;
        slot.status = if mode.contains(SocketMode::TCP) {
            SocketStatus::Init
        } else {
            SocketStatus::Udp
        };
        Some(SlotId(index as u8))
    }

    fn acquire_multicast_slot(&mut self, group: Ipv4Addr, local_port: Port) -> Option<SlotId> {
        let id = self.acquire_slot(SocketMode::UDP | SocketMode::MULTICAST, local_port)?;
        self.state.slots[id.index()].multicast_group = Some(group);
        Some(id)
    }

    fn slot_status(&mut self, slot: SlotId) -> SocketStatus {
        self.state.slots[slot.index()].status
    }

    fn close(&mut self, slot: SlotId) {
        self.state.slots[slot.index()].reset();
    }

    fn connect(&mut self, slot: SlotId, addr: Ipv4Addr, port: Port) {
        let script = self.state.connect_script;
        let s = &mut self.state.slots[slot.index()];
        s.remote = (addr, port);
        s.status = match script {
            ConnectScript::Accept => SocketStatus::Established,
            ConnectScript::Refuse => SocketStatus::Closed,
            ConnectScript::Hang => SocketStatus::SynSent,
        };
    }

    fn disconnect(&mut self, slot: SlotId) {
        let hangs = self.state.disconnect_hangs;
        let s = &mut self.state.slots[slot.index()];
        s.status = if hangs {
            SocketStatus::FinWait
        } else {
            SocketStatus::Closed
        };
    }

    fn send(&mut self, slot: SlotId, buf: &[u8]) -> bool {
        if self.state.refuse_send {
            return false;
        }
        let capacity = self.state.send_capacity;
        let s = &mut self.state.slots[slot.index()];
        match s.status {
            SocketStatus::Established | SocketStatus::CloseWait => {}
            _ => return false,
        }
        if s.pending_tx + buf.len() > capacity {
            return false;
        }
        s.sent_stream.extend_from_slice(buf);
        s.pending_tx += buf.len();
        true
    }

    fn send_available(&mut self, slot: SlotId) -> usize {
        let capacity = self.state.send_capacity;
        let drain = self.state.drain_rate;
        let s = &mut self.state.slots[slot.index()];
        s.pending_tx -= drain.min(s.pending_tx);
        capacity - s.pending_tx
    }

    fn send_buffer_size(&self) -> usize {
        self.state.send_capacity
    }

    fn recv_available(&mut self, slot: SlotId) -> usize {
        self.state.slots[slot.index()].rx.len()
    }

    fn recv(&mut self, slot: SlotId, buf: &mut [u8]) -> usize {
        let s = &mut self.state.slots[slot.index()];
        let mut moved = 0;
        while moved < buf.len() {
            match s.rx.pop_front() {
                Some(byte) => {
                    buf[moved] = byte;
                    moved += 1;
                }
                None => break,
            }
        }
        moved
    }

    fn discard(&mut self, slot: SlotId, len: usize) -> usize {
        let s = &mut self.state.slots[slot.index()];
        let dropped = len.min(s.rx.len());
        s.rx.drain(..dropped);
        dropped
    }

    fn peek(&mut self, slot: SlotId) -> Option<u8> {
        self.state.slots[slot.index()].rx.front().copied()
    }

    fn start_datagram(&mut self, slot: SlotId, addr: Ipv4Addr, port: Port) -> bool {
        if addr.is_unspecified() || port.as_u16() == 0 {
            return false;
        }
        let s = &mut self.state.slots[slot.index()];
        s.dest = (addr, port);
        s.staged.clear();
        true
    }

    fn buffer_datagram(&mut self, slot: SlotId, offset: u16, buf: &[u8]) -> usize {
        let capacity = self.state.send_capacity;
        let s = &mut self.state.slots[slot.index()];
        let offset = offset as usize;
        let room = capacity.saturating_sub(offset);
        let accepted = buf.len().min(room);
        s.staged.truncate(offset);
        s.staged.extend_from_slice(&buf[..accepted]);
        accepted
    }

    fn send_datagram(&mut self, slot: SlotId) -> bool {
        if self.state.refuse_send {
            return false;
        }
        let (dest, payload) = {
            let s = &mut self.state.slots[slot.index()];
            (s.dest, core::mem::take(&mut s.staged))
        };
        self.state.sent.push(SentDatagram {
            slot,
            dest,
            payload: payload.clone(),
        });
        // The responder borrows nothing from the chip while it runs.
        if let Some(mut responder) = self.state.responder.take() {
            if let Some((from, from_port, reply)) = responder(dest.0, dest.1, &payload) {
                self.state.deliver_datagram(slot.index(), from, from_port, &reply);
            }
            self.state.responder = Some(responder);
        }
        true
    }

    fn local_port(&mut self, slot: SlotId) -> Port {
        self.state.slots[slot.index()].local_port
    }

    fn remote_endpoint(&mut self, slot: SlotId) -> (Ipv4Addr, Port) {
        self.state.slots[slot.index()].remote
    }
}

/// Virtual clock: `sleep_ms` advances time instead of waiting, so bounded
/// polls run to their timeout instantly.
#[derive(Default)]
pub struct TestClock {
    now: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(dead_code)]
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }
}

impl Clock for TestClock {
    fn uptime_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }

    fn sleep_ms(&self, ms: u32) {
        self.now.fetch_add(ms as u64, Ordering::Relaxed);
    }
}

/// Canned DHCP collaborator.
pub struct TestDhcp {
    pub lease: DhcpLease,
    pub begin_ok: bool,
    pub begin_calls: usize,
    pub checks: VecDeque<LeaseCheck>,
}

impl TestDhcp {
    pub fn with_lease(lease: DhcpLease) -> Self {
        Self {
            lease,
            begin_ok: true,
            begin_calls: 0,
            checks: VecDeque::new(),
        }
    }

    pub fn sample() -> Self {
        Self::with_lease(DhcpLease {
            local: Ipv4Addr([192, 168, 1, 50]),
            gateway: Ipv4Addr([192, 168, 1, 1]),
            subnet: Ipv4Addr([255, 255, 255, 0]),
            dns: Ipv4Addr([192, 168, 1, 1]),
        })
    }
}

impl DhcpClient for TestDhcp {
    fn begin(&mut self, _mac: MacAddr, _init_timeout_ms: u32, _response_timeout_ms: u32) -> bool {
        self.begin_calls += 1;
        self.begin_ok
    }

    fn check_lease(&mut self) -> LeaseCheck {
        self.checks.pop_front().unwrap_or(LeaseCheck::Nothing)
    }

    fn lease(&self) -> DhcpLease {
        self.lease
    }
}
