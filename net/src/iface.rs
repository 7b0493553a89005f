//! Interface configuration and DHCP glue.
//!
//! One [`Netif`] exists per physical interface. It owns the chip and clock
//! capabilities and is passed by reference to every session, replacing the
//! hidden global configuration a typical vendor driver keeps. The local,
//! gateway, and subnet addresses live in the chip's registers; the only
//! host-side shared state is the DNS server address and the ephemeral-port
//! selector.

use core::sync::atomic::{AtomicU16, Ordering};

use log::debug;
use spin::Mutex;
use tether_hal::{ChipBus, Clock, DhcpClient, Ipv4Addr, LeaseCheck, MacAddr, Port, SocketChip};

use crate::types::NetError;

/// First port of the IANA ephemeral range; the selector stays in
/// 49152..=65535 by construction.
const EPHEMERAL_BASE: u16 = 0xc000;

struct IfaceState {
    dns_server: Ipv4Addr,
}

/// One network interface: the offload chip, a clock, and the shared
/// address configuration.
pub struct Netif<C: SocketChip, K: Clock> {
    chip: C,
    clock: K,
    state: Mutex<IfaceState>,
    /// Low 14 bits select the next ephemeral port.
    ephemeral: AtomicU16,
}

impl<C: SocketChip, K: Clock> Netif<C, K> {
    /// Wrap a chip and clock. No hardware is touched until [`Self::begin`].
    pub fn new(chip: C, clock: K) -> Self {
        Self {
            chip,
            clock,
            state: Mutex::new(IfaceState {
                dns_server: Ipv4Addr::UNSPECIFIED,
            }),
            ephemeral: AtomicU16::new(0),
        }
    }

    /// The chip capability, for sessions bound to this interface.
    #[inline]
    pub fn chip(&self) -> &C {
        &self.chip
    }

    /// The clock capability, for bounded waits.
    #[inline]
    pub fn clock(&self) -> &K {
        &self.clock
    }

    /// Bring the interface up via DHCP.
    ///
    /// Initializes the chip, programs the MAC, zeroes the local address,
    /// then hands control to the DHCP collaborator. On success the leased
    /// local/gateway/subnet addresses are written to the chip, the DNS
    /// server is recorded, and the ephemeral-port selector is seeded from
    /// the clock so consecutive runs do not reuse the same source ports.
    pub fn begin(
        &self,
        mac: MacAddr,
        dhcp: &mut impl DhcpClient,
        init_timeout_ms: u32,
        response_timeout_ms: u32,
    ) -> Result<(), NetError> {
        {
            let mut bus = self.chip.bus();
            if !bus.init() {
                return Err(NetError::NoHardware);
            }
            bus.set_station(mac);
            bus.set_local_ip(Ipv4Addr::UNSPECIFIED);
        }

        // The collaborator does its own socket I/O; the bus must be free here.
        if !dhcp.begin(mac, init_timeout_ms, response_timeout_ms) {
            debug!("netif: DHCP bring-up failed");
            return Err(NetError::TimedOut);
        }

        let lease = dhcp.lease();
        self.apply_lease(lease.local, lease.gateway, lease.subnet, lease.dns);
        self.ephemeral
            .store(self.clock.uptime_ms() as u16, Ordering::Relaxed);

        debug!("netif: up, local {} dns {}", lease.local, lease.dns);
        Ok(())
    }

    /// Periodic lease maintenance hook.
    ///
    /// Polls the DHCP collaborator; when the lease was renewed or rebound,
    /// copies the (possibly changed) configuration into the chip. Never
    /// allocates or closes sockets.
    pub fn maintain(&self, dhcp: &mut impl DhcpClient) -> LeaseCheck {
        let rc = dhcp.check_lease();
        match rc {
            LeaseCheck::RenewOk | LeaseCheck::RebindOk => {
                let lease = dhcp.lease();
                self.apply_lease(lease.local, lease.gateway, lease.subnet, lease.dns);
                debug!("netif: lease refreshed, local {}", lease.local);
            }
            LeaseCheck::Nothing => {}
            LeaseCheck::RenewFail | LeaseCheck::RebindFail => {
                debug!("netif: lease maintenance failed, will retry");
            }
        }
        rc
    }

    fn apply_lease(&self, local: Ipv4Addr, gateway: Ipv4Addr, subnet: Ipv4Addr, dns: Ipv4Addr) {
        {
            let mut bus = self.chip.bus();
            bus.set_local_ip(local);
            bus.set_gateway_ip(gateway);
            bus.set_subnet_mask(subnet);
        }
        self.state.lock().dns_server = dns;
    }

    /// Next local port for an outgoing connection or query.
    pub fn ephemeral_port(&self) -> Port {
        let raw = self.ephemeral.fetch_add(1, Ordering::Relaxed);
        Port(EPHEMERAL_BASE | (raw & 0x3fff))
    }

    /// The configured DNS resolver address.
    pub fn dns_server(&self) -> Ipv4Addr {
        self.state.lock().dns_server
    }

    pub fn set_dns_server(&self, addr: Ipv4Addr) {
        self.state.lock().dns_server = addr;
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.chip.bus().local_ip()
    }

    pub fn set_local_ip(&self, addr: Ipv4Addr) {
        self.chip.bus().set_local_ip(addr);
    }

    pub fn gateway_ip(&self) -> Ipv4Addr {
        self.chip.bus().gateway_ip()
    }

    pub fn set_gateway_ip(&self, addr: Ipv4Addr) {
        self.chip.bus().set_gateway_ip(addr);
    }

    pub fn subnet_mask(&self) -> Ipv4Addr {
        self.chip.bus().subnet_mask()
    }

    pub fn set_subnet_mask(&self, mask: Ipv4Addr) {
        self.chip.bus().set_subnet_mask(mask);
    }

    pub fn mac_address(&self) -> MacAddr {
        self.chip.bus().station()
    }

    /// Program the chip's TCP retransmission interval in milliseconds
    /// (clamped to the register's 6553 ms maximum).
    pub fn set_retransmission_timeout(&self, ms: u16) {
        let ms = ms.min(6553);
        self.chip.bus().set_retransmission_time(ms * 10);
    }

    pub fn set_retransmission_count(&self, count: u8) {
        self.chip.bus().set_retransmission_count(count);
    }
}
