//! DHCP client collaborator interface.
//!
//! Lease acquisition and renewal run in a separate component (often a
//! vendor-supplied client); the driver only triggers it and copies the
//! resulting configuration into the chip. See `Netif::begin` and
//! `Netif::maintain` in `tether-net`.

use crate::addr::{Ipv4Addr, MacAddr};

/// Configuration obtained from a DHCP server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DhcpLease {
    pub local: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub subnet: Ipv4Addr,
    pub dns: Ipv4Addr,
}

impl DhcpLease {
    /// A lease is usable once the server has assigned a local address.
    pub fn is_valid(&self) -> bool {
        !self.local.is_unspecified()
    }
}

/// Outcome of one lease maintenance poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaseCheck {
    /// Lease still current; nothing was done.
    Nothing,
    /// Lease renewed with the original server; configuration may have changed.
    RenewOk,
    /// Lease rebound through a broadcast request; configuration may have changed.
    RebindOk,
    /// Renewal attempt failed; the client will retry on a later poll.
    RenewFail,
    /// Rebind attempt failed; the client will retry on a later poll.
    RebindFail,
}

/// The external DHCP lease state machine.
pub trait DhcpClient {
    /// Run discovery and request until a lease is obtained or the timeouts
    /// expire. `init_timeout_ms` bounds the whole exchange,
    /// `response_timeout_ms` each individual server response. Returns
    /// `true` once a valid lease is held.
    fn begin(&mut self, mac: MacAddr, init_timeout_ms: u32, response_timeout_ms: u32) -> bool;

    /// Poll the renew/rebind state machine. Cheap when nothing is due.
    fn check_lease(&mut self) -> LeaseCheck;

    /// The currently held lease. Only meaningful after [`Self::begin`]
    /// returned `true`.
    fn lease(&self) -> DhcpLease;
}
