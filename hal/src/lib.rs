//! Hardware abstraction surface for the tether socket-offload driver.
//!
//! The driver in `tether-net` never touches registers directly. Everything it
//! needs from the platform arrives through the capability traits defined
//! here: the offload chip's bus ([`SocketChip`] / [`ChipBus`]), the DHCP
//! client collaborator ([`DhcpClient`]), and a monotonic clock with a
//! blocking sleep ([`Clock`]). Board support crates implement these traits;
//! tests substitute scripted fakes.

#![no_std]

pub mod addr;
pub mod chip;
pub mod clock;
pub mod dhcp;

pub use addr::{Ipv4Addr, MacAddr, Port};
pub use chip::{ChipBus, SLOT_COUNT, SlotId, SocketChip, SocketMode, SocketStatus};
pub use clock::Clock;
pub use dhcp::{DhcpClient, DhcpLease, LeaseCheck};
