//! Blocking TCP/UDP/DNS session layer over a socket-offload Ethernet chip.
//!
//! The controller chip runs the TCP/IP stack in hardware; this crate drives
//! it: it dispenses the chip's fixed pool of socket slots to stream and
//! datagram sessions, brackets every register burst in a bus transaction,
//! and runs the bounded polling loops that make connect, close, and DNS
//! resolution appear synchronous to the caller.
//!
//! Everything here assumes a single cooperative flow of control. Operations
//! block (busy-poll with a [`tether_hal::Clock`] sleep) until they finish or
//! their timeout expires; no session or resolver may be entered from two
//! logical flows at once.
//!
//! Entry points:
//! - [`Netif`]: owns the chip and clock, holds the interface-wide
//!   configuration, runs DHCP bring-up and lease maintenance.
//! - [`TcpStream`]: one byte-stream connection on one slot.
//! - [`UdpSocket`]: one datagram endpoint on one slot.
//! - [`DnsResolver`]: one blocking A-record lookup at a time.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod datagram;
pub mod dns;
pub mod iface;
pub mod stream;
pub mod types;

pub use datagram::{DatagramHeader, UdpSocket};
pub use dns::{DnsResolver, inet_aton};
pub use iface::Netif;
pub use stream::TcpStream;
pub use types::NetError;

#[cfg(test)]
mod testutil;
