//! Driver error taxonomy.

use core::fmt;

/// Everything that can go wrong in the session layer.
///
/// Errors resolve locally at the call that produced them; nothing is
/// propagated through unrelated layers, and no operation retries internally
/// beyond its specified bounded poll. Higher-level retry policy belongs to
/// the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetError {
    /// Every hardware socket slot is busy.
    NoFreeSlots,
    /// Address rejected before touching hardware (unspecified or broadcast
    /// where neither is usable).
    InvalidAddress,
    /// No supported chip responded during initialization.
    NoHardware,
    /// The chip reported the connection closed during active open.
    ConnectionRefused,
    /// A bounded wait (connect, stop, DNS) exceeded its deadline.
    TimedOut,
    /// Operation requires a bound slot and the session has none.
    NotBound,
    /// A DNS datagram arrived but did not match the outstanding query
    /// (wrong source, id, or question name). Transient: the wait continues.
    QueryMismatch,
    /// The DNS server answered with a protocol error or an answerless
    /// response. Terminal for this lookup.
    BadResponse,
    /// Hostname resolution failed outright for a non-literal name.
    HostUnreachable,
    /// The chip refused an outgoing write. For streams this is also latched
    /// in the session's sticky write-error flag.
    SendRejected,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFreeSlots => write!(f, "no free socket slot"),
            Self::InvalidAddress => write!(f, "invalid address"),
            Self::NoHardware => write!(f, "no offload chip detected"),
            Self::ConnectionRefused => write!(f, "connection refused"),
            Self::TimedOut => write!(f, "operation timed out"),
            Self::NotBound => write!(f, "session not bound to a slot"),
            Self::QueryMismatch => write!(f, "response does not match query"),
            Self::BadResponse => write!(f, "malformed or negative response"),
            Self::HostUnreachable => write!(f, "hostname resolution failed"),
            Self::SendRejected => write!(f, "chip refused outgoing data"),
        }
    }
}
