//! Non-blocking drivers for the two I/O surfaces the service loop pumps:
//! the local TUN device and the UDP socket. Both report pending work with
//! [`DriverResult::Pending`] instead of blocking, matching the reference
//! implementation's `SR_Pending`/`SR_Success`/`SR_Error` tri-state.

pub mod tun;
pub mod udp;

/// Outcome of a single non-blocking driver operation.
pub(crate) enum DriverResult<T> {
    /// The operation completed; `T` carries whatever it produced.
    Success(T),
    /// Nothing was ready; try again on a later tick.
    Pending,
}
