//! Error type shared by every layer of the crate.
//!
//! Each failure kind gets its own variant so the caller can decide which
//! ones abort the session; the session layer itself treats everything
//! except a verify mismatch as unrecoverable, since the TAP and PE state
//! are not safely resumable past a desynchronization.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// No response frame arrived from the adapter within the bounded wait.
    #[error("adapter timed out waiting for a response")]
    Timeout,

    /// The response frame echoed a different opcode than the request,
    /// meaning host and adapter are desynchronized.
    #[error("response echoed opcode {got:#04x}, expected {expected:#04x}")]
    Echo { expected: u8, got: u8 },

    /// A 32-bit response field held the reserved failure marker.
    #[error("adapter signalled failure in a response payload")]
    Sentinel,

    /// The device identification code does not carry the Microchip
    /// manufacturer pattern in its low 12 bits.
    #[error("device id {0:#010x} is not a supported PIC32 part")]
    UnknownDevice(u32),

    /// MCHP_STATUS did not match what the current operation requires.
    #[error("unexpected device status {0:#04x}")]
    BadStatus(u8),

    /// The target reports code protection; serial execution is refused.
    #[error("target is code-protected, status {0:#04x}")]
    CodeProtected(u8),

    /// A PE-mediated operation was requested before `load_executive`.
    #[error("operation requires the programming executive")]
    NoExecutive,

    /// A PE response word did not echo the issued command in its high half.
    #[error("bad executive response {got:#010x}, expected {expected:#010x}")]
    ExecutiveResponse { expected: u32, got: u32 },

    /// The EXEC_VERSION handshake returned an incompatible version.
    #[error("executive version {got:#06x}, host expects {expected:#06x}")]
    ExecutiveVersion { expected: u16, got: u16 },

    /// The target never raised PrAcc within the ready-wait budget; the
    /// instruction was not sent.
    #[error("target not ready for instruction transfer")]
    NotReady,

    /// The flash controller stayed busy for the whole busy-wait budget.
    #[error("flash controller still busy after {0} polls")]
    FlashBusy(usize),

    /// A 2-wire fast-data transfer was not serviced by the processor
    /// (strict PrAcc checking only).
    #[error("processor access not serviced (PrAcc = 0)")]
    PrAcc,

    /// Device-reported CRC and locally computed CRC disagree.
    #[error("checksum failed at {addr:#010x}: device {device:#06x}, host {host:#06x}")]
    Verify { addr: u32, device: u16, host: u16 },

    /// Address or length violates word alignment.
    #[error("address {0:#010x} is not word-aligned")]
    Unaligned(u32),

    /// The operation is not available on this transport or configuration.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// USB HID transport failure.
    #[cfg(feature = "std")]
    #[error("HID transport error")]
    Hid(#[from] hidapi::HidError),
}
