//! This crate programs PIC32 flash over the EJTAG debug port, at a variety
//! of levels of abstraction.  At the lowest level, the Cable trait is one
//! wired connection to the target, either 4-wire JTAG or the 2-wire ICSP
//! encoding that multiplexes TMS, TDI and TDO onto a single data line; the
//! gpio module bit-bangs both over `embedded-hal` pins.
//!
//! The next level is the TapPort, which composes clock cycles into the
//! pseudo-operations of the flash programming specification: SetMode,
//! SendCommand, XferData, XferFastData and XferInstruction, plus the
//! device status and programming-mode choreography built from them.  The
//! Adapter trait abstracts over where those pseudo-operations execute: a
//! TapPort in-process, or a USB-HID programmer whose firmware runs them on
//! the host's behalf, one 64-byte frame per operation.
//!
//! Highest is the Session, which owns the open/probe/close lifecycle,
//! chip erase, and the Programming Executive: a small agent bootstrapped
//! into target RAM that performs row programming, bulk reads and CRC
//! verification at full speed.
//!
//! # Example
//! ```no_run
//! use pic32_tap::adapter::hid::HidAdapter;
//! use pic32_tap::session::{Config, Session};
//!
//! # fn main() -> pic32_tap::Result<()> {
//! let adapter = HidAdapter::open()?;
//! let mut session = Session::open(adapter, Config::default())?;
//! println!("device id {:#010x}", session.device_id());
//!
//! session.erase_chip()?;
//! session.load_executive(&pe_image(), 0x0301)?;
//! session.program_row(0x1D00_0000, &firmware_row())?;
//! session.verify_data(0x1D00_0000, &firmware_row())?;
//! session.close()?;
//! # Ok(())
//! # }
//! # fn pe_image() -> [u32; 4] { [0; 4] }
//! # fn firmware_row() -> [u32; 128] { [0; 128] }
//! ```

#![no_std]

#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod adapter;
pub mod cable;
pub mod error;
pub mod executive;
pub mod pic32;
pub mod retry;
pub mod session;
pub mod tap;

pub use error::{Error, Result};
