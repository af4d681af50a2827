//! The adapter seam: everything the flash-programming session needs from
//! the layer below, whether the TAP engine runs in-process over a local
//! [`Cable`](crate::cable::Cable) or inside a USB-HID bridge that executes
//! the pseudo-operations in firmware.

use crate::cable::{Cable, WireMode};
use crate::error::{Error, Result};
use crate::pic32::{MchpStatus, TapCommand};
use crate::tap::{FastData, TapPort};

pub mod frame;
#[cfg(feature = "std")]
pub mod hid;

/// A programming adapter: executes TAP pseudo-operations and the composite
/// device-control sequences built from them.
///
/// Every method is fallible because an adapter may sit behind a transport
/// that can time out or fail; in-process implementations simply never do.
pub trait Adapter {
    fn wire_mode(&self) -> WireMode;

    /// Select the wiring for subsequent operations.  Adapters with fixed
    /// wiring reject a mismatch with [`Error::Unsupported`].
    fn set_wire_mode(&mut self, mode: WireMode) -> Result<()>;

    /// Claim (`true`) or release (`false`) the target-facing pins.
    fn setup_ports(&mut self, enable: bool) -> Result<()>;

    fn enter_pgm_mode(&mut self) -> Result<()>;
    fn exit_pgm_mode(&mut self) -> Result<()>;

    fn set_mode(&mut self, mode: u8, bits: u8) -> Result<()>;
    fn send_command(&mut self, cmd: TapCommand) -> Result<()>;
    fn xfer_data(&mut self, data: u32, bits: u8) -> Result<u32>;
    fn xfer_fast_data(&mut self, data: u32) -> Result<FastData>;
    fn xfer_instruction(&mut self, instruction: u32) -> Result<()>;

    /// Poll for target-ready within `retries` attempts; `Ok(false)` means
    /// the budget ran out.
    fn wait_ready(&mut self, retries: usize) -> Result<bool>;

    /// Run the serial-execution entry sequence.  Returns 0x80 on success
    /// or the raw MCHP status byte when code protection blocked it.
    fn serial_execution(&mut self, flash_enable: bool) -> Result<u8>;

    fn device_id(&mut self) -> Result<u32>;
    fn mchp_status(&mut self) -> Result<MchpStatus>;

    /// Read one word of target memory via instruction injection.  The TAP
    /// must already be on the ETAP with serial execution active.
    fn read_address(&mut self, addr: u32) -> Result<u32>;

    /// Collect one PE response word.
    fn pe_response(&mut self) -> Result<u32>;

    /// Collect a run of PE response words.  Implementations may batch
    /// these on the wire; `out` may not exceed [`frame::MAX_PE_RESPONSES`]
    /// per call.
    fn pe_responses(&mut self, out: &mut [u32]) -> Result<()> {
        for word in out.iter_mut() {
            *word = self.pe_response()?;
        }
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32);
}

impl<C: Cable> Adapter for TapPort<C> {
    fn wire_mode(&self) -> WireMode {
        TapPort::wire_mode(self)
    }

    fn set_wire_mode(&mut self, mode: WireMode) -> Result<()> {
        if mode == TapPort::wire_mode(self) {
            Ok(())
        } else {
            Err(Error::Unsupported("cable wiring is fixed"))
        }
    }

    fn setup_ports(&mut self, enable: bool) -> Result<()> {
        self.cable_mut().setup_ports(enable);
        Ok(())
    }

    fn enter_pgm_mode(&mut self) -> Result<()> {
        TapPort::enter_pgm_mode(self);
        Ok(())
    }

    fn exit_pgm_mode(&mut self) -> Result<()> {
        TapPort::exit_pgm_mode(self);
        Ok(())
    }

    fn set_mode(&mut self, mode: u8, bits: u8) -> Result<()> {
        TapPort::set_mode(self, mode, bits);
        Ok(())
    }

    fn send_command(&mut self, cmd: TapCommand) -> Result<()> {
        TapPort::send_command(self, cmd);
        Ok(())
    }

    fn xfer_data(&mut self, data: u32, bits: u8) -> Result<u32> {
        Ok(TapPort::xfer_data(self, data, bits))
    }

    fn xfer_fast_data(&mut self, data: u32) -> Result<FastData> {
        Ok(TapPort::xfer_fast_data(self, data))
    }

    fn xfer_instruction(&mut self, instruction: u32) -> Result<()> {
        TapPort::xfer_instruction(self, instruction)
    }

    fn wait_ready(&mut self, retries: usize) -> Result<bool> {
        Ok(TapPort::wait_ready(self, retries))
    }

    fn serial_execution(&mut self, flash_enable: bool) -> Result<u8> {
        Ok(TapPort::serial_execution(self, flash_enable))
    }

    fn device_id(&mut self) -> Result<u32> {
        Ok(TapPort::device_id(self))
    }

    fn mchp_status(&mut self) -> Result<MchpStatus> {
        Ok(TapPort::mchp_status(self))
    }

    fn read_address(&mut self, addr: u32) -> Result<u32> {
        TapPort::read_from_address(self, addr)
    }

    fn pe_response(&mut self) -> Result<u32> {
        Ok(TapPort::pe_response(self))
    }

    fn delay_ms(&mut self, ms: u32) {
        self.cable_mut().delay_us(ms.saturating_mul(1000));
    }
}
