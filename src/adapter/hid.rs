//! Adapter backend for the USB-HID programmer: a bridge MCU that executes
//! the TAP pseudo-operations in firmware and talks to the host in 64-byte
//! frames (see [`super::frame`]).

use std::thread;
use std::time::Duration;

use hidapi::{HidApi, HidDevice};
use log::{debug, trace};

use super::frame::{Request, Response, FRAME_LEN, MAX_PE_RESPONSES};
use super::Adapter;
use crate::cable::WireMode;
use crate::error::{Error, Result};
use crate::pic32::{MchpStatus, TapCommand};
use crate::tap::FastData;

pub const VENDOR_ID: u16 = 0x04D8;
pub const PRODUCT_ID: u16 = 0x0080;

const READ_TIMEOUT_MS: i32 = 1000;

/// A programmer reached over USB HID.
pub struct HidAdapter {
    device: HidDevice,
    mode: WireMode,
}

impl HidAdapter {
    /// Opens the first programmer found on the bus.
    pub fn open() -> Result<Self> {
        let api = HidApi::new()?;
        Self::open_with(&api)
    }

    pub fn open_with(api: &HidApi) -> Result<Self> {
        let device = api.open(VENDOR_ID, PRODUCT_ID)?;
        debug!("opened programmer {VENDOR_ID:04x}:{PRODUCT_ID:04x}");
        let mut adapter = Self { device, mode: WireMode::Icsp };
        // Sync our idea of the wiring with whatever the firmware last had
        adapter.mode = adapter.query_wire_mode()?.unwrap_or(WireMode::Icsp);
        Ok(adapter)
    }

    fn exchange(&mut self, request: Request) -> Result<Option<Response>> {
        let frame = request.encode();
        trace!("-> {:02x} {:02x?}", frame[0], &frame[1..8]);
        // HID writes carry a leading report-ID byte, always 0 here
        let mut report = [0u8; FRAME_LEN + 1];
        report[1..].copy_from_slice(&frame);
        self.device.write(&report)?;
        if !request.expects_reply() {
            return Ok(None);
        }
        let mut buf = [0u8; FRAME_LEN];
        let n = self.device.read_timeout(&mut buf, READ_TIMEOUT_MS)?;
        if n != FRAME_LEN {
            return Err(Error::Timeout);
        }
        trace!("<- {:02x} {:02x?}", buf[0], &buf[1..8]);
        Response::parse(buf, request.opcode()).map(Some)
    }

    fn command(&mut self, request: Request) -> Result<Response> {
        match self.exchange(request)? {
            Some(response) => Ok(response),
            None => Err(Error::Timeout),
        }
    }

    fn send(&mut self, request: Request) -> Result<()> {
        self.exchange(request).map(|_| ())
    }

    /// Exercises the firmware's counting self-test.  The firmware checks
    /// that request bytes 1..64 count up from zero and answers with its
    /// own counter rather than echoing the request.
    pub fn self_test(&mut self) -> Result<()> {
        let mut pattern = [0u8; FRAME_LEN - 1];
        for (i, byte) in pattern.iter_mut().enumerate() {
            *byte = i as u8;
        }
        let response = self.command(Request::SelfTest { pattern: &pattern })?;
        check_self_test(&response)
    }

    fn query_wire_mode(&mut self) -> Result<Option<WireMode>> {
        let response = self.command(Request::WireMode { set: None })?;
        Ok(WireMode::from_wire(response.byte(1)))
    }

    pub fn set_leds(&mut self, mask: u8) -> Result<()> {
        self.send(Request::SetLeds { mask })
    }

    /// Reboots the programmer firmware.  The device drops off the bus, so
    /// the adapter is consumed.
    pub fn soft_reset(mut self) -> Result<()> {
        self.send(Request::SoftReset)
    }
}

impl Adapter for HidAdapter {
    fn wire_mode(&self) -> WireMode {
        self.mode
    }

    fn set_wire_mode(&mut self, mode: WireMode) -> Result<()> {
        let response = self.command(Request::WireMode { set: Some(mode.to_wire()) })?;
        if response.byte(1) != mode.to_wire() {
            return Err(Error::Echo { expected: mode.to_wire(), got: response.byte(1) });
        }
        self.mode = mode;
        Ok(())
    }

    fn setup_ports(&mut self, enable: bool) -> Result<()> {
        self.send(Request::SetupPorts { enable })
    }

    fn enter_pgm_mode(&mut self) -> Result<()> {
        self.send(Request::EnterPgmMode)
    }

    fn exit_pgm_mode(&mut self) -> Result<()> {
        self.send(Request::ExitPgmMode)
    }

    fn set_mode(&mut self, mode: u8, bits: u8) -> Result<()> {
        self.send(Request::SetMode { mode, bits })
    }

    fn send_command(&mut self, cmd: TapCommand) -> Result<()> {
        self.send(Request::SendCommand { value: cmd.value, bits: cmd.bits })
    }

    fn xfer_data(&mut self, data: u32, bits: u8) -> Result<u32> {
        self.command(Request::XferData { data, bits })?.word(1)
    }

    fn xfer_fast_data(&mut self, data: u32) -> Result<FastData> {
        let response = self.command(Request::XferFastData { data })?;
        Ok(FastData {
            word: response.word(1)?,
            pr_acc: response.byte(5) != 0,
        })
    }

    fn xfer_instruction(&mut self, instruction: u32) -> Result<()> {
        let response = self.command(Request::XferInstruction { instruction })?;
        if response.result() == 0 {
            return Err(Error::NotReady);
        }
        Ok(())
    }

    fn wait_ready(&mut self, retries: usize) -> Result<bool> {
        let retries = retries.min(u8::MAX as usize) as u8;
        let response = self.command(Request::WaitReady { retries })?;
        Ok(response.result() != 0)
    }

    fn serial_execution(&mut self, flash_enable: bool) -> Result<u8> {
        let response = self.command(Request::SerialExecution { flash_enable })?;
        Ok(response.result())
    }

    fn device_id(&mut self) -> Result<u32> {
        self.command(Request::DeviceId)?.word(1)
    }

    fn mchp_status(&mut self) -> Result<MchpStatus> {
        let word = self.command(Request::MchpStatus)?.word(1)?;
        Ok(MchpStatus::from_bits_truncate(word as u8))
    }

    fn read_address(&mut self, addr: u32) -> Result<u32> {
        self.command(Request::ReadAddress { addr })?.word(1)
    }

    fn pe_response(&mut self) -> Result<u32> {
        self.command(Request::PeResponse)?.word(1)
    }

    fn pe_responses(&mut self, out: &mut [u32]) -> Result<()> {
        for chunk in out.chunks_mut(MAX_PE_RESPONSES) {
            let response = self.command(Request::PeResponses { count: chunk.len() as u8 })?;
            for (i, word) in chunk.iter_mut().enumerate() {
                *word = response.word(1 + 4 * i)?;
            }
        }
        Ok(())
    }

    fn delay_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Reply bytes 1..63 must carry the firmware's counter; bytes 0 and 63
/// are overwritten by the acceptance flag and the opcode echo.
fn check_self_test(response: &Response) -> Result<()> {
    for offset in 1..FRAME_LEN - 1 {
        let expected = offset as u8;
        let got = response.byte(offset);
        if got != expected {
            return Err(Error::Echo { expected, got });
        }
    }
    Ok(())
}
