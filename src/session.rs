//! A flash-programming session against one target device: the open/close
//! lifecycle, serial execution, chip erase, and the Programming Executive
//! mediated read, program and verify operations.

use log::{debug, info, warn};

use crate::adapter::Adapter;
use crate::cable::WireMode;
use crate::error::{Error, Result};
use crate::pic32::{
    self, pe_command, MchpStatus, ERASE_POLL_MS, ERASE_RETRIES, ETAP_FASTDATA,
    IDCODE_VENDOR_MASK, IDCODE_VENDOR_MCHP, MTAP_COMMAND, MTAP_SW_ETAP, MTAP_SW_MTAP,
    PE_GET_CRC, PE_READ, PE_READ_BATCH, PE_ROW_PROGRAM, PE_WORD_PROGRAM, TAP_RESET,
};
use crate::retry;

/// Device families differ in a few spots of the programming choreography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFamily {
    /// PIC32MX and similar parts.
    Mx,
    /// PIC32MZ: no flash-enable command, extra reset release after erase.
    Mz,
}

impl DeviceFamily {
    /// Whether serial-execution entry must issue the flash-access enable
    /// command.  MZ parts have no such command.
    pub fn needs_flash_enable(self) -> bool {
        !matches!(self, DeviceFamily::Mz)
    }
}

/// What to do when a device-reported CRC disagrees with the host's.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyPolicy {
    /// Treat the mismatch as an error.
    Fatal,
    /// Log the mismatch and report it through the return value.
    Report,
}

#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub wire_mode: WireMode,
    pub family: DeviceFamily,
    pub verify: VerifyPolicy,
    /// Reject fast-data transfers the processor did not acknowledge.
    /// Off by default; at bit-banged clock rates the processor always
    /// keeps up and some parts report the flag unreliably.
    pub strict_pracc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            wire_mode: WireMode::Icsp,
            family: DeviceFamily::Mx,
            verify: VerifyPolicy::Fatal,
            strict_pracc: false,
        }
    }
}

/// An open connection to a target in programming mode.
///
/// Obtained from [`Session::open`], which probes the device; dropped
/// targets should be released with [`Session::close`] so the part leaves
/// programming mode cleanly.
pub struct Session<A> {
    pub(crate) adapter: A,
    pub(crate) config: Config,
    device_id: u32,
    serial_exec: bool,
    pub(crate) pe_loaded: bool,
}

impl<A: Adapter> Session<A> {
    /// Probes and claims the target: selects the wiring, enters
    /// programming mode, validates the device ID vendor bits and checks
    /// that the configuration is readable and the flash controller idle.
    ///
    /// On any probe failure the target is released again before the error
    /// is returned.
    pub fn open(mut adapter: A, config: Config) -> Result<Self> {
        match Self::probe(&mut adapter, config) {
            Ok(device_id) => {
                info!("device {device_id:#010x} ready ({:?})", config.wire_mode);
                Ok(Self {
                    adapter,
                    config,
                    device_id,
                    serial_exec: false,
                    pe_loaded: false,
                })
            }
            Err(err) => {
                let _ = adapter.exit_pgm_mode();
                let _ = adapter.setup_ports(false);
                Err(err)
            }
        }
    }

    fn probe(adapter: &mut A, config: Config) -> Result<u32> {
        adapter.set_wire_mode(config.wire_mode)?;
        adapter.setup_ports(true)?;
        adapter.enter_pgm_mode()?;
        adapter.set_mode(TAP_RESET.0, TAP_RESET.1)?;
        let device_id = adapter.xfer_data(0, 32)?;
        if device_id & IDCODE_VENDOR_MASK != IDCODE_VENDOR_MCHP {
            return Err(Error::UnknownDevice(device_id));
        }
        adapter.send_command(MTAP_SW_MTAP)?;
        adapter.set_mode(TAP_RESET.0, TAP_RESET.1)?;
        adapter.send_command(MTAP_COMMAND)?;
        let status = MchpStatus::from_bits_truncate(
            adapter.xfer_data(pic32::MCHP_STATUS as u32, 8)? as u8,
        );
        debug!("probe status {status:?}");
        if !status.contains(MchpStatus::CFGRDY) || status.contains(MchpStatus::FCBUSY) {
            return Err(Error::BadStatus(status.bits()));
        }
        Ok(device_id)
    }

    /// Releases the target: back to the execution TAP, out of programming
    /// mode, pins floated.  Every step is attempted even if an earlier one
    /// fails; the first failure is the one reported.
    pub fn close(mut self) -> Result<()> {
        debug!("closing session");
        let mut first: Option<Error> = None;
        let mut note = |result: Result<()>| {
            if let Err(err) = result {
                if first.is_none() {
                    first = Some(err);
                }
            }
        };
        note(self.adapter.send_command(MTAP_SW_ETAP));
        note(self.adapter.set_mode(TAP_RESET.0, TAP_RESET.1));
        note(self.adapter.exit_pgm_mode());
        note(self.adapter.setup_ports(false));
        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn device_id(&self) -> u32 {
        self.device_id
    }

    pub fn pe_loaded(&self) -> bool {
        self.pe_loaded
    }

    /// Switches the target into serial execution mode.  Idempotent; fails
    /// with [`Error::CodeProtected`] when the code-protect fuse blocks it.
    pub fn serial_execution(&mut self) -> Result<()> {
        if self.serial_exec {
            return Ok(());
        }
        let status = self
            .adapter
            .serial_execution(self.config.family.needs_flash_enable())?;
        if status != MchpStatus::CPS.bits() {
            return Err(Error::CodeProtected(status));
        }
        self.serial_exec = true;
        Ok(())
    }

    /// Reads one word of target memory by instruction injection.  Works
    /// without the PE, but needs serial execution.
    pub fn read_word(&mut self, addr: u32) -> Result<u32> {
        self.serial_execution()?;
        self.adapter.send_command(MTAP_SW_ETAP)?;
        self.adapter.set_mode(TAP_RESET.0, TAP_RESET.1)?;
        self.adapter.read_address(addr)
    }

    /// Reads `out.len()` consecutive words starting at `addr`.  With the
    /// PE loaded this streams fixed-size read batches; without it each
    /// word goes through instruction injection, which is much slower.
    pub fn read_data(&mut self, addr: u32, out: &mut [u32]) -> Result<()> {
        word_aligned(addr)?;
        self.serial_execution()?;
        if !self.pe_loaded {
            for (i, word) in out.iter_mut().enumerate() {
                *word = self.read_word(addr + 4 * i as u32)?;
            }
            return Ok(());
        }
        let mut addr = addr;
        let mut remaining = out;
        while !remaining.is_empty() {
            let n = remaining.len().min(PE_READ_BATCH);
            if n == PE_READ_BATCH {
                let (batch, rest) = remaining.split_at_mut(PE_READ_BATCH);
                self.pe_read_batch(addr, batch)?;
                remaining = rest;
            } else {
                // Short tail still costs a full batch on the wire
                let mut scratch = [0u32; PE_READ_BATCH];
                self.pe_read_batch(addr, &mut scratch)?;
                remaining[..n].copy_from_slice(&scratch[..n]);
                remaining = &mut [];
            }
            addr += 4 * PE_READ_BATCH as u32;
        }
        Ok(())
    }

    fn pe_read_batch(&mut self, addr: u32, out: &mut [u32]) -> Result<()> {
        self.adapter.send_command(ETAP_FASTDATA)?;
        self.pe_send(pe_command(PE_READ, PE_READ_BATCH as u16))?;
        self.pe_send(addr)?;
        self.pe_expect(PE_READ)?;
        // 32 words arrive as four runs of eight
        for chunk in out.chunks_mut(8) {
            self.adapter.pe_responses(chunk)?;
        }
        Ok(())
    }

    /// Bulk-erases the chip and waits for the flash controller to settle.
    /// Does not need serial execution; invalidates it and any loaded PE.
    pub fn erase_chip(&mut self) -> Result<()> {
        info!("erasing chip");
        self.adapter.send_command(MTAP_SW_MTAP)?;
        self.adapter.set_mode(TAP_RESET.0, TAP_RESET.1)?;
        self.adapter.send_command(MTAP_COMMAND)?;
        self.adapter.xfer_data(pic32::MCHP_ERASE as u32, 8)?;
        if self.config.family == DeviceFamily::Mz {
            self.adapter.xfer_data(pic32::MCHP_DEASSERT_RST as u32, 8)?;
        }
        let adapter = &mut self.adapter;
        let settled = retry::poll(ERASE_RETRIES, |_| {
            adapter.delay_ms(ERASE_POLL_MS);
            let status = MchpStatus::from_bits_truncate(
                adapter.xfer_data(pic32::MCHP_STATUS as u32, 8)? as u8,
            );
            Ok(status.contains(MchpStatus::CFGRDY) && !status.contains(MchpStatus::FCBUSY))
        })?;
        self.serial_exec = false;
        self.pe_loaded = false;
        match settled {
            Some(polls) => {
                debug!("erase settled after {polls} polls");
                Ok(())
            }
            None => Err(Error::FlashBusy(ERASE_RETRIES)),
        }
    }

    /// Programs one word of flash through the PE.
    pub fn program_word(&mut self, addr: u32, word: u32) -> Result<()> {
        word_aligned(addr)?;
        self.require_pe()?;
        self.adapter.send_command(ETAP_FASTDATA)?;
        self.pe_send(pe_command(PE_WORD_PROGRAM, 2))?;
        self.pe_send(addr)?;
        self.pe_send(word)?;
        self.pe_expect(PE_WORD_PROGRAM)?;
        Ok(())
    }

    /// Programs one row of flash through the PE.
    pub fn program_row(&mut self, addr: u32, row: &[u32]) -> Result<()> {
        word_aligned(addr)?;
        self.require_pe()?;
        self.adapter.send_command(ETAP_FASTDATA)?;
        self.pe_send(pe_command(PE_ROW_PROGRAM, row.len() as u16))?;
        self.pe_send(addr)?;
        for &word in row {
            self.pe_send(word)?;
        }
        self.pe_expect(PE_ROW_PROGRAM)?;
        Ok(())
    }

    /// Has the PE checksum `data.len()` words of flash at `addr` and
    /// compares against the host-side CRC.  Returns whether the contents
    /// match; under [`VerifyPolicy::Fatal`] a mismatch is an error
    /// instead.
    pub fn verify_data(&mut self, addr: u32, data: &[u32]) -> Result<bool> {
        word_aligned(addr)?;
        self.require_pe()?;
        let nbytes = data.len() as u32 * 4;
        self.adapter.send_command(ETAP_FASTDATA)?;
        // The PE checksums the range in place; its ready-wait is far too
        // short for large regions, so pace each parameter
        self.pe_send(pe_command(PE_GET_CRC, 0))?;
        self.adapter.delay_ms(100);
        self.pe_send(addr)?;
        self.adapter.delay_ms(100);
        self.pe_send(nbytes)?;
        self.adapter.delay_ms(100);
        self.pe_expect(PE_GET_CRC)?;
        let device = (self.adapter.pe_response()? & 0xFFFF) as u16;
        let host = crc16_words(data);
        if device == host {
            return Ok(true);
        }
        match self.config.verify {
            VerifyPolicy::Fatal => Err(Error::Verify { addr, device, host }),
            VerifyPolicy::Report => {
                warn!(
                    "checksum failed at {addr:#010x}: device {device:#06x}, host {host:#06x}"
                );
                Ok(false)
            }
        }
    }

    fn require_pe(&self) -> Result<()> {
        if self.pe_loaded {
            Ok(())
        } else {
            Err(Error::NoExecutive)
        }
    }

    /// Pushes one word into the PE through the fast-data register.
    pub(crate) fn pe_send(&mut self, word: u32) -> Result<()> {
        let fast = self.adapter.xfer_fast_data(word)?;
        if self.config.strict_pracc && !fast.pr_acc {
            return Err(Error::PrAcc);
        }
        Ok(())
    }

    /// Collects a PE response and checks that its high half echoes `op`.
    pub(crate) fn pe_expect(&mut self, op: u16) -> Result<u32> {
        let response = self.adapter.pe_response()?;
        if response >> 16 != op as u32 {
            return Err(Error::ExecutiveResponse {
                expected: (op as u32) << 16,
                got: response,
            });
        }
        Ok(response)
    }
}

fn word_aligned(addr: u32) -> Result<()> {
    if addr & 3 != 0 {
        return Err(Error::Unaligned(addr));
    }
    Ok(())
}

/// CRC-16 over bytes, XMODEM polynomial, nibble table, seed 0xFFFF.
/// Matches the checksum the PE computes for GET_CRC.
pub fn crc16(seed: u16, data: &[u8]) -> u16 {
    const TABLE: [u16; 16] = [
        0x0000, 0x1021, 0x2042, 0x3063, 0x4084, 0x50A5, 0x60C6, 0x70E7,
        0x8108, 0x9129, 0xA14A, 0xB16B, 0xC18C, 0xD1AD, 0xE1CE, 0xF1EF,
    ];
    let mut crc = seed;
    for &byte in data {
        crc = crc << 4 ^ TABLE[(crc >> 12 ^ byte as u16 >> 4) as usize & 0xF];
        crc = crc << 4 ^ TABLE[(crc >> 12 ^ byte as u16) as usize & 0xF];
    }
    crc
}

fn crc16_words(data: &[u32]) -> u16 {
    let mut crc = 0xFFFF;
    for word in data {
        crc = crc16(crc, &word.to_le_bytes());
    }
    crc
}
