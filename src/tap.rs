//! The TAP pseudo-operation engine: composes single clock cycles from a
//! [`Cable`] into the sequences the PIC32 flash programming specification
//! defines (SetMode, SendCommand, XferData, XferFastData, XferInstruction)
//! and the device status / mode-control operations built from them.
//!
//! The engine is stateless with respect to the TAP controller: every
//! pseudo-operation carries its fixed TMS prologue and epilogue and leaves
//! the TAP in Run-Test/Idle, so no state tracking or path search is needed.

use log::{debug, trace};

use crate::cable::{Cable, WireMode};
use crate::error::{Error, Result};
use crate::pic32::{
    self, MchpStatus, TapCommand, CONTROL_EXEC, CONTROL_PRACC, CONTROL_WAIT_PRACC,
    ETAP_CONTROL, ETAP_DATA, ETAP_EJTAGBOOT, ETAP_FASTDATA, MTAP_COMMAND, MTAP_SW_ETAP,
    MTAP_SW_MTAP, READY_RETRIES, TAP_RESET,
};
use crate::retry;

/// Result of a 32-bit fast-data transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastData {
    pub word: u32,
    /// Processor-access acknowledgment captured ahead of the data phase.
    /// Meaningful on the 2-wire path only; observed to always be set at
    /// the clock rates a bit-banged cable can reach.
    pub pr_acc: bool,
}

/// Pseudo-operation engine over a wired cable.
pub struct TapPort<C> {
    cable: C,
    in_pgm_mode: bool,
}

impl<C: Cable> TapPort<C> {
    pub fn new(cable: C) -> Self {
        Self { cable, in_pgm_mode: false }
    }

    pub fn wire_mode(&self) -> WireMode {
        self.cable.wire_mode()
    }

    pub fn cable_mut(&mut self) -> &mut C {
        &mut self.cable
    }

    pub fn into_cable(self) -> C {
        self.cable
    }

    /// Clocks `bits` bits of `mode` LSB-first on TMS with TDI held low,
    /// forcing the TAP controller into a known state.
    pub fn set_mode(&mut self, mode: u8, bits: u8) {
        trace!("SetMode({mode:#04x}, {bits})");
        let mut mode = mode;
        for _ in 0..bits {
            self.cable.clock_bit(mode & 1 == 1, false);
            mode >>= 1;
        }
    }

    /// Shifts a command into the instruction register: TMS header 1,1,0,0
    /// (Select-DR, Select-IR, Capture-IR, Shift-IR), the command bits
    /// LSB-first with TMS raised on the final bit, then TMS footer 1,0
    /// ending in Run-Test/Idle.
    pub fn send_command(&mut self, cmd: TapCommand) {
        trace!("SendCommand({:#04x}, {})", cmd.value, cmd.bits);
        self.cable.clock_bit(true, false); // Select-DR
        self.cable.clock_bit(true, false); // Select-IR
        self.cable.clock_bit(false, false); // Capture-IR
        self.cable.clock_bit(false, false); // Shift-IR
        let mut value = cmd.value;
        for i in 0..cmd.bits {
            let last = i == cmd.bits - 1;
            self.cable.clock_bit(last, value & 1 == 1);
            value >>= 1;
        }
        self.cable.clock_bit(true, false); // Update-IR
        self.cable.clock_bit(false, false); // Run-Test/Idle
    }

    /// Shifts `bits` bits of `data` through the data register while
    /// capturing the response, LSB-first.  In 2-wire mode one extra
    /// header clock aligns the capture, so the response stream leads the
    /// data stream by one bit position.
    pub fn xfer_data(&mut self, data: u32, bits: u8) -> u32 {
        self.cable.clock_bit(true, false); // Select-DR
        self.cable.clock_bit(false, false); // Capture-DR

        let mut response: u32 = 0;
        let mut offset = 0u8;
        match self.cable.wire_mode() {
            WireMode::Jtag => {
                self.cable.clock_bit(false, false); // Shift-DR
            }
            WireMode::Icsp => {
                if self.cable.clock_bit(false, false) {
                    response |= 1;
                }
                offset = 1;
            }
        }

        for i in 0..bits {
            let last = i == bits - 1;
            let tdo = self.cable.clock_bit(last, data >> i & 1 == 1);
            if tdo && offset < 32 {
                response |= 1 << offset;
            }
            offset = offset.saturating_add(1);
        }

        self.cable.clock_bit(true, false); // Update-DR
        self.cable.clock_bit(false, false); // Run-Test/Idle
        trace!("XferData({data:#010x}, {bits}) -> {response:#010x}");
        response
    }

    /// 32-bit data transfer with the extra leading PrAcc acknowledgment
    /// bit, used for bulk PE communication.
    pub fn xfer_fast_data(&mut self, data: u32) -> FastData {
        self.cable.clock_bit(true, false); // Select-DR
        self.cable.clock_bit(false, false); // Capture-DR

        let mut response: u32 = 0;
        let mut offset = 0u8;
        if let WireMode::Icsp = self.cable.wire_mode() {
            if self.cable.clock_bit(false, false) {
                response |= 1;
            }
            offset = 1;
        } else {
            self.cable.clock_bit(false, false);
        }

        let pr_acc = self.cable.clock_bit(false, false);

        for i in 0..32 {
            let last = i == 31;
            let tdo = self.cable.clock_bit(last, data >> i & 1 == 1);
            if tdo && offset < 32 {
                response |= 1 << offset;
            }
            offset = offset.saturating_add(1);
        }

        self.cable.clock_bit(true, false); // Update-DR
        self.cable.clock_bit(false, false); // Run-Test/Idle
        trace!("XferFastData({data:#010x}) -> {response:#010x} pracc={pr_acc}");
        FastData { word: response, pr_acc }
    }

    /// Polls the EJTAG control register until PrAcc reports the target is
    /// stalled waiting for the probe, within a bounded retry budget.
    pub fn wait_ready(&mut self, retries: usize) -> bool {
        self.send_command(ETAP_CONTROL);
        let outcome = retry::poll::<_>(retries, |_| {
            let control = self.xfer_data(CONTROL_WAIT_PRACC, 32);
            if control & CONTROL_PRACC != 0 {
                return Ok(true);
            }
            self.cable.delay_us(1);
            Ok(false)
        });
        matches!(outcome, Ok(Some(_)))
    }

    /// Feeds one instruction to the stalled target and resumes it for a
    /// single step.  Fails without sending anything if the target never
    /// becomes ready.
    pub fn xfer_instruction(&mut self, instruction: u32) -> Result<()> {
        if !self.wait_ready(READY_RETRIES) {
            return Err(Error::NotReady);
        }
        self.send_command(ETAP_DATA);
        self.xfer_data(instruction, 32);
        self.send_command(ETAP_CONTROL);
        self.xfer_data(CONTROL_EXEC, 32);
        Ok(())
    }

    /// Forces a TAP reset and reads the identification register, which is
    /// selected by default after reset.
    pub fn device_id(&mut self) -> u32 {
        self.set_mode(TAP_RESET.0, TAP_RESET.1);
        self.xfer_data(0, 32)
    }

    /// Reads the 8-bit MCHP_STATUS register through the memory TAP.
    pub fn mchp_status(&mut self) -> MchpStatus {
        if let WireMode::Jtag = self.cable.wire_mode() {
            self.cable.assert_reset(true);
        }
        self.set_mode(TAP_RESET.0, TAP_RESET.1);
        self.send_command(MTAP_SW_MTAP);
        self.set_mode(TAP_RESET.0, TAP_RESET.1);
        self.send_command(MTAP_COMMAND);
        let status = self.xfer_data(pic32::MCHP_STATUS as u32, 8) as u8;
        MchpStatus::from_bits_truncate(status)
    }

    /// Puts the target into programming mode.  4-wire: EJTAGBOOT while
    /// held in reset.  2-wire: the MCHP entry signature clocked into the
    /// data line around a reset pulse.
    pub fn enter_pgm_mode(&mut self) {
        debug!("entering programming mode ({:?})", self.cable.wire_mode());
        match self.cable.wire_mode() {
            WireMode::Jtag => {
                self.cable.assert_reset(true);
                self.send_command(MTAP_SW_ETAP);
                self.send_command(ETAP_EJTAGBOOT);
                self.cable.assert_reset(false);
            }
            WireMode::Icsp => {
                self.cable.assert_reset(true);
                self.cable.assert_reset(false);
                self.cable.delay_us(1);
                self.cable.assert_reset(true);
                self.cable.write_bits(&pic32::ICSP_SIGNATURE);
                self.cable.delay_us(5);
                self.cable.assert_reset(false);
                self.cable.delay_us(5);
                self.set_mode(TAP_RESET.0, TAP_RESET.1);
            }
        }
        self.cable.set_led(true);
        self.in_pgm_mode = true;
    }

    /// Releases programming mode and parks the target in reset.
    pub fn exit_pgm_mode(&mut self) {
        debug!("exiting programming mode");
        self.set_mode(pic32::TAP_RESET_SHORT.0, pic32::TAP_RESET_SHORT.1);
        self.cable.assert_reset(true);
        self.cable.set_led(false);
        self.in_pgm_mode = false;
    }

    /// Switches the target into serial execution mode.  Returns the CPS
    /// sentinel (0x80) on success, or the raw status when the
    /// code-protection bit is clear and the sequence was not run.
    pub fn serial_execution(&mut self, flash_enable: bool) -> u8 {
        if !self.in_pgm_mode {
            self.enter_pgm_mode();
        }
        let status = self.mchp_status();
        if !status.contains(MchpStatus::CPS) {
            return status.bits();
        }
        match self.cable.wire_mode() {
            WireMode::Icsp => {
                self.xfer_data(pic32::MCHP_ASSERT_RST as u32, 8);
                self.send_command(MTAP_SW_ETAP);
                self.send_command(ETAP_EJTAGBOOT);
                self.send_command(MTAP_SW_MTAP);
                self.send_command(MTAP_COMMAND);
                self.xfer_data(pic32::MCHP_DEASSERT_RST as u32, 8);
                if flash_enable {
                    self.xfer_data(pic32::MCHP_FLASH_ENABLE as u32, 8);
                }
                self.send_command(MTAP_SW_ETAP);
            }
            WireMode::Jtag => {
                self.send_command(MTAP_SW_ETAP);
                self.set_mode(TAP_RESET.0, TAP_RESET.1);
                self.send_command(ETAP_EJTAGBOOT);
                self.cable.assert_reset(false);
            }
        }
        MchpStatus::CPS.bits()
    }

    /// Reads one word of target memory by injecting a load/store sequence
    /// that routes the value through the fast-data register.
    pub fn read_from_address(&mut self, addr: u32) -> Result<u32> {
        let addr_hi = addr >> 16;
        let addr_lo = addr & 0xFFFF;
        self.xfer_instruction(0x3c13_ff20)?; // lui s3, 0xff20
        self.xfer_instruction(0x3c08_0000 | addr_hi)?; // lui t0, addr_hi
        self.xfer_instruction(0x3508_0000 | addr_lo)?; // ori t0, addr_lo
        self.xfer_instruction(0x8d09_0000)?; // lw  t1, 0(t0)
        self.xfer_instruction(0xae69_0000)?; // sw  t1, 0(s3)
        self.xfer_instruction(0)?; // nop
        self.send_command(ETAP_FASTDATA);
        Ok(self.xfer_fast_data(0).word)
    }

    /// Collects one PE response word from the data register and resumes
    /// the executive for the next command.
    pub fn pe_response(&mut self) -> u32 {
        self.wait_ready(READY_RETRIES);
        self.send_command(ETAP_DATA);
        let response = self.xfer_data(0, 32);
        self.send_command(ETAP_CONTROL);
        self.xfer_data(CONTROL_EXEC, 32);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    /// The 16 standard JTAG controller states.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TapState {
        TestLogicReset,
        RunTestIdle,
        SelectDr,
        CaptureDr,
        ShiftDr,
        Exit1Dr,
        PauseDr,
        Exit2Dr,
        UpdateDr,
        SelectIr,
        CaptureIr,
        ShiftIr,
        Exit1Ir,
        PauseIr,
        Exit2Ir,
        UpdateIr,
    }

    /// Behavioral model of a single TAP: state machine plus IR/DR shift
    /// registers, with IDCODE captured into the DR.
    struct TapModel {
        state: TapState,
        idcode: u32,
        ir: u8,
        ir_shift: u8,
        dr: u64,
    }

    impl TapModel {
        fn new(idcode: u32) -> Self {
            Self {
                state: TapState::TestLogicReset,
                idcode,
                ir: 0x01,
                ir_shift: 0,
                dr: 0,
            }
        }

        fn next(state: TapState, tms: bool) -> TapState {
            use TapState::*;
            match (state, tms) {
                (TestLogicReset, true) => TestLogicReset,
                (TestLogicReset, false) => RunTestIdle,
                (RunTestIdle, true) => SelectDr,
                (RunTestIdle, false) => RunTestIdle,
                (SelectDr, true) => SelectIr,
                (SelectDr, false) => CaptureDr,
                (CaptureDr, true) => Exit1Dr,
                (CaptureDr, false) => ShiftDr,
                (ShiftDr, true) => Exit1Dr,
                (ShiftDr, false) => ShiftDr,
                (Exit1Dr, true) => UpdateDr,
                (Exit1Dr, false) => PauseDr,
                (PauseDr, true) => Exit2Dr,
                (PauseDr, false) => PauseDr,
                (Exit2Dr, true) => UpdateDr,
                (Exit2Dr, false) => ShiftDr,
                (UpdateDr, true) => SelectDr,
                (UpdateDr, false) => RunTestIdle,
                (SelectIr, true) => TestLogicReset,
                (SelectIr, false) => CaptureIr,
                (CaptureIr, true) => Exit1Ir,
                (CaptureIr, false) => ShiftIr,
                (ShiftIr, true) => Exit1Ir,
                (ShiftIr, false) => ShiftIr,
                (Exit1Ir, true) => UpdateIr,
                (Exit1Ir, false) => PauseIr,
                (PauseIr, true) => Exit2Ir,
                (PauseIr, false) => PauseIr,
                (Exit2Ir, true) => UpdateIr,
                (Exit2Ir, false) => ShiftIr,
                (UpdateIr, true) => SelectIr,
                (UpdateIr, false) => RunTestIdle,
            }
        }

        fn clock(&mut self, tms: bool, tdi: bool) -> bool {
            let out = match self.state {
                TapState::ShiftDr => self.dr & 1 == 1,
                TapState::ShiftIr => self.ir_shift & 1 == 1,
                _ => false,
            };
            match self.state {
                TapState::TestLogicReset => self.ir = 0x01, // IDCODE
                TapState::CaptureDr => self.dr = self.idcode as u64,
                TapState::ShiftDr => {
                    self.dr = self.dr >> 1 | (tdi as u64) << 31;
                }
                TapState::CaptureIr => self.ir_shift = 0x01,
                TapState::ShiftIr => {
                    self.ir_shift = self.ir_shift >> 1 | (tdi as u8) << 4;
                }
                _ => {}
            }
            let next = Self::next(self.state, tms);
            if next == TapState::UpdateIr {
                self.ir = self.ir_shift & 0x1F;
            }
            self.state = next;
            out
        }
    }

    /// Cable backed by the TAP model.  `echo` short-circuits TDO to TDI
    /// for loopback tests while still advancing the model.
    struct SimCable {
        model: TapModel,
        mode: WireMode,
        echo: bool,
        pulses: usize,
        delays_us: u32,
        resets: Vec<bool>,
        signature: Vec<u8>,
    }

    impl SimCable {
        fn new(mode: WireMode, idcode: u32) -> Self {
            Self {
                model: TapModel::new(idcode),
                mode,
                echo: false,
                pulses: 0,
                delays_us: 0,
                resets: Vec::new(),
                signature: Vec::new(),
            }
        }

        fn echo(mode: WireMode) -> Self {
            let mut cable = Self::new(mode, 0);
            cable.echo = true;
            cable
        }
    }

    impl Cable for SimCable {
        fn wire_mode(&self) -> WireMode {
            self.mode
        }

        fn clock_bit(&mut self, tms: bool, tdi: bool) -> bool {
            self.pulses += match self.mode {
                WireMode::Jtag => 1,
                WireMode::Icsp => 4,
            };
            let out = self.model.clock(tms, tdi);
            if self.echo {
                tdi
            } else {
                out
            }
        }

        fn assert_reset(&mut self, assert: bool) {
            self.resets.push(assert);
        }

        fn write_bits(&mut self, data: &[u8]) {
            self.signature.extend_from_slice(data);
        }

        fn delay_us(&mut self, us: u32) {
            self.delays_us += us;
        }

        fn setup_ports(&mut self, _enable: bool) {}
    }

    #[test]
    fn set_mode_reset_ends_in_run_test_idle() {
        let mut tap = TapPort::new(SimCable::new(WireMode::Jtag, 0));
        // Knock the model into an arbitrary state first
        tap.cable.model.clock(true, false);
        tap.cable.model.clock(false, false);
        tap.cable.model.clock(false, false);
        tap.set_mode(TAP_RESET.0, TAP_RESET.1);
        assert_eq!(tap.cable.model.state, TapState::RunTestIdle);
    }

    #[test]
    fn send_command_latches_ir_and_idles() {
        let mut tap = TapPort::new(SimCable::new(WireMode::Jtag, 0));
        tap.set_mode(TAP_RESET.0, TAP_RESET.1);
        tap.send_command(MTAP_SW_ETAP);
        assert_eq!(tap.cable.model.ir, 0x05);
        assert_eq!(tap.cable.model.state, TapState::RunTestIdle);
    }

    #[test]
    fn any_command_then_reset_returns_to_idle() {
        for value in 0..0x20u8 {
            let mut tap = TapPort::new(SimCable::new(WireMode::Jtag, 0));
            tap.set_mode(TAP_RESET.0, TAP_RESET.1);
            tap.send_command(TapCommand::new(value, 5));
            assert_eq!(tap.cable.model.state, TapState::RunTestIdle);
            tap.set_mode(TAP_RESET.0, TAP_RESET.1);
            assert_eq!(tap.cable.model.state, TapState::RunTestIdle);
        }
    }

    #[test]
    fn xfer_data_loopback_reproduces_data() {
        for bits in [1u8, 8, 9, 32] {
            let mut tap = TapPort::new(SimCable::echo(WireMode::Jtag));
            tap.set_mode(TAP_RESET.0, TAP_RESET.1);
            let data = 0xA5F0_3C69u32;
            let mask = if bits == 32 { u32::MAX } else { (1 << bits) - 1 };
            let response = tap.xfer_data(data, bits);
            assert_eq!(response, data & mask, "nBits = {bits}");
        }
    }

    #[test]
    fn device_id_reads_idcode_after_reset() {
        let mut tap = TapPort::new(SimCable::new(WireMode::Jtag, 0x04A0_0053));
        assert_eq!(tap.device_id(), 0x04A0_0053);
    }

    #[test]
    fn mchp_status_reads_low_byte() {
        // The model captures its IDCODE into every DR read; give it one
        // whose low byte looks like CPS|CFGRDY.
        let mut tap = TapPort::new(SimCable::new(WireMode::Jtag, 0x88));
        let status = tap.mchp_status();
        assert_eq!(status, MchpStatus::CPS | MchpStatus::CFGRDY);
    }

    #[test]
    fn jtag_clocks_once_per_bit_icsp_four_times() {
        let mut jtag = TapPort::new(SimCable::echo(WireMode::Jtag));
        jtag.cable.clock_bit(false, true);
        assert_eq!(jtag.cable.pulses, 1);

        let mut icsp = TapPort::new(SimCable::echo(WireMode::Icsp));
        icsp.cable.clock_bit(false, true);
        assert_eq!(icsp.cable.pulses, 4);
    }

    #[test]
    fn icsp_xfer_data_response_leads_by_one_bit() {
        let mut tap = TapPort::new(SimCable::echo(WireMode::Icsp));
        // With TDO wired to TDI the alignment clock contributes a zero at
        // bit 0 and the data occupies bits 1..,
        let response = tap.xfer_data(0xFF, 8);
        assert_eq!(response, 0xFF << 1);
    }

    #[test]
    fn icsp_entry_clocks_signature() {
        let mut tap = TapPort::new(SimCable::new(WireMode::Icsp, 0));
        tap.enter_pgm_mode();
        assert_eq!(tap.cable.signature, pic32::ICSP_SIGNATURE);
        // reset pulsed: low, high, low (signature), high
        assert_eq!(tap.cable.resets, [true, false, true, false]);
        assert!(tap.in_pgm_mode);
    }

    #[test]
    fn xfer_instruction_fails_when_never_ready() {
        // Model DR capture yields the IDCODE; pick one with PrAcc clear.
        let mut tap = TapPort::new(SimCable::new(WireMode::Jtag, 0));
        let result = tap.xfer_instruction(0x3c08_0000);
        assert!(matches!(result, Err(Error::NotReady)));
        // one microsecond pacing per failed attempt
        assert_eq!(tap.cable.delays_us, READY_RETRIES as u32);
    }

    #[test]
    fn xfer_instruction_sends_when_ready() {
        // Echo cable reflects the wait word, whose PrAcc bit is set.
        let mut tap = TapPort::new(SimCable::echo(WireMode::Jtag));
        tap.set_mode(TAP_RESET.0, TAP_RESET.1);
        tap.xfer_instruction(0x0000_0000).expect("target ready");
        assert_eq!(tap.cable.model.state, TapState::RunTestIdle);
    }
}
