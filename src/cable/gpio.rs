//! Bit-banged cables over `embedded-hal` pins, for hosts or bridge MCUs
//! with the debug port wired straight to GPIOs.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin, PinState};

use crate::cable::{Cable, WireMode};

/// 4-wire JTAG cable: TCK, TMS, TDI outputs, TDO input, MCLR output.
pub struct Jtag<Tck, Tms, Tdi, Tdo, Mclr, Delay> {
    half_period: u32,
    tck: Tck,
    tms: Tms,
    tdi: Tdi,
    tdo: Tdo,
    mclr: Mclr,
    delay: Delay,
}

impl<Tck, Tms, Tdi, Tdo, Mclr, Delay> Jtag<Tck, Tms, Tdi, Tdo, Mclr, Delay>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Mclr: OutputPin,
    Delay: DelayNs,
{
    /// Rates below 1 kHz are clamped to 1 kHz.
    pub fn new(freq_khz: u32, tck: Tck, tms: Tms, tdi: Tdi, tdo: Tdo, mclr: Mclr, delay: Delay) -> Self {
        let period_ns = 1_000_000 / freq_khz.max(1);
        let half_period = period_ns / 2;
        Self { half_period, tck, tms, tdi, tdo, mclr, delay }
    }
}

impl<Tck, Tms, Tdi, Tdo, Mclr, Delay> Cable for Jtag<Tck, Tms, Tdi, Tdo, Mclr, Delay>
where
    Tck: OutputPin,
    Tms: OutputPin,
    Tdi: OutputPin,
    Tdo: InputPin,
    Mclr: OutputPin,
    Delay: DelayNs,
{
    fn wire_mode(&self) -> WireMode {
        WireMode::Jtag
    }

    fn clock_bit(&mut self, tms: bool, tdi: bool) -> bool {
        self.tdi.set_state(PinState::from(tdi)).unwrap();
        self.tms.set_state(PinState::from(tms)).unwrap();
        self.tck.set_high().unwrap();
        // TDO is stable once TCK has risen
        let tdo = self.tdo.is_high().unwrap();
        self.delay.delay_ns(self.half_period);
        self.tck.set_low().unwrap();
        self.delay.delay_ns(self.half_period);
        tdo
    }

    fn assert_reset(&mut self, assert: bool) {
        // MCLR is active low
        self.mclr.set_state(PinState::from(!assert)).unwrap();
    }

    fn write_bits(&mut self, _data: &[u8]) {}

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    fn setup_ports(&mut self, enable: bool) {
        self.tck.set_low().unwrap();
        self.tms.set_low().unwrap();
        self.tdi.set_low().unwrap();
        if !enable {
            self.mclr.set_high().unwrap();
        }
    }
}

/// 2-wire ICSP cable: PGC output plus a PGD pair for boards that split
/// the bidirectional data line into drive and sense halves, and MCLR.
pub struct Icsp<Pgc, PgdOut, PgdIn, Mclr, Delay> {
    half_period: u32,
    pgc: Pgc,
    pgd_out: PgdOut,
    pgd_in: PgdIn,
    mclr: Mclr,
    delay: Delay,
}

impl<Pgc, PgdOut, PgdIn, Mclr, Delay> Icsp<Pgc, PgdOut, PgdIn, Mclr, Delay>
where
    Pgc: OutputPin,
    PgdOut: OutputPin,
    PgdIn: InputPin,
    Mclr: OutputPin,
    Delay: DelayNs,
{
    /// Rates below 1 kHz are clamped to 1 kHz.
    pub fn new(freq_khz: u32, pgc: Pgc, pgd_out: PgdOut, pgd_in: PgdIn, mclr: Mclr, delay: Delay) -> Self {
        let period_ns = 1_000_000 / freq_khz.max(1);
        let half_period = period_ns / 2;
        Self { half_period, pgc, pgd_out, pgd_in, mclr, delay }
    }

    fn pulse(&mut self) {
        self.pgc.set_high().unwrap();
        self.delay.delay_ns(self.half_period);
        self.pgc.set_low().unwrap();
        self.delay.delay_ns(self.half_period);
    }
}

impl<Pgc, PgdOut, PgdIn, Mclr, Delay> Cable for Icsp<Pgc, PgdOut, PgdIn, Mclr, Delay>
where
    Pgc: OutputPin,
    PgdOut: OutputPin,
    PgdIn: InputPin,
    Mclr: OutputPin,
    Delay: DelayNs,
{
    fn wire_mode(&self) -> WireMode {
        WireMode::Icsp
    }

    fn clock_bit(&mut self, tms: bool, tdi: bool) -> bool {
        // Phase 1: TDI
        self.pgd_out.set_state(PinState::from(tdi)).unwrap();
        self.pulse();
        // Phase 2: TMS
        self.pgd_out.set_state(PinState::from(tms)).unwrap();
        self.pulse();
        // Release the data line so the target can drive it
        self.pgd_out.set_low().unwrap();
        // Phase 3: dummy read
        self.pulse();
        // Phase 4: the response bit, sampled while PGC is high
        self.pgc.set_high().unwrap();
        let tdo = self.pgd_in.is_high().unwrap();
        self.delay.delay_ns(self.half_period);
        self.pgc.set_low().unwrap();
        self.delay.delay_ns(self.half_period);
        tdo
    }

    fn assert_reset(&mut self, assert: bool) {
        self.mclr.set_state(PinState::from(!assert)).unwrap();
    }

    fn write_bits(&mut self, data: &[u8]) {
        for byte in data {
            for bit in 0..8 {
                let state = PinState::from(byte >> bit & 1 == 1);
                self.pgd_out.set_state(state).unwrap();
                self.pulse();
            }
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }

    fn setup_ports(&mut self, enable: bool) {
        self.pgc.set_low().unwrap();
        self.pgd_out.set_low().unwrap();
        if !enable {
            self.mclr.set_high().unwrap();
        }
    }
}
