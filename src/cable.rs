//! Physical connections to the target's debug port.  Hardware backends
//! implement the `Cable` trait; the pseudo-operation engine in
//! [`crate::tap`] is written against it.

pub mod gpio;

/// How the target is wired up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireMode {
    /// 4-wire JTAG: TCK, TMS, TDI, TDO plus MCLR.
    Jtag,
    /// 2-wire ICSP: PGC, PGD (bidirectional) plus MCLR.  Each TAP bit
    /// costs four clock pulses instead of one.
    Icsp,
}

impl WireMode {
    /// Wire-mode byte used on the adapter transport.
    pub const fn to_wire(self) -> u8 {
        match self {
            WireMode::Jtag => 2,
            WireMode::Icsp => 1,
        }
    }

    pub const fn from_wire(raw: u8) -> Option<Self> {
        match raw {
            2 => Some(WireMode::Jtag),
            1 => Some(WireMode::Icsp),
            _ => None,
        }
    }
}

/// One wired connection to the target.
///
/// All operations are infallible at this level: a cable is pin wiggling
/// with no acknowledgment path.  Transport errors only exist on the
/// packetized adapter path (see [`crate::adapter`]).
pub trait Cable {
    /// The wiring this cable realizes.  Fixed for the cable's lifetime.
    fn wire_mode(&self) -> WireMode;

    /// Run one TAP clock cycle with the given TMS/TDI values and return
    /// the sampled TDO bit.
    ///
    /// 4-wire: drive TDI and TMS, pulse TCK, sample TDO while TCK is
    /// high.  2-wire: clock TDI on one PGC pulse, TMS on a second, then
    /// two more pulses of which the second carries the response bit (the
    /// first is a discarded dummy read).
    fn clock_bit(&mut self, tms: bool, tdi: bool) -> bool;

    /// Drive the MCLR line; `true` holds the target in reset.
    fn assert_reset(&mut self, assert: bool);

    /// Clock raw bytes LSB-first out on the data line with no TMS
    /// choreography.  Used for the 2-wire programming-mode entry
    /// signature; a no-op on 4-wire cables.
    fn write_bits(&mut self, data: &[u8]);

    fn delay_us(&mut self, us: u32);

    /// Claim or release the I/O pins.  Released pins must float so the
    /// target can run normally.
    fn setup_ports(&mut self, enable: bool);

    /// Busy/status indicator, if the hardware has one.
    fn set_led(&mut self, _on: bool) {}
}
