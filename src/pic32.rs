//! Protocol constants for the PIC32 flash programming specification:
//! TAP instruction-register commands, MCHP status/command bytes, EJTAG
//! control bits, Programming Executive opcodes and the PE loader program.

use bitflags::bitflags;

/// An instruction-register payload: an opaque (value, bit-width) pair
/// shifted into the TAP with `SendCommand`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapCommand {
    pub value: u8,
    pub bits: u8,
}

impl TapCommand {
    pub const fn new(value: u8, bits: u8) -> Self {
        Self { value, bits }
    }
}

pub const MTAP_IDCODE: TapCommand = TapCommand::new(0x01, 5);
pub const MTAP_SW_MTAP: TapCommand = TapCommand::new(0x04, 5);
pub const MTAP_SW_ETAP: TapCommand = TapCommand::new(0x05, 5);
pub const MTAP_COMMAND: TapCommand = TapCommand::new(0x07, 5);

pub const ETAP_ADDRESS: TapCommand = TapCommand::new(0x08, 5);
pub const ETAP_DATA: TapCommand = TapCommand::new(0x09, 5);
pub const ETAP_CONTROL: TapCommand = TapCommand::new(0x0A, 5);
pub const ETAP_EJTAGBOOT: TapCommand = TapCommand::new(0x0C, 5);
pub const ETAP_FASTDATA: TapCommand = TapCommand::new(0x0E, 5);

/// `SetMode` sequence forcing Test-Logic-Reset then Run-Test/Idle.
pub const TAP_RESET: (u8, u8) = (0x1F, 6);
/// Short reset used when leaving programming mode: Test-Logic-Reset only.
pub const TAP_RESET_SHORT: (u8, u8) = (0x1F, 5);

/// DR payloads for `MTAP_COMMAND`, all 8 bits wide.
pub const MCHP_STATUS: u8 = 0x00;
pub const MCHP_ASSERT_RST: u8 = 0xD1;
pub const MCHP_DEASSERT_RST: u8 = 0xD0;
pub const MCHP_ERASE: u8 = 0xFC;
pub const MCHP_FLASH_DISABLE: u8 = 0xFD;
pub const MCHP_FLASH_ENABLE: u8 = 0xFE;
pub const MCHP_READ_CONFIG: u8 = 0xFF;

bitflags! {
    /// The 8-bit MCHP_STATUS register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MchpStatus: u8 {
        /// Code-protect state; set means the device is *not* protected.
        const CPS = 0x80;
        /// NVM controller error.
        const NVMERR = 0x20;
        /// Configuration has been read and is ready.
        const CFGRDY = 0x08;
        /// Flash controller busy.
        const FCBUSY = 0x04;
        /// Flash access enabled.
        const FAEN = 0x02;
        /// Device reset is active.
        const DEVRST = 0x01;
    }
}

/// EJTAG control register bits used by the instruction-transfer protocol.
pub const CONTROL_PRACC: u32 = 1 << 18;
pub const CONTROL_PROBEN: u32 = 1 << 15;
pub const CONTROL_PROBTRAP: u32 = 1 << 14;

/// Control word written after each injected instruction: execute it, then
/// stall for the next probe access.
pub const CONTROL_EXEC: u32 = CONTROL_PROBEN | CONTROL_PROBTRAP;
/// Control word clocked while polling for target-ready.
pub const CONTROL_WAIT_PRACC: u32 = CONTROL_PRACC | CONTROL_PROBEN | CONTROL_PROBTRAP;

/// Iteration budget for the ETAP ready-wait, roughly 1 us apart.
pub const READY_RETRIES: usize = 150;
/// Poll budget for the post-erase busy-wait, 10 ms apart.
pub const ERASE_RETRIES: usize = 100;
pub const ERASE_POLL_MS: u32 = 10;

/// Low 12 bits of IDCODE for any Microchip part.
pub const IDCODE_VENDOR_MASK: u32 = 0xFFF;
pub const IDCODE_VENDOR_MCHP: u32 = 0x053;

/// Bytes clocked into the reset line, LSB first, to unlock 2-wire
/// programming mode ("MCHP" with reversed bit order).
pub const ICSP_SIGNATURE: [u8; 4] = [0xB2, 0xC2, 0x12, 0x0A];

/// Programming Executive command opcodes (high half of the command word).
pub const PE_ROW_PROGRAM: u16 = 0x0;
pub const PE_READ: u16 = 0x1;
pub const PE_PROGRAM: u16 = 0x2;
pub const PE_WORD_PROGRAM: u16 = 0x3;
pub const PE_CHIP_ERASE: u16 = 0x4;
pub const PE_PAGE_ERASE: u16 = 0x5;
pub const PE_BLANK_CHECK: u16 = 0x6;
pub const PE_EXEC_VERSION: u16 = 0x7;
pub const PE_GET_CRC: u16 = 0x8;
pub const PE_PROGRAM_CLUSTER: u16 = 0x9;
pub const PE_GET_DEVICEID: u16 = 0xA;
pub const PE_CHANGE_CFG: u16 = 0xB;

/// Builds a PE command word: opcode in the high half, parameter in the low.
pub const fn pe_command(op: u16, param: u16) -> u32 {
    (op as u32) << 16 | param as u32
}

/// Words read back per PE_READ command.
pub const PE_READ_BATCH: usize = 32;

/// RAM address the loader program is injected at.
pub const PE_LOADER_ADDR: u32 = 0xA000_0800;
/// RAM address the loader copies the PE image to.
pub const PE_IMAGE_ADDR: u32 = 0xA000_0900;
/// Trigger word that makes the loader jump to the downloaded PE.
pub const PE_JUMP: u32 = 0x0000_0000;
/// Sentinel the loader waits for before transferring control.
pub const PE_READY: u32 = 0xDEAD_0000;

/// The PE loader program as (high, low) immediate halves.  Each pair is
/// materialized in a target register with lui/ori and stored to RAM at
/// `PE_LOADER_ADDR`.  The loader polls the fast-data register for the PE
/// address and word count, copies the image, then waits for `PE_READY`
/// and jumps to `PE_IMAGE_ADDR`.
pub const PE_LOADER: [u16; 42] = [
    0x3c07, 0xdead, // lui a3, 0xdead
    0x3c06, 0xff20, // lui a2, 0xff20
    0x3c05, 0xff20, // lui a1, 0xff20
    // label1:
    0x8cc4, 0x0000, // lw  a0, 0(a2)
    0x8cc3, 0x0000, // lw  v1, 0(a2)
    0x1067, 0x000b, // beq v1, a3, label2
    0x0000, 0x0000, // nop
    0x1060, 0xfffb, // beqz v1, label1
    0x0000, 0x0000, // nop
    0x8ca2, 0x0000, // lw  v0, 0(a1)
    0x2463, 0xffff, // addiu v1, -1
    0xac82, 0x0000, // sw  v0, 0(a0)
    0x2484, 0x0004, // addiu a0, 4
    0x1460, 0xfffb, // bnez v1, label1
    0x0000, 0x0000, // nop
    0x1000, 0xfff3, // b label1
    0x0000, 0x0000, // nop
    // label2:
    0x3c02, 0xa000, // lui v0, 0xa000
    0x3442, 0x0900, // ori v0, 0x900
    0x0040, 0x0008, // jr  v0
    0x0000, 0x0000, // nop
];
