//! The 64-byte transfer packet spoken over the HID transport.  Requests
//! are a tagged sum type with one variant per opcode, encoded explicitly
//! into the wire frame; responses are validated against the echoed opcode
//! in the final byte before any field is read.

use crate::error::{Error, Result};

/// Both directions use fixed 64-byte frames.
pub const FRAME_LEN: usize = 64;

/// Upper bound on words per multi-response request.
pub const MAX_PE_RESPONSES: usize = 15;

/// Reserved marker in any 32-bit response field signalling a firmware-side
/// failure.  Never valid data.
pub const FAILURE_SENTINEL: u32 = 0xDEAD_BEEF;

pub const OP_SELF_TEST: u8 = 0x10;
pub const OP_WIRE_MODE: u8 = 0x11;
pub const OP_SET_LEDS: u8 = 0x20;
pub const OP_SETUP_PORTS: u8 = 0x22;
pub const OP_DEVICE_ID: u8 = 0x78;
pub const OP_MCHP_STATUS: u8 = 0x7A;
pub const OP_READ_ADDRESS: u8 = 0x81;
pub const OP_EXIT_PGM: u8 = 0x82;
pub const OP_ENTER_PGM: u8 = 0x83;
pub const OP_XFER_DATA: u8 = 0x85;
pub const OP_SERIAL_EXEC: u8 = 0x86;
pub const OP_WAIT_READY: u8 = 0x87;
pub const OP_SET_MODE: u8 = 0x88;
pub const OP_SEND_COMMAND: u8 = 0x99;
pub const OP_XFER_FASTDATA: u8 = 0xA0;
pub const OP_PE_RESPONSES: u8 = 0xC0;
pub const OP_PE_RESPONSE: u8 = 0xCC;
pub const OP_XFER_INSTRUCTION: u8 = 0xDD;
pub const OP_SOFT_RESET: u8 = 0xFE;

/// One request frame.  Multi-byte fields are little-endian on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request<'a> {
    /// Echo test; `pattern` is at most 62 bytes.
    SelfTest { pattern: &'a [u8] },
    /// Query the wiring, or select it when `set` is given.
    WireMode { set: Option<u8> },
    SetLeds { mask: u8 },
    SetupPorts { enable: bool },
    DeviceId,
    MchpStatus,
    ReadAddress { addr: u32 },
    ExitPgmMode,
    EnterPgmMode,
    XferData { data: u32, bits: u8 },
    SerialExecution { flash_enable: bool },
    WaitReady { retries: u8 },
    SetMode { mode: u8, bits: u8 },
    SendCommand { value: u8, bits: u8 },
    XferFastData { data: u32 },
    PeResponses { count: u8 },
    PeResponse,
    XferInstruction { instruction: u32 },
    SoftReset,
}

impl Request<'_> {
    pub fn opcode(&self) -> u8 {
        match self {
            Request::SelfTest { .. } => OP_SELF_TEST,
            Request::WireMode { .. } => OP_WIRE_MODE,
            Request::SetLeds { .. } => OP_SET_LEDS,
            Request::SetupPorts { .. } => OP_SETUP_PORTS,
            Request::DeviceId => OP_DEVICE_ID,
            Request::MchpStatus => OP_MCHP_STATUS,
            Request::ReadAddress { .. } => OP_READ_ADDRESS,
            Request::ExitPgmMode => OP_EXIT_PGM,
            Request::EnterPgmMode => OP_ENTER_PGM,
            Request::XferData { .. } => OP_XFER_DATA,
            Request::SerialExecution { .. } => OP_SERIAL_EXEC,
            Request::WaitReady { .. } => OP_WAIT_READY,
            Request::SetMode { .. } => OP_SET_MODE,
            Request::SendCommand { .. } => OP_SEND_COMMAND,
            Request::XferFastData { .. } => OP_XFER_FASTDATA,
            Request::PeResponses { .. } => OP_PE_RESPONSES,
            Request::PeResponse => OP_PE_RESPONSE,
            Request::XferInstruction { .. } => OP_XFER_INSTRUCTION,
            Request::SoftReset => OP_SOFT_RESET,
        }
    }

    /// Whether the firmware sends a response frame back.  Pin-level
    /// commands and the reset are fire-and-forget.
    pub fn expects_reply(&self) -> bool {
        !matches!(
            self,
            Request::SetLeds { .. }
                | Request::SetupPorts { .. }
                | Request::ExitPgmMode
                | Request::EnterPgmMode
                | Request::SetMode { .. }
                | Request::SendCommand { .. }
                | Request::SoftReset
        )
    }

    pub fn encode(&self) -> [u8; FRAME_LEN] {
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = self.opcode();
        match *self {
            Request::SelfTest { pattern } => {
                // requests have no echo byte, the pattern may fill 1..64
                let n = pattern.len().min(FRAME_LEN - 1);
                frame[1..1 + n].copy_from_slice(&pattern[..n]);
            }
            Request::WireMode { set } => {
                if let Some(mode) = set {
                    frame[1] = 1;
                    frame[2] = mode;
                }
            }
            Request::SetLeds { mask } => frame[1] = mask,
            Request::SetupPorts { enable } => frame[1] = enable as u8,
            Request::ReadAddress { addr } => {
                frame[1..5].copy_from_slice(&addr.to_le_bytes());
            }
            Request::XferData { data, bits } => {
                frame[1..5].copy_from_slice(&data.to_le_bytes());
                frame[5] = bits;
            }
            Request::SerialExecution { flash_enable } => frame[1] = flash_enable as u8,
            Request::WaitReady { retries } => frame[1] = retries,
            Request::SetMode { mode, bits } => {
                frame[1] = mode;
                frame[2] = bits;
            }
            Request::SendCommand { value, bits } => {
                frame[1] = value;
                frame[2] = bits;
            }
            Request::XferFastData { data } => {
                frame[1..5].copy_from_slice(&data.to_le_bytes());
            }
            Request::PeResponses { count } => frame[1] = count,
            Request::XferInstruction { instruction } => {
                frame[1..5].copy_from_slice(&instruction.to_le_bytes());
            }
            Request::DeviceId
            | Request::MchpStatus
            | Request::ExitPgmMode
            | Request::EnterPgmMode
            | Request::PeResponse
            | Request::SoftReset => {}
        }
        frame
    }
}

/// A validated response frame.  Construction checks the echoed opcode in
/// byte 63; field accessors check the failure sentinel.
#[derive(Debug, Clone, Copy)]
pub struct Response {
    frame: [u8; FRAME_LEN],
}

impl Response {
    /// Validates the opcode echo against the request that was issued.
    pub fn parse(frame: [u8; FRAME_LEN], opcode: u8) -> Result<Self> {
        if frame[FRAME_LEN - 1] != opcode {
            return Err(Error::Echo {
                expected: opcode,
                got: frame[FRAME_LEN - 1],
            });
        }
        Ok(Self { frame })
    }

    /// Generic acceptance flag.  The firmware sets this for every known
    /// opcode; it does not carry the operation's outcome.
    pub fn status(&self) -> u8 {
        self.frame[0]
    }

    /// The operation result byte.  Opcodes that report an outcome
    /// (serial execution, ready-wait, instruction transfer) place it
    /// here, not in the acceptance flag.
    pub fn result(&self) -> u8 {
        self.frame[1]
    }

    pub fn byte(&self, offset: usize) -> u8 {
        self.frame[offset]
    }

    /// Little-endian word at `offset`, rejecting the failure sentinel.
    pub fn word(&self, offset: usize) -> Result<u32> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.frame[offset..offset + 4]);
        let word = u32::from_le_bytes(raw);
        if word == FAILURE_SENTINEL {
            return Err(Error::Sentinel);
        }
        Ok(word)
    }

    pub fn payload(&self) -> &[u8] {
        &self.frame[1..FRAME_LEN - 1]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xfer_data_layout() {
        let frame = Request::XferData { data: 0x1122_3344, bits: 9 }.encode();
        assert_eq!(frame[0], OP_XFER_DATA);
        assert_eq!(&frame[1..5], &[0x44, 0x33, 0x22, 0x11]);
        assert_eq!(frame[5], 9);
        assert!(frame[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn pin_level_requests_have_no_reply() {
        let silent = [
            Request::SetLeds { mask: 1 },
            Request::SetupPorts { enable: true },
            Request::ExitPgmMode,
            Request::EnterPgmMode,
            Request::SetMode { mode: 0x1F, bits: 6 },
            Request::SendCommand { value: 0x05, bits: 5 },
            Request::SoftReset,
        ];
        for request in silent {
            assert!(!request.expects_reply(), "{request:?}");
        }
        assert!(Request::DeviceId.expects_reply());
        assert!(Request::XferData { data: 0, bits: 8 }.expects_reply());
    }

    #[test]
    fn response_rejects_wrong_echo() {
        let mut frame = [0u8; FRAME_LEN];
        frame[FRAME_LEN - 1] = OP_MCHP_STATUS;
        let err = Response::parse(frame, OP_DEVICE_ID).unwrap_err();
        assert!(matches!(
            err,
            Error::Echo { expected: OP_DEVICE_ID, got: OP_MCHP_STATUS }
        ));
    }

    #[test]
    fn response_word_rejects_sentinel() {
        let mut frame = [0u8; FRAME_LEN];
        frame[FRAME_LEN - 1] = OP_READ_ADDRESS;
        frame[1..5].copy_from_slice(&FAILURE_SENTINEL.to_le_bytes());
        let response = Response::parse(frame, OP_READ_ADDRESS).unwrap();
        assert!(matches!(response.word(1), Err(Error::Sentinel)));
        frame[1..5].copy_from_slice(&0x1234_5678u32.to_le_bytes());
        let response = Response::parse(frame, OP_READ_ADDRESS).unwrap();
        assert_eq!(response.word(1).unwrap(), 0x1234_5678);
    }

    #[test]
    fn self_test_pattern_fills_the_whole_request() {
        let pattern = [0xAA; 100];
        let frame = Request::SelfTest { pattern: &pattern }.encode();
        assert_eq!(frame[0], OP_SELF_TEST);
        assert!(frame[1..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn result_byte_is_separate_from_the_acceptance_flag() {
        // Successful serial-execution entry: accepted, outcome 0x80
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = 1;
        frame[1] = 0x80;
        frame[FRAME_LEN - 1] = OP_SERIAL_EXEC;
        let response = Response::parse(frame, OP_SERIAL_EXEC).unwrap();
        assert_eq!(response.status(), 1);
        assert_eq!(response.result(), 0x80);

        // Instruction transfer against a stalled target: accepted, but
        // the target never became ready
        let mut frame = [0u8; FRAME_LEN];
        frame[0] = 1;
        frame[FRAME_LEN - 1] = OP_XFER_INSTRUCTION;
        let response = Response::parse(frame, OP_XFER_INSTRUCTION).unwrap();
        assert_eq!(response.status(), 1);
        assert_eq!(response.result(), 0);
    }
}
