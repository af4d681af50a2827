//! Programming Executive bootstrap: injects a small loader into target
//! RAM through instruction transfers, streams the PE image through the
//! fast-data register, and verifies the version handshake before any
//! PE-mediated flash operation is allowed.

use log::{debug, info};

use crate::adapter::Adapter;
use crate::error::{Error, Result};
use crate::pic32::{
    pe_command, ETAP_FASTDATA, PE_EXEC_VERSION, PE_IMAGE_ADDR, PE_JUMP, PE_LOADER,
    PE_LOADER_ADDR, PE_READY,
};
use crate::session::{DeviceFamily, Session};

/// Bus-matrix setup run before the loader.  Boot configuration on the
/// older families partitions RAM so that nothing is executable; this
/// opens the whole of it up.  MZ parts configure this differently and
/// skip it.
const BUS_MATRIX_INIT: [u32; 10] = [
    0x3c04_bf88, // lui a0, 0xbf88
    0x3484_2000, // ori a0, 0x2000       a0 = &BMXCON
    0x3c05_001f, // lui a1, 0x1f
    0x34a5_0040, // ori a1, 0x40
    0xac85_0000, // sw  a1, 0(a0)        BMXCON = 0x1f0040
    0x3405_0800, // ori a1, zero, 0x800
    0xac85_0010, // sw  a1, 16(a0)       BMXDKPBA = 0x800
    0x8c85_0040, // lw  a1, 64(a0)
    0xac85_0020, // sw  a1, 32(a0)       BMXDUDBA = BMXDRMSZ
    0xac85_0030, // sw  a1, 48(a0)       BMXDUPBA = BMXDRMSZ
];

impl<A: Adapter> Session<A> {
    /// Downloads the Programming Executive image and hands control to it.
    ///
    /// Enters serial execution if the session has not already, then:
    /// prepares RAM, stores the loader at its fixed address word by word,
    /// jumps to it, streams the image address, length and contents through
    /// the fast-data register, triggers the jump into the image, and
    /// finally exchanges the version handshake.  Only a successful
    /// handshake marks the PE as usable.
    pub fn load_executive(&mut self, pe: &[u32], version: u16) -> Result<()> {
        self.serial_execution()?;
        info!("loading programming executive, {} words", pe.len());

        if self.config.family != DeviceFamily::Mz {
            for word in BUS_MATRIX_INIT {
                self.adapter.xfer_instruction(word)?;
            }
        }

        // a0 walks the loader's RAM area; each 32-bit loader word is
        // materialized in a2 and stored
        self.adapter.xfer_instruction(0x3c04_0000 | PE_LOADER_ADDR >> 16)?;
        self.adapter.xfer_instruction(0x3484_0000 | PE_LOADER_ADDR & 0xFFFF)?;
        for pair in PE_LOADER.chunks(2) {
            self.adapter.xfer_instruction(0x3c06_0000 | pair[0] as u32)?;
            self.adapter.xfer_instruction(0x34c6_0000 | pair[1] as u32)?;
            self.adapter.xfer_instruction(0xac86_0000)?; // sw a2, 0(a0)
            self.adapter.xfer_instruction(0x2484_0004)?; // addiu a0, 4
        }

        // Jump to the loader through t9
        self.adapter.xfer_instruction(0x3c19_0000 | PE_LOADER_ADDR >> 16)?;
        self.adapter.xfer_instruction(0x3739_0000 | PE_LOADER_ADDR & 0xFFFF)?;
        self.adapter.xfer_instruction(0x0320_0008)?; // jr t9
        self.adapter.xfer_instruction(0)?;

        // The loader polls the fast-data register: destination, word
        // count, the image itself, then the jump trigger and the ready
        // sentinel that make it transfer control
        self.adapter.send_command(ETAP_FASTDATA)?;
        self.pe_send(PE_IMAGE_ADDR)?;
        self.pe_send(pe.len() as u32)?;
        for &word in pe {
            self.pe_send(word)?;
        }
        self.pe_send(PE_JUMP)?;
        self.pe_send(PE_READY)?;

        // Give the PE time to initialize before talking to it
        self.adapter.delay_ms(100);

        self.pe_send(pe_command(PE_EXEC_VERSION, 0))?;
        let response = self.pe_expect(PE_EXEC_VERSION)?;
        let got = (response & 0xFFFF) as u16;
        if got != version {
            return Err(Error::ExecutiveVersion { expected: version, got });
        }
        debug!("executive version {got:#06x}");
        self.pe_loaded = true;
        Ok(())
    }
}
