use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, TryRecvError};
use std::thread;

use tracing::{debug, warn};

use crate::error::{BindingError, LoadError};
use crate::memory::{LinearMemory, Views, FONT_ADDR, FONT_SIZE, MEMORY_SIZE, PROGRAM_ADDR};

/// space left for a program once the interpreter area is reserved
pub const PROGRAM_CAPACITY: usize = MEMORY_SIZE - PROGRAM_ADDR;

/// copy the core's glyphs into the bottom of RAM
pub fn copy_font(buffer: &mut LinearMemory, views: &Views) -> Result<(), BindingError> {
    let glyphs = views.font.bytes(buffer)?;
    let mut font = [0u8; FONT_SIZE];
    font.copy_from_slice(glyphs);
    views.memory.bytes_mut(buffer)?[FONT_ADDR..FONT_ADDR + FONT_SIZE].copy_from_slice(&font);
    Ok(())
}

/// load a chip-8 program at 0x200
///
/// The image is trusted byte-for-byte; the only check is that it fits
/// between the load address and the top of RAM.
pub fn load_program(buffer: &mut LinearMemory, views: &Views, image: &[u8]) -> Result<(), LoadError> {
    if image.len() > PROGRAM_CAPACITY {
        warn!(
            len = image.len(),
            capacity = PROGRAM_CAPACITY,
            "program image does not fit in memory"
        );
        return Err(LoadError::Overflow {
            len: image.len(),
            capacity: PROGRAM_CAPACITY,
        });
    }
    let ram = views.memory.bytes_mut(buffer)?;
    ram[PROGRAM_ADDR..PROGRAM_ADDR + image.len()].copy_from_slice(image);
    debug!(len = image.len(), "program loaded at {:#05x}", PROGRAM_ADDR);
    Ok(())
}

/// read a whole program image of unknown length
pub fn read_program(reader: &mut impl io::Read) -> Result<Vec<u8>, LoadError> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
}

/// A program image still being fetched in the background.
#[derive(Debug)]
pub struct PendingProgram {
    rx: Receiver<Result<Vec<u8>, LoadError>>,
}

impl PendingProgram {
    /// block until the image arrives
    pub fn wait(self) -> Result<Vec<u8>, LoadError> {
        match self.rx.recv() {
            Ok(result) => result,
            Err(_) => Err(disconnected()),
        }
    }

    /// the image if it has arrived, `None` if still in flight
    pub fn try_take(&self) -> Result<Option<Vec<u8>>, LoadError> {
        match self.rx.try_recv() {
            Ok(result) => result.map(Some),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }
}

fn disconnected() -> LoadError {
    LoadError::Fetch(io::Error::new(
        io::ErrorKind::BrokenPipe,
        "program fetch ended without a result",
    ))
}

/// start reading a program image off disk without blocking the caller
pub fn fetch_program(path: impl Into<PathBuf>) -> PendingProgram {
    let path = path.into();
    let (tx, rx) = channel();
    thread::spawn(move || {
        debug!(path = %path.display(), "fetching program image");
        let image = fs::File::open(&path)
            .map_err(LoadError::from)
            .and_then(|mut f| read_program(&mut f));
        // receiver may have been dropped; nothing left to tell
        let _ = tx.send(image);
    });
    PendingProgram { rx }
}
