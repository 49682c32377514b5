use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::BindingError;

// NB. offsets and lengths are usize throughout; chip-8 addresses only become
//     u16 inside the core

/// how much RAM the machine has
pub const MEMORY_SIZE: usize = 4096;

/// built-in glyphs, 16 characters of 5 bytes each
pub const FONT_SIZE: usize = 80;

/// where the font gets copied to inside RAM
pub const FONT_ADDR: usize = 0x000;

/// where the program is loaded
pub const PROGRAM_ADDR: usize = 0x200;

pub const FRAMEBUFFER_WIDTH: usize = 64;
pub const FRAMEBUFFER_HEIGHT: usize = 32;
/// one byte per pixel, row-major
pub const FRAMEBUFFER_SIZE: usize = FRAMEBUFFER_WIDTH * FRAMEBUFFER_HEIGHT;

pub const REGISTER_COUNT: usize = 16;
pub const KEY_COUNT: usize = 16;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// The core-owned block of bytes every view aliases.
///
/// Each allocation carries a process-unique generation; a view bound against
/// one generation refuses to resolve against any other, so a reallocated (or
/// simply different) buffer can never be read through old views.
#[derive(Debug)]
pub struct LinearMemory {
    bytes: Box<[u8]>,
    generation: u64,
}

impl LinearMemory {
    /// zeroed buffer of `len` bytes
    pub fn new(len: usize) -> Self {
        LinearMemory {
            bytes: vec![0u8; len].into_boxed_slice(),
            generation: next_generation(),
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// reallocate, keeping whatever fits of the old contents; all views bound
    /// before this call go stale
    pub fn resize(&mut self, len: usize) {
        let mut bytes = vec![0u8; len].into_boxed_slice();
        let keep = len.min(self.bytes.len());
        bytes[..keep].copy_from_slice(&self.bytes[..keep]);
        self.bytes = bytes;
        self.generation = next_generation();
    }
}

/// Names the regions a core exposes inside its linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Memory,
    Font,
    Framebuffer,
    Registers,
    Input,
}

impl Region {
    /// fixed size of each region
    pub fn size(self) -> usize {
        match self {
            Region::Memory => MEMORY_SIZE,
            Region::Font => FONT_SIZE,
            Region::Framebuffer => FRAMEBUFFER_SIZE,
            Region::Registers => REGISTER_COUNT,
            Region::Input => KEY_COUNT,
        }
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Region::Memory => "memory",
            Region::Font => "font",
            Region::Framebuffer => "framebuffer",
            Region::Registers => "registers",
            Region::Input => "input",
        };
        f.write_str(name)
    }
}

/// Offset accessors exposed by a core; each returns where its region starts
/// inside the core's linear memory.
pub trait MemoryRegions {
    fn memory_offset(&self) -> usize;
    fn font_offset(&self) -> usize;
    fn framebuffer_offset(&self) -> usize;
    fn registers_offset(&self) -> usize;

    /// cores without input latches just keep the default
    fn input_offset(&self) -> Option<usize> {
        None
    }
}

/// A non-owning, fixed-length window into a [`LinearMemory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    region: Region,
    offset: usize,
    len: usize,
    generation: u64,
}

impl View {
    fn bind(buffer: &LinearMemory, region: Region, offset: usize) -> Result<View, BindingError> {
        let len = region.size();
        let out_of_bounds = BindingError::OutOfBounds {
            region,
            offset,
            len,
            buffer_len: buffer.len(),
        };
        match offset.checked_add(len) {
            Some(end) if end <= buffer.len() => Ok(View {
                region,
                offset,
                len,
                generation: buffer.generation(),
            }),
            _ => Err(out_of_bounds),
        }
    }

    pub fn region(&self) -> Region {
        self.region
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }

    /// was this view bound against `buffer` as it is now?
    pub fn is_current(&self, buffer: &LinearMemory) -> bool {
        self.generation == buffer.generation()
    }

    fn overlaps(&self, other: &View) -> bool {
        self.offset < other.offset + other.len && other.offset < self.offset + self.len
    }

    /// read-only slice of the region
    pub fn bytes<'a>(&self, buffer: &'a LinearMemory) -> Result<&'a [u8], BindingError> {
        let stale = BindingError::Stale {
            region: self.region,
        };
        if !self.is_current(buffer) {
            return Err(stale);
        }
        buffer.as_slice().get(self.range()).ok_or(stale)
    }

    /// read-write slice of the region
    pub fn bytes_mut<'a>(&self, buffer: &'a mut LinearMemory) -> Result<&'a mut [u8], BindingError> {
        let stale = BindingError::Stale {
            region: self.region,
        };
        if !self.is_current(buffer) {
            return Err(stale);
        }
        buffer.as_mut_slice().get_mut(self.range()).ok_or(stale)
    }
}

/// Every view the harness needs, all bound against one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Views {
    pub memory: View,
    pub font: View,
    pub framebuffer: View,
    pub registers: View,
    pub input: Option<View>,
}

impl Views {
    /// input latches, if the core has any
    pub fn input(&self) -> Result<&View, BindingError> {
        self.input.as_ref().ok_or(BindingError::MissingRegion {
            region: Region::Input,
        })
    }

    pub fn is_current(&self, buffer: &LinearMemory) -> bool {
        self.iter().all(|v| v.is_current(buffer))
    }

    fn iter(&self) -> impl Iterator<Item = &View> {
        [&self.memory, &self.font, &self.framebuffer, &self.registers]
            .into_iter()
            .chain(self.input.as_ref())
    }
}

/// Build typed views over `buffer` from the offsets a core reports.
///
/// Nothing is copied. Fails if any region would run past the end of the
/// buffer, or if two regions share bytes.
pub fn bind_views<R>(buffer: &LinearMemory, regions: &R) -> Result<Views, BindingError>
where
    R: MemoryRegions + ?Sized,
{
    let input = match regions.input_offset() {
        Some(offset) => Some(View::bind(buffer, Region::Input, offset)?),
        None => None,
    };
    let views = Views {
        memory: View::bind(buffer, Region::Memory, regions.memory_offset())?,
        font: View::bind(buffer, Region::Font, regions.font_offset())?,
        framebuffer: View::bind(buffer, Region::Framebuffer, regions.framebuffer_offset())?,
        registers: View::bind(buffer, Region::Registers, regions.registers_offset())?,
        input,
    };

    let all: Vec<&View> = views.iter().collect();
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            if a.overlaps(b) {
                return Err(BindingError::Overlap {
                    first: a.region,
                    second: b.region,
                });
            }
        }
    }
    Ok(views)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Layout {
        memory: usize,
        font: usize,
        framebuffer: usize,
        registers: usize,
        input: Option<usize>,
    }

    // memory, font, framebuffer, registers, input packed back to back
    const PACKED_LEN: usize = 0x1870;

    fn packed() -> Layout {
        Layout {
            memory: 0x0000,
            font: 0x1000,
            framebuffer: 0x1050,
            registers: 0x1850,
            input: Some(0x1860),
        }
    }

    impl MemoryRegions for Layout {
        fn memory_offset(&self) -> usize {
            self.memory
        }
        fn font_offset(&self) -> usize {
            self.font
        }
        fn framebuffer_offset(&self) -> usize {
            self.framebuffer
        }
        fn registers_offset(&self) -> usize {
            self.registers
        }
        fn input_offset(&self) -> Option<usize> {
            self.input
        }
    }

    #[test]
    fn test_bind_sizes() -> Result<(), BindingError> {
        let buf = LinearMemory::new(PACKED_LEN);
        let v = bind_views(&buf, &packed())?;
        assert_eq!(v.memory.len(), 4096);
        assert_eq!(v.font.len(), 80);
        assert_eq!(v.framebuffer.len(), 2048);
        assert_eq!(v.registers.len(), 16);
        assert_eq!(v.input()?.len(), 16);
        Ok(())
    }

    #[test]
    fn test_bind_ranges_disjoint_and_in_bounds() -> Result<(), BindingError> {
        let buf = LinearMemory::new(PACKED_LEN);
        let v = bind_views(&buf, &packed())?;
        let all: Vec<&View> = v.iter().collect();
        for (i, a) in all.iter().enumerate() {
            assert!(a.range().end <= buf.len());
            for b in &all[i + 1..] {
                assert!(!a.overlaps(b), "{} overlaps {}", a.region(), b.region());
            }
        }
        Ok(())
    }

    #[test]
    fn test_bind_idempotent() -> Result<(), BindingError> {
        let buf = LinearMemory::new(PACKED_LEN);
        let a = bind_views(&buf, &packed())?;
        let b = bind_views(&buf, &packed())?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_views_alias_buffer() -> Result<(), BindingError> {
        let mut buf = LinearMemory::new(PACKED_LEN);
        let v = bind_views(&buf, &packed())?;
        v.registers.bytes_mut(&mut buf)?[3] = 0xaa;
        assert_eq!(buf.as_slice()[0x1853], 0xaa);
        Ok(())
    }

    #[test]
    fn test_bind_out_of_bounds() {
        let buf = LinearMemory::new(PACKED_LEN - 1);
        let err = bind_views(&buf, &packed()).unwrap_err();
        assert_eq!(
            err,
            BindingError::OutOfBounds {
                region: Region::Input,
                offset: 0x1860,
                len: 16,
                buffer_len: PACKED_LEN - 1,
            }
        );
    }

    #[test]
    fn test_bind_offset_overflow() {
        let buf = LinearMemory::new(PACKED_LEN);
        let mut layout = packed();
        layout.framebuffer = usize::MAX - 4;
        assert!(matches!(
            bind_views(&buf, &layout),
            Err(BindingError::OutOfBounds {
                region: Region::Framebuffer,
                ..
            })
        ));
    }

    #[test]
    fn test_bind_rejects_overlap() {
        let buf = LinearMemory::new(PACKED_LEN);
        let mut layout = packed();
        layout.font = 0x0000; // font source inside RAM
        assert_eq!(
            bind_views(&buf, &layout),
            Err(BindingError::Overlap {
                first: Region::Memory,
                second: Region::Font,
            })
        );
    }

    #[test]
    fn test_bind_without_input() -> Result<(), BindingError> {
        let buf = LinearMemory::new(PACKED_LEN);
        let mut layout = packed();
        layout.input = None;
        let v = bind_views(&buf, &layout)?;
        assert_eq!(
            v.input(),
            Err(BindingError::MissingRegion {
                region: Region::Input
            })
        );
        Ok(())
    }

    #[test]
    fn test_resize_makes_views_stale() -> Result<(), BindingError> {
        let mut buf = LinearMemory::new(PACKED_LEN);
        let v = bind_views(&buf, &packed())?;
        buf.as_mut_slice()[0x200] = 0x12;
        buf.resize(PACKED_LEN * 2);
        assert!(!v.is_current(&buf));
        assert_eq!(
            v.memory.bytes(&buf),
            Err(BindingError::Stale {
                region: Region::Memory
            })
        );
        // rebinding picks the preserved contents back up
        let v = bind_views(&buf, &packed())?;
        assert_eq!(v.memory.bytes(&buf)?[0x200], 0x12);
        Ok(())
    }

    #[test]
    fn test_views_reject_other_buffer() -> Result<(), BindingError> {
        let a = LinearMemory::new(PACKED_LEN);
        let b = LinearMemory::new(PACKED_LEN);
        let v = bind_views(&a, &packed())?;
        assert!(v.font.bytes(&b).is_err());
        Ok(())
    }
}
