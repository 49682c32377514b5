//! # interpreter
//!
//! A plain CHIP-8 core laid out in one linear memory block, so the harness
//! can bind views over it the same way it would over any other core:
//!
//!   0x0000-0x0fff  RAM (font copied to 0x000 by the loader, program at 0x200)
//!   0x1000-0x104f  font source (read-only as far as the core cares)
//!   0x1050-0x184f  framebuffer, one byte per pixel
//!   0x1850-0x185f  V0-VF
//!   0x1860-0x186f  key latches, written by the harness
//!
//! Program counter, I, the call stack, both timers and the random register
//! live outside linear memory; the harness only sees PC and I, and only for
//! diagnostics.
//!
//! Behaviour follows the COSMAC VIP where the common variants disagree:
//! shifts take VY, and FX55/FX65 leave I pointing past the last register.
use crate::error::CoreError;
use crate::memory::{
    LinearMemory, MemoryRegions, FONT_ADDR, FONT_SIZE, FRAMEBUFFER_HEIGHT, FRAMEBUFFER_SIZE,
    FRAMEBUFFER_WIDTH, KEY_COUNT, MEMORY_SIZE, PROGRAM_ADDR, REGISTER_COUNT,
};
use crate::vm::Core;

const MEMORY_OFFSET: usize = 0x0000;
const FONT_OFFSET: usize = MEMORY_OFFSET + MEMORY_SIZE;
const FRAMEBUFFER_OFFSET: usize = FONT_OFFSET + FONT_SIZE;
const REGISTERS_OFFSET: usize = FRAMEBUFFER_OFFSET + FRAMEBUFFER_SIZE;
const INPUT_OFFSET: usize = REGISTERS_OFFSET + REGISTER_COUNT;

/// total size of the block the core allocates
pub const LINEAR_MEMORY_SIZE: usize = INPUT_OFFSET + KEY_COUNT;

const STACK_DEPTH: usize = 16;
const GLYPH_BYTES: u16 = 5;
const RANDOM_SEED: u16 = 0xace1;

pub const CHIP8_FONT: [u8; FONT_SIZE] = [
    0xF0, 0x90, 0x90, 0x90, 0xF0, // 0
    0x20, 0x60, 0x20, 0x20, 0x70, // 1
    0xF0, 0x10, 0xF0, 0x80, 0xF0, // 2
    0xF0, 0x10, 0xF0, 0x10, 0xF0, // 3
    0x90, 0x90, 0xF0, 0x10, 0x10, // 4
    0xF0, 0x80, 0xF0, 0x10, 0xF0, // 5
    0xF0, 0x80, 0xF0, 0x90, 0xF0, // 6
    0xF0, 0x10, 0x20, 0x40, 0x40, // 7
    0xF0, 0x90, 0xF0, 0x90, 0xF0, // 8
    0xF0, 0x90, 0xF0, 0x10, 0xF0, // 9
    0xF0, 0x90, 0xF0, 0x90, 0x90, // A
    0xE0, 0x90, 0xE0, 0x90, 0xE0, // B
    0xF0, 0x80, 0x80, 0x80, 0xF0, // C
    0xE0, 0x90, 0x90, 0x90, 0xE0, // D
    0xF0, 0x80, 0xF0, 0x80, 0xF0, // E
    0xF0, 0x80, 0xF0, 0x80, 0x80, // F
];

#[derive(Debug)]
pub struct Chip8Interpreter {
    mem: LinearMemory,
    stack: [u16; STACK_DEPTH],
    stack_pointer: usize,
    program_counter: u16,
    i: u16,
    delay_timer: u8,
    sound_timer: u8,
    random: u16,
}

impl Default for Chip8Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Chip8Interpreter {
    pub fn new() -> Chip8Interpreter {
        let mut mem = LinearMemory::new(LINEAR_MEMORY_SIZE);
        mem.as_mut_slice()[FONT_OFFSET..FONT_OFFSET + FONT_SIZE].copy_from_slice(&CHIP8_FONT);
        Chip8Interpreter {
            mem,
            stack: [0; STACK_DEPTH],
            stack_pointer: 0,
            program_counter: PROGRAM_ADDR as u16,
            i: 0,
            delay_timer: 0,
            sound_timer: 0,
            random: RANDOM_SEED,
        }
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    fn ram(&self) -> &[u8] {
        &self.mem.as_slice()[MEMORY_OFFSET..MEMORY_OFFSET + MEMORY_SIZE]
    }

    fn ram_mut(&mut self) -> &mut [u8] {
        &mut self.mem.as_mut_slice()[MEMORY_OFFSET..MEMORY_OFFSET + MEMORY_SIZE]
    }

    fn framebuffer_mut(&mut self) -> &mut [u8] {
        &mut self.mem.as_mut_slice()[FRAMEBUFFER_OFFSET..FRAMEBUFFER_OFFSET + FRAMEBUFFER_SIZE]
    }

    fn v(&self, x: usize) -> u8 {
        self.mem.as_slice()[REGISTERS_OFFSET + x]
    }

    fn set_v(&mut self, x: usize, val: u8) {
        self.mem.as_mut_slice()[REGISTERS_OFFSET + x] = val;
    }

    fn key_held(&self, key: u8) -> bool {
        self.mem.as_slice()[INPUT_OFFSET + (key & 0x0f) as usize] != 0
    }

    /// `len` bytes of RAM starting at I
    fn ram_range(&self, len: usize, pc: u16) -> Result<std::ops::Range<usize>, CoreError> {
        let start = self.i as usize;
        if start + len > MEMORY_SIZE {
            return Err(CoreError::AddressOutOfRange { addr: self.i, pc });
        }
        Ok(start..start + len)
    }

    fn fetch(&self, pc: u16) -> Result<u16, CoreError> {
        let a = pc as usize;
        if a + 1 >= MEMORY_SIZE {
            return Err(CoreError::AddressOutOfRange { addr: pc, pc });
        }
        let word = &self.ram()[a..a + 2];
        Ok(((word[0] as u16) << 8) | word[1] as u16)
    }

    fn push(&mut self, addr: u16, pc: u16) -> Result<(), CoreError> {
        if self.stack_pointer == STACK_DEPTH {
            return Err(CoreError::StackOverflow { pc });
        }
        self.stack[self.stack_pointer] = addr;
        self.stack_pointer += 1;
        Ok(())
    }

    fn pop(&mut self, pc: u16) -> Result<u16, CoreError> {
        if self.stack_pointer == 0 {
            return Err(CoreError::StackUnderflow { pc });
        }
        self.stack_pointer -= 1;
        Ok(self.stack[self.stack_pointer])
    }

    // xorshift; the VIP kept its own random register too
    fn next_random(&mut self) -> u8 {
        let mut r = self.random;
        r ^= r << 7;
        r ^= r >> 9;
        r ^= r << 8;
        self.random = r;
        (r >> 8) as u8
    }

    /// 8XYN; false if N isn't an ALU op
    fn alu(&mut self, x: usize, y: usize, n: u8) -> bool {
        let (vx, vy) = (self.v(x), self.v(y));
        let (result, flag) = match n {
            0x0 => (vy, None),
            0x1 => (vx | vy, None),
            0x2 => (vx & vy, None),
            0x3 => (vx ^ vy, None),
            0x4 => {
                let (r, carry) = vx.overflowing_add(vy);
                (r, Some(carry as u8))
            }
            0x5 => (vx.wrapping_sub(vy), Some((vx >= vy) as u8)),
            0x6 => (vy >> 1, Some(vy & 0x01)),
            0x7 => (vy.wrapping_sub(vx), Some((vy >= vx) as u8)),
            0xe => (vy << 1, Some(vy >> 7)),
            _ => return false,
        };
        self.set_v(x, result);
        if let Some(f) = flag {
            self.set_v(0xf, f);
        }
        true
    }

    /// DXYN: xor an N-row sprite from I onto the screen, clipping at the edges
    fn draw(&mut self, x: usize, y: usize, n: u8, pc: u16) -> Result<(), CoreError> {
        let rows = self.ram_range(n as usize, pc)?;
        let mut sprite = [0u8; 15];
        let sprite = &mut sprite[..n as usize];
        sprite.copy_from_slice(&self.ram()[rows]);

        let x0 = self.v(x) as usize % FRAMEBUFFER_WIDTH;
        let y0 = self.v(y) as usize % FRAMEBUFFER_HEIGHT;
        let fb = self.framebuffer_mut();
        let mut collision = 0;
        for (row, &byte) in sprite.iter().enumerate() {
            let py = y0 + row;
            if py >= FRAMEBUFFER_HEIGHT {
                break;
            }
            for bit in 0..8 {
                let px = x0 + bit;
                if px >= FRAMEBUFFER_WIDTH {
                    break;
                }
                if byte & (0x80u8 >> bit) != 0 {
                    let cell = &mut fb[py * FRAMEBUFFER_WIDTH + px];
                    if *cell != 0 {
                        collision = 1;
                    }
                    *cell = (*cell != 0) as u8 ^ 1;
                }
            }
        }
        self.set_v(0xf, collision);
        Ok(())
    }
}

impl MemoryRegions for Chip8Interpreter {
    fn memory_offset(&self) -> usize {
        MEMORY_OFFSET
    }
    fn font_offset(&self) -> usize {
        FONT_OFFSET
    }
    fn framebuffer_offset(&self) -> usize {
        FRAMEBUFFER_OFFSET
    }
    fn registers_offset(&self) -> usize {
        REGISTERS_OFFSET
    }
    fn input_offset(&self) -> Option<usize> {
        Some(INPUT_OFFSET)
    }
}

impl Core for Chip8Interpreter {
    fn linear_memory(&self) -> &LinearMemory {
        &self.mem
    }

    fn linear_memory_mut(&mut self) -> &mut LinearMemory {
        &mut self.mem
    }

    fn step_cycle(&mut self) -> Result<(), CoreError> {
        let pc = self.program_counter;
        let opcode = self.fetch(pc)?;
        // zeroed memory: sit still rather than run off the end of RAM
        if opcode == 0x0000 {
            return Ok(());
        }

        let x = ((opcode >> 8) & 0xf) as usize;
        let y = ((opcode >> 4) & 0xf) as usize;
        let n = (opcode & 0xf) as u8;
        let nn = (opcode & 0xff) as u8;
        let nnn = opcode & 0x0fff;
        let invalid = CoreError::InvalidOpcode { opcode, pc };
        let mut next = pc + 2;

        match opcode >> 12 {
            0x0 => match opcode {
                0x00e0 => self.framebuffer_mut().fill(0),
                0x00ee => next = self.pop(pc)?,
                _ => {} // 0NNN: machine code routine, nothing to call into
            },
            0x1 => next = nnn,
            0x2 => {
                self.push(next, pc)?;
                next = nnn;
            }
            0x3 => {
                if self.v(x) == nn {
                    next += 2;
                }
            }
            0x4 => {
                if self.v(x) != nn {
                    next += 2;
                }
            }
            0x5 if n == 0 => {
                if self.v(x) == self.v(y) {
                    next += 2;
                }
            }
            0x6 => self.set_v(x, nn),
            0x7 => self.set_v(x, self.v(x).wrapping_add(nn)),
            0x8 => {
                if !self.alu(x, y, n) {
                    return Err(invalid);
                }
            }
            0x9 if n == 0 => {
                if self.v(x) != self.v(y) {
                    next += 2;
                }
            }
            0xa => self.i = nnn,
            0xb => next = nnn + self.v(0) as u16,
            0xc => {
                let r = self.next_random();
                self.set_v(x, r & nn);
            }
            0xd => self.draw(x, y, n, pc)?,
            0xe => match nn {
                0x9e => {
                    if self.key_held(self.v(x)) {
                        next += 2;
                    }
                }
                0xa1 => {
                    if !self.key_held(self.v(x)) {
                        next += 2;
                    }
                }
                _ => return Err(invalid),
            },
            0xf => match nn {
                0x07 => self.set_v(x, self.delay_timer),
                0x0a => match (0..KEY_COUNT as u8).find(|&k| self.key_held(k)) {
                    Some(k) => self.set_v(x, k),
                    None => next = pc, // spin until a key is held
                },
                0x15 => self.delay_timer = self.v(x),
                0x18 => self.sound_timer = self.v(x),
                0x1e => self.i = self.i.wrapping_add(self.v(x) as u16),
                0x29 => self.i = FONT_ADDR as u16 + (self.v(x) & 0x0f) as u16 * GLYPH_BYTES,
                0x33 => {
                    let vx = self.v(x);
                    let r = self.ram_range(3, pc)?;
                    self.ram_mut()[r].copy_from_slice(&[vx / 100, vx / 10 % 10, vx % 10]);
                }
                0x55 => {
                    let r = self.ram_range(x + 1, pc)?;
                    let mut regs = [0u8; REGISTER_COUNT];
                    for (k, reg) in regs.iter_mut().enumerate().take(x + 1) {
                        *reg = self.v(k);
                    }
                    self.ram_mut()[r].copy_from_slice(&regs[..=x]);
                    self.i += x as u16 + 1;
                }
                0x65 => {
                    let r = self.ram_range(x + 1, pc)?;
                    let mut regs = [0u8; REGISTER_COUNT];
                    regs[..=x].copy_from_slice(&self.ram()[r]);
                    for (k, val) in regs.iter().enumerate().take(x + 1) {
                        self.set_v(k, *val);
                    }
                    self.i += x as u16 + 1;
                }
                _ => return Err(invalid),
            },
            _ => return Err(invalid),
        }

        self.program_counter = next;
        Ok(())
    }

    fn decrement_timers(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    fn should_play_tone(&self) -> bool {
        self.sound_timer > 0
    }

    fn index_counter(&self) -> u16 {
        self.i
    }

    fn program_counter(&self) -> u16 {
        self.program_counter
    }
}
