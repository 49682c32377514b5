use crate::error::CoreError;
use crate::memory::{LinearMemory, MemoryRegions};

/// The virtual-machine core the harness drives.
///
/// A core owns one [`LinearMemory`] and reports where its regions live in it
/// through [`MemoryRegions`]. Everything the harness knows about machine state
/// it reads through views over that buffer; the only other ways in are the
/// step and timer operations and the diagnostic counters below.
pub trait Core: MemoryRegions {
    fn linear_memory(&self) -> &LinearMemory;
    fn linear_memory_mut(&mut self) -> &mut LinearMemory;

    /// execute exactly one instruction
    fn step_cycle(&mut self) -> Result<(), CoreError>;

    /// advance the delay and sound timers by one unit
    fn decrement_timers(&mut self);

    fn should_play_tone(&self) -> bool;

    fn index_counter(&self) -> u16;
    fn program_counter(&self) -> u16;
}
