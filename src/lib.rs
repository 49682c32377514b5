//! Host-side harness for a CHIP-8 virtual machine core.
//!
//! ## Design
//!
//! * the core owns one block of linear memory; the harness never copies machine
//!   state out of it, it binds fixed-length views over it and reads/writes
//!   through those
//! * the core is opaque: a set of region offsets, "step one instruction",
//!   "tick the timers", a tone flag and PC/I for diagnostics
//! * the harness is a context object, not globals; `create -> start -> load
//!   -> run -> stop`
//! * single-threaded and cooperative; key events land between ticks, never
//!   inside one
//! * display, input, sound and frame pacing are traits, so the terminal
//!   frontend can be swapped for a recording one in tests
//!
//! Model
//!
//! Harness
//!  |-- core (memory, font, framebuffer, registers, key latches)
//!  |-- views bound over the core's memory
//!  |-- input translator(keymap)
//!  `-- main loop
//!       |-- drain host events -> key latches
//!       |-- tick: N x (render framebuffer, diagnostics, tone, step)
//!       |         then timers once, then present
//!       `-- wait for next frame
pub mod config;
pub mod display;
pub mod driver;
pub mod error;
pub mod input;
pub mod interpreter;
pub mod loader;
pub mod memory;
pub mod sound;
pub mod vm;

pub use crate::config::HarnessConfig;
pub use crate::driver::{DriverState, Harness, StopHandle, TickStatus};
pub use crate::error::{BindingError, CoreError, HarnessError, LoadError};
pub use crate::interpreter::Chip8Interpreter;
pub use crate::vm::Core;
