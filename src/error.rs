use std::io;
use thiserror::Error;

use crate::memory::Region;

/// A region handed out by the core doesn't fit the shared buffer, or a view
/// no longer matches the buffer it was bound against.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("{region} region at {offset:#06x}+{len:#x} exceeds buffer of {buffer_len:#x} bytes")]
    OutOfBounds {
        region: Region,
        offset: usize,
        len: usize,
        buffer_len: usize,
    },
    #[error("{first} and {second} regions overlap")]
    Overlap { first: Region, second: Region },
    #[error("{region} view is stale; the core reallocated its memory")]
    Stale { region: Region },
    #[error("core exposes no {region} region")]
    MissingRegion { region: Region },
}

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("program image of {len} bytes exceeds the {capacity} bytes available after the load address")]
    Overflow { len: usize, capacity: usize },
    #[error("could not fetch program image: {0}")]
    Fetch(#[from] io::Error),
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Failures raised by the core while executing an instruction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("invalid opcode {opcode:#06x} at {pc:#06x}")]
    InvalidOpcode { opcode: u16, pc: u16 },
    #[error("call stack overflow at {pc:#06x}")]
    StackOverflow { pc: u16 },
    #[error("return with empty call stack at {pc:#06x}")]
    StackUnderflow { pc: u16 },
    #[error("address {addr:#06x} out of range at {pc:#06x}")]
    AddressOutOfRange { addr: u16, pc: u16 },
}

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("core failed: {0}")]
    Core(#[from] CoreError),
    #[error("display failed: {0}")]
    Display(#[source] io::Error),
    #[error("input failed: {0}")]
    Input(#[source] io::Error),
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: crate::driver::DriverState,
    },
}
