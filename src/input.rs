use crossterm::event::{self as term, Event, KeyCode, KeyModifiers};
use crossterm::terminal;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::BindingError;
use crate::memory::{LinearMemory, Views, KEY_COUNT};

/// Keys 0-F in keypad order, four to a keyboard row
///   0 1 2 3
///   q w e r
///   a s d f
///   z x c v
pub const CHIP8_SEQUENTIAL_KEYMAP: [(char, u8); KEY_COUNT] = [
    ('0', 0x00),
    ('1', 0x01),
    ('2', 0x02),
    ('3', 0x03),
    ('q', 0x04),
    ('w', 0x05),
    ('e', 0x06),
    ('r', 0x07),
    ('a', 0x08),
    ('s', 0x09),
    ('d', 0x0a),
    ('f', 0x0b),
    ('z', 0x0c),
    ('x', 0x0d),
    ('c', 0x0e),
    ('v', 0x0f),
];

/// COSMAC VIP hex keypad laid over the left-hand side of a qwerty keyboard
///   1 2 3 C      1 2 3 4
///   4 5 6 D  =>  q w e r
///   7 8 9 E      a s d f
///   A 0 B F      z x c v
pub const CHIP8_CONVENTIONAL_KEYMAP: [(char, u8); KEY_COUNT] = [
    ('x', 0x00),
    ('1', 0x01),
    ('2', 0x02),
    ('3', 0x03),
    ('q', 0x04),
    ('w', 0x05),
    ('e', 0x06),
    ('a', 0x07),
    ('s', 0x08),
    ('d', 0x09),
    ('z', 0x0a),
    ('c', 0x0b),
    ('4', 0x0c),
    ('r', 0x0d),
    ('f', 0x0e),
    ('v', 0x0f),
];

/// Fixed symbol -> key index table. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keymap {
    map: HashMap<char, u8>,
}

impl Keymap {
    /// alternate layouts; symbols are case-insensitive, indices are taken
    /// modulo 16
    pub fn new(pairs: impl IntoIterator<Item = (char, u8)>) -> Self {
        Keymap {
            map: pairs
                .into_iter()
                .map(|(symbol, index)| (symbol.to_ascii_lowercase(), index & 0x0f))
                .collect(),
        }
    }

    pub fn index_of(&self, symbol: char) -> Option<u8> {
        self.map.get(&symbol.to_ascii_lowercase()).copied()
    }
}

impl Default for Keymap {
    fn default() -> Self {
        Keymap::new(CHIP8_SEQUENTIAL_KEYMAP)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Press,
    Release,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub symbol: char,
    pub action: KeyAction,
}

impl KeyEvent {
    pub fn press(symbol: char) -> Self {
        KeyEvent {
            symbol,
            action: KeyAction::Press,
        }
    }

    pub fn release(symbol: char) -> Self {
        KeyEvent {
            symbol,
            action: KeyAction::Release,
        }
    }
}

/// What the host hands the harness between ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Key(KeyEvent),
    Quit,
}

/// Turns key events into writes on the input latches. Holds nothing but the
/// keymap; all key state lives in the core's memory.
#[derive(Debug, Clone, Default)]
pub struct InputTranslator {
    keymap: Keymap,
}

impl InputTranslator {
    pub fn new(keymap: Keymap) -> Self {
        InputTranslator { keymap }
    }

    pub fn keymap(&self) -> &Keymap {
        &self.keymap
    }

    /// write 1 (press) or 0 (release) to the mapped latch; returns the latch
    /// index touched, `None` for unmapped symbols
    pub fn apply(
        &self,
        buffer: &mut LinearMemory,
        views: &Views,
        event: KeyEvent,
    ) -> Result<Option<u8>, BindingError> {
        let index = match self.keymap.index_of(event.symbol) {
            Some(index) => index,
            None => {
                trace!(symbol = ?event.symbol, "unmapped key ignored");
                return Ok(None);
            }
        };
        let latches = views.input()?.bytes_mut(buffer)?;
        latches[index as usize] = match event.action {
            KeyAction::Press => 1,
            KeyAction::Release => 0,
        };
        trace!(index, action = ?event.action, "key latch updated");
        Ok(Some(index))
    }
}

/// reads host events
pub trait EventSource {
    /// everything that happened since the last poll, without blocking
    fn poll(&mut self) -> Result<Vec<HostEvent>, io::Error>;
}

/// how long a key stays held after its last press (or auto-repeat) event;
/// longer than the usual terminal auto-repeat delay
pub const HOLD_TIME: Duration = Duration::from_millis(600);

/// Tracks which keys are down when the host only reports presses.
///
/// A key is released once it has gone `hold_polls` expiries without another
/// press; auto-repeats just push the release back.
#[derive(Debug, Clone)]
pub struct HeldKeys {
    hold_polls: u32,
    held: HashMap<char, u32>,
}

impl HeldKeys {
    pub fn new(hold_polls: u32) -> Self {
        HeldKeys {
            hold_polls: hold_polls.max(1),
            held: HashMap::new(),
        }
    }

    /// enough polls to cover `HOLD_TIME` when polled once per frame
    pub fn for_frame_rate(frame_rate: u32) -> Self {
        let polls = HOLD_TIME.as_millis() as u64 * frame_rate as u64 / 1000;
        HeldKeys::new(polls.min(u32::MAX as u64) as u32)
    }

    pub fn hold_polls(&self) -> u32 {
        self.hold_polls
    }

    /// the press event if the key wasn't already down
    pub fn press(&mut self, symbol: char) -> Option<HostEvent> {
        let symbol = symbol.to_ascii_lowercase();
        match self.held.insert(symbol, self.hold_polls) {
            None => Some(HostEvent::Key(KeyEvent::press(symbol))),
            Some(_) => None,
        }
    }

    /// count every held key down by one poll; release the ones that run out
    pub fn expire(&mut self) -> Vec<HostEvent> {
        let mut released = Vec::new();
        self.held.retain(|&symbol, polls| {
            *polls -= 1;
            if *polls == 0 {
                released.push(HostEvent::Key(KeyEvent::release(symbol)));
            }
            *polls > 0
        });
        released
    }
}

/// Keyboard input from the terminal, via crossterm.
///
/// Terminals only report presses (and auto-repeats of them), so releases
/// come from [`HeldKeys`]. Esc or ctrl-c asks the harness to quit.
pub struct TermInput {
    held: HeldKeys,
}

impl TermInput {
    /// `frame_rate` is how often the harness will poll
    pub fn new(frame_rate: u32) -> Result<Self, io::Error> {
        terminal::enable_raw_mode()?;
        Ok(TermInput {
            held: HeldKeys::for_frame_rate(frame_rate),
        })
    }
}

impl Drop for TermInput {
    fn drop(&mut self) {
        if let Err(e) = terminal::disable_raw_mode() {
            debug!("could not restore terminal mode: {}", e);
        }
    }
}

impl EventSource for TermInput {
    fn poll(&mut self) -> Result<Vec<HostEvent>, io::Error> {
        let mut events = self.held.expire();
        while term::poll(Duration::from_millis(0))? {
            let key = match term::read()? {
                Event::Key(key) => key,
                _ => continue,
            };
            match key.code {
                KeyCode::Esc => events.push(HostEvent::Quit),
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    events.push(HostEvent::Quit)
                }
                KeyCode::Char(c) => events.extend(self.held.press(c)),
                other => trace!("ignoring key {:?}", other),
            }
        }
        Ok(events)
    }
}

/// replays canned batches of events, one batch per poll; for headless runs
/// and tests
#[derive(Debug, Default)]
pub struct ScriptedInput {
    batches: VecDeque<Vec<HostEvent>>,
}

impl ScriptedInput {
    pub fn new(batches: impl IntoIterator<Item = Vec<HostEvent>>) -> Self {
        ScriptedInput {
            batches: batches.into_iter().collect(),
        }
    }
}

impl EventSource for ScriptedInput {
    fn poll(&mut self) -> Result<Vec<HostEvent>, io::Error> {
        Ok(self.batches.pop_front().unwrap_or_default())
    }
}
