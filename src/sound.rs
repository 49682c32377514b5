use beep::beep;
use thiserror::Error;
use tracing::debug;

/// The speaker couldn't be driven. Never fatal to a run.
#[derive(Error, Debug)]
#[error("tone output failed: {0}")]
pub struct SoundError(String);

impl SoundError {
    pub fn new(reason: impl Into<String>) -> Self {
        SoundError(reason.into())
    }
}

/// Where the core's tone signal ends up. The harness only calls in on edges:
/// `start_tone` when the core starts asking for a tone, `stop_tone` when it
/// stops (and once more when a run ends mid-tone).
pub trait Sound {
    fn start_tone(&mut self) -> Result<(), SoundError>;
    fn stop_tone(&mut self) -> Result<(), SoundError>;
}

/// C7, about as close to the VIP's buzzer as a square wave gets
pub const DEFAULT_PITCH: u16 = 2093;

/// PC speaker tone via the `beep` crate
#[derive(Debug)]
pub struct Speaker {
    pitch: u16,
    sounding: bool,
}

impl Default for Speaker {
    fn default() -> Self {
        Speaker::new()
    }
}

impl Speaker {
    pub fn new() -> Self {
        Speaker::with_pitch(DEFAULT_PITCH)
    }

    pub fn with_pitch(pitch: u16) -> Self {
        Speaker {
            pitch,
            sounding: false,
        }
    }

    pub fn pitch(&self) -> u16 {
        self.pitch
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding
    }

    // NB. beep(0) is the crate's way of silencing the speaker
    fn drive(&mut self, hertz: u16) -> Result<(), SoundError> {
        beep(hertz).map_err(|e| SoundError::new(e.to_string()))?;
        self.sounding = hertz != 0;
        debug!(hertz, "speaker");
        Ok(())
    }
}

impl Sound for Speaker {
    fn start_tone(&mut self) -> Result<(), SoundError> {
        self.drive(self.pitch)
    }

    fn stop_tone(&mut self) -> Result<(), SoundError> {
        self.drive(0)
    }
}

/// drops the tone signal on the floor
#[derive(Debug, Default, Clone, Copy)]
pub struct Mute;

impl Sound for Mute {
    fn start_tone(&mut self) -> Result<(), SoundError> {
        Ok(())
    }

    fn stop_tone(&mut self) -> Result<(), SoundError> {
        Ok(())
    }
}

/// Counts tone edges instead of making noise; useful for testing the loop.
#[derive(Debug, Default)]
pub struct ToneRecorder {
    pub starts: usize,
    pub stops: usize,
    sounding: bool,
}

impl ToneRecorder {
    pub fn new() -> Self {
        ToneRecorder::default()
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding
    }
}

impl Sound for ToneRecorder {
    fn start_tone(&mut self) -> Result<(), SoundError> {
        self.starts += 1;
        self.sounding = true;
        Ok(())
    }

    fn stop_tone(&mut self) -> Result<(), SoundError> {
        self.stops += 1;
        self.sounding = false;
        Ok(())
    }
}
