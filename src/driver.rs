//! # driver
//!
//! The render loop. One [`Harness`] owns the core and everything the host
//! needs to keep its views of core memory in step with it:
//!
//!   Unstarted --start--> Loading --load_program--> Running --stop--> Stopped
//!
//! Each tick runs a fixed batch of instruction steps, then the timers once,
//! then presents the frame. Batching decouples the machine's instruction
//! rate from the host's frame rate without a second timer thread.
//!
//! Everything happens on one thread. Key events are applied between ticks,
//! never during one, so the core always sees whole latch updates.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::config::HarnessConfig;
use crate::display::{render_frame, Diagnostics, Surface};
use crate::error::HarnessError;
use crate::input::{EventSource, HostEvent, InputTranslator, KeyEvent, Keymap};
use crate::loader::{self, PendingProgram};
use crate::memory::{bind_views, Views, REGISTER_COUNT};
use crate::sound::Sound;
use crate::vm::Core;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Unstarted,
    Loading,
    Running,
    Stopped,
}

/// Halts a running harness at the top of its next tick. Cheap to clone and
/// safe to trip from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        StopHandle::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    Ran,
    Stopped,
}

/// The host's "call me next frame" primitive.
pub trait FrameClock {
    fn wait_next_frame(&mut self);
}

/// sleeps out the rest of each frame period; falls behind gracefully rather
/// than bursting to catch up
#[derive(Debug)]
pub struct PacedClock {
    period: Duration,
    next: Option<Instant>,
}

impl PacedClock {
    pub fn new(frame_rate: u32) -> Self {
        PacedClock {
            period: Duration::from_secs(1) / frame_rate.max(1),
            next: None,
        }
    }
}

impl FrameClock for PacedClock {
    fn wait_next_frame(&mut self) {
        let now = Instant::now();
        let next = self.next.unwrap_or(now) + self.period;
        if next > now {
            spin_sleep::sleep(next - now);
            self.next = Some(next);
        } else {
            self.next = Some(now);
        }
    }
}

/// no waiting at all; ticks run back to back
#[derive(Debug, Default)]
pub struct Unpaced;

impl FrameClock for Unpaced {
    fn wait_next_frame(&mut self) {}
}

/// Harness context: the core, the views bound over its memory, and the loop
/// state. Every operation goes through this, nothing is global.
#[derive(Debug)]
pub struct Harness<C: Core> {
    core: C,
    views: Option<Views>,
    translator: InputTranslator,
    config: HarnessConfig,
    state: DriverState,
    stop: StopHandle,
    ticks: u64,
    tone: bool,
}

impl<C: Core> Harness<C> {
    pub fn create(core: C, keymap: Keymap, config: HarnessConfig) -> Self {
        Harness {
            core,
            views: None,
            translator: InputTranslator::new(keymap),
            config,
            state: DriverState::Unstarted,
            stop: StopHandle::new(),
            ticks: 0,
            tone: false,
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut C {
        &mut self.core
    }

    pub fn views(&self) -> Option<&Views> {
        self.views.as_ref()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// ticks completed so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn stop(&mut self) {
        self.stop.stop();
        self.transition(DriverState::Stopped);
    }

    fn transition(&mut self, to: DriverState) {
        if self.state != to {
            info!(from = ?self.state, ?to, "harness state change");
            self.state = to;
        }
    }

    fn expect_state(&self, expected: DriverState, action: &'static str) -> Result<(), HarnessError> {
        if self.state != expected {
            return Err(HarnessError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    /// current views, rebinding first if the core has reallocated
    fn bound_views(&mut self) -> Result<Views, HarnessError> {
        match self.views {
            Some(views) if views.is_current(self.core.linear_memory()) => Ok(views),
            _ => {
                debug!(generation = self.core.linear_memory().generation(), "binding views");
                let views = bind_views(self.core.linear_memory(), &self.core)?;
                self.views = Some(views);
                Ok(views)
            }
        }
    }

    /// bind views and copy the font in; must happen before anything else
    pub fn start(&mut self) -> Result<(), HarnessError> {
        self.expect_state(DriverState::Unstarted, "start")?;
        let views = self.bound_views()?;
        loader::copy_font(self.core.linear_memory_mut(), &views)?;
        self.transition(DriverState::Loading);
        Ok(())
    }

    /// copy the program image in at 0x200; the loop may run after this
    pub fn load_program(&mut self, image: &[u8]) -> Result<(), HarnessError> {
        self.expect_state(DriverState::Loading, "load a program")?;
        let views = self.bound_views()?;
        loader::load_program(self.core.linear_memory_mut(), &views, image)?;
        info!(len = image.len(), "program loaded");
        self.transition(DriverState::Running);
        Ok(())
    }

    /// wait for a background fetch to land, then load it
    pub fn await_program(&mut self, pending: PendingProgram) -> Result<(), HarnessError> {
        self.expect_state(DriverState::Loading, "load a program")?;
        let image = pending.wait()?;
        self.load_program(&image)
    }

    /// apply a key event to the input latches
    pub fn handle_key(&mut self, event: KeyEvent) -> Result<Option<u8>, HarnessError> {
        if self.state == DriverState::Unstarted {
            return Err(HarnessError::InvalidState {
                action: "take input",
                state: self.state,
            });
        }
        let views = self.bound_views()?;
        Ok(self
            .translator
            .apply(self.core.linear_memory_mut(), &views, event)?)
    }

    /// snapshot of V0-VF, I and PC
    pub fn diagnostics(&mut self) -> Result<Diagnostics, HarnessError> {
        let views = self.bound_views()?;
        let mut registers = [0u8; REGISTER_COUNT];
        registers.copy_from_slice(views.registers.bytes(self.core.linear_memory())?);
        Ok(Diagnostics {
            registers,
            index: self.core.index_counter(),
            program_counter: self.core.program_counter(),
        })
    }

    fn report_tone<A: Sound + ?Sized>(&mut self, sound: &mut A) {
        let wanted = self.core.should_play_tone();
        if wanted == self.tone {
            return;
        }
        self.tone = wanted;
        let result = if wanted {
            sound.start_tone()
        } else {
            sound.stop_tone()
        };
        if let Err(e) = result {
            warn!("{}", e);
        }
    }

    /// One frame: a batch of steps, then the timers, then present.
    ///
    /// Returns `Stopped` without touching the core if the stop handle has
    /// been tripped. A core failure stops the harness and the half-finished
    /// frame is never presented.
    pub fn tick<S, A>(&mut self, surface: &mut S, sound: &mut A) -> Result<TickStatus, HarnessError>
    where
        S: Surface + ?Sized,
        A: Sound + ?Sized,
    {
        if self.stop.is_stopped() || self.state == DriverState::Stopped {
            self.stop();
            return Ok(TickStatus::Stopped);
        }
        self.expect_state(DriverState::Running, "tick")?;

        for _ in 0..self.config.steps_per_tick {
            let views = self.bound_views()?;
            let framebuffer = views.framebuffer.bytes(self.core.linear_memory())?;
            render_frame(framebuffer, surface, self.config.cell_size);
            if self.config.diagnostics {
                let d = self.diagnostics()?;
                surface.show_diagnostics(&d);
            }
            if self.config.sound {
                self.report_tone(sound);
            }
            if let Err(e) = self.core.step_cycle() {
                error!(error = %e, tick = self.ticks, "core failed, stopping");
                self.stop();
                return Err(e.into());
            }
        }
        self.core.decrement_timers();
        surface.present().map_err(HarnessError::Display)?;

        self.ticks += 1;
        trace!(
            tick = self.ticks,
            pc = self.core.program_counter(),
            "tick complete"
        );
        Ok(TickStatus::Ran)
    }

    /// Drive the loop until stopped: drain host events, tick, wait for the
    /// next frame. Ends cleanly on a quit event, the stop handle, or
    /// `max_ticks`; ends with an error if the core or the host fails.
    pub fn run<S, A, E, K>(
        &mut self,
        surface: &mut S,
        sound: &mut A,
        events: &mut E,
        clock: &mut K,
    ) -> Result<(), HarnessError>
    where
        S: Surface + ?Sized,
        A: Sound + ?Sized,
        E: EventSource + ?Sized,
        K: FrameClock + ?Sized,
    {
        debug!(
            steps_per_tick = self.config.steps_per_tick,
            frame_rate = self.config.frame_rate,
            "render loop starting"
        );
        let result = self.run_loop(surface, sound, events, clock);
        if self.tone {
            self.tone = false;
            if let Err(e) = sound.stop_tone() {
                warn!("could not silence tone: {}", e);
            }
        }
        info!(ticks = self.ticks, "render loop finished");
        result
    }

    fn run_loop<S, A, E, K>(
        &mut self,
        surface: &mut S,
        sound: &mut A,
        events: &mut E,
        clock: &mut K,
    ) -> Result<(), HarnessError>
    where
        S: Surface + ?Sized,
        A: Sound + ?Sized,
        E: EventSource + ?Sized,
        K: FrameClock + ?Sized,
    {
        loop {
            for event in events.poll().map_err(HarnessError::Input)? {
                match event {
                    HostEvent::Key(key) => {
                        self.handle_key(key)?;
                    }
                    HostEvent::Quit => {
                        info!("quit requested");
                        self.stop.stop();
                    }
                }
            }

            if self.tick(surface, sound)? == TickStatus::Stopped {
                return Ok(());
            }
            if let Some(max) = self.config.max_ticks {
                if self.ticks >= max {
                    self.stop();
                    return Ok(());
                }
            }
            clock.wait_next_frame();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{Paint, RecordingSurface};
    use crate::error::{CoreError, LoadError};
    use crate::input::ScriptedInput;
    use crate::memory::{LinearMemory, MemoryRegions};
    use crate::sound::{Mute, SoundError, ToneRecorder};
    use pretty_assertions::assert_eq;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Call {
        Step,
        Timers,
    }

    /// no-op core that writes down what the harness asked of it
    struct RecordingCore {
        mem: LinearMemory,
        calls: Vec<Call>,
        fail_on_step: Option<usize>,
        grow_on_step: Option<usize>,
        tone: bool,
    }

    impl RecordingCore {
        fn new() -> Self {
            let mut mem = LinearMemory::new(0x1870);
            mem.as_mut_slice()[0x1000..0x1050].fill(0xab);
            RecordingCore {
                mem,
                calls: Vec::new(),
                fail_on_step: None,
                grow_on_step: None,
                tone: false,
            }
        }

        fn steps(&self) -> usize {
            self.calls.iter().filter(|&&c| c == Call::Step).count()
        }
    }

    impl MemoryRegions for RecordingCore {
        fn memory_offset(&self) -> usize {
            0x0000
        }
        fn font_offset(&self) -> usize {
            0x1000
        }
        fn framebuffer_offset(&self) -> usize {
            0x1050
        }
        fn registers_offset(&self) -> usize {
            0x1850
        }
        fn input_offset(&self) -> Option<usize> {
            Some(0x1860)
        }
    }

    impl Core for RecordingCore {
        fn linear_memory(&self) -> &LinearMemory {
            &self.mem
        }
        fn linear_memory_mut(&mut self) -> &mut LinearMemory {
            &mut self.mem
        }
        fn step_cycle(&mut self) -> Result<(), CoreError> {
            self.calls.push(Call::Step);
            let n = self.steps();
            if self.grow_on_step == Some(n) {
                self.mem.resize(self.mem.len() + 0x10);
            }
            if self.fail_on_step == Some(n) {
                return Err(CoreError::InvalidOpcode {
                    opcode: 0xffff,
                    pc: 0x200,
                });
            }
            Ok(())
        }
        fn decrement_timers(&mut self) {
            self.calls.push(Call::Timers);
        }
        fn should_play_tone(&self) -> bool {
            self.tone
        }
        fn index_counter(&self) -> u16 {
            0x0123
        }
        fn program_counter(&self) -> u16 {
            0x0200
        }
    }

    /// a speaker that is never there
    struct Broken {
        attempts: usize,
    }

    impl Sound for Broken {
        fn start_tone(&mut self) -> Result<(), SoundError> {
            self.attempts += 1;
            Err(SoundError::new("speaker unplugged"))
        }
        fn stop_tone(&mut self) -> Result<(), SoundError> {
            self.attempts += 1;
            Err(SoundError::new("speaker unplugged"))
        }
    }

    fn running(core: RecordingCore, config: HarnessConfig) -> Harness<RecordingCore> {
        let mut h = Harness::create(core, Keymap::default(), config);
        h.start().unwrap();
        h.load_program(&[0x12, 0x00]).unwrap();
        h
    }

    #[test]
    fn test_lifecycle() -> Result<(), HarnessError> {
        let mut h = Harness::create(RecordingCore::new(), Keymap::default(), HarnessConfig::default());
        assert_eq!(h.state(), DriverState::Unstarted);
        assert!(matches!(
            h.tick(&mut RecordingSurface::new(), &mut Mute),
            Err(HarnessError::InvalidState {
                state: DriverState::Unstarted,
                ..
            })
        ));
        h.start()?;
        assert_eq!(h.state(), DriverState::Loading);
        assert_eq!(&h.core().mem.as_slice()[..80], &[0xab; 80][..]);
        h.load_program(&[0x00, 0xe0])?;
        assert_eq!(h.state(), DriverState::Running);
        assert_eq!(&h.core().mem.as_slice()[0x200..0x202], &[0x00, 0xe0]);
        assert!(h.start().is_err());
        Ok(())
    }

    #[test]
    fn test_tick_steps_then_timers() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default());
        assert_eq!(h.tick(&mut RecordingSurface::new(), &mut Mute)?, TickStatus::Ran);
        let mut expected = vec![Call::Step; 10];
        expected.push(Call::Timers);
        assert_eq!(h.core().calls, expected);
        assert_eq!(h.ticks(), 1);
        Ok(())
    }

    #[test]
    fn test_tick_batch_size_configurable() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default().steps_per_tick(3));
        let mut s = RecordingSurface::new();
        h.tick(&mut s, &mut Mute)?;
        h.tick(&mut s, &mut Mute)?;
        use Call::*;
        assert_eq!(h.core().calls, vec![Step, Step, Step, Timers, Step, Step, Step, Timers]);
        Ok(())
    }

    #[test]
    fn test_tick_renders_each_step_presents_once() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default());
        h.core_mut().mem.as_mut_slice()[0x1050 + 6] = 1;
        let mut s = RecordingSurface::new();
        h.tick(&mut s, &mut Mute)?;
        assert_eq!(s.count(|c| *c == Paint::Clear), 10);
        assert_eq!(s.count(|c| *c == Paint::Present), 1);
        assert_eq!(s.calls.last(), Some(&Paint::Present));
        assert_eq!(s.rects(), vec![(30, 0, 5, 5)]);
        Ok(())
    }

    #[test]
    fn test_stop_before_tick() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default());
        h.stop_handle().stop();
        let mut s = RecordingSurface::new();
        assert_eq!(h.tick(&mut s, &mut Mute)?, TickStatus::Stopped);
        assert!(h.core().calls.is_empty());
        assert!(s.calls.is_empty());
        assert_eq!(h.state(), DriverState::Stopped);
        Ok(())
    }

    #[test]
    fn test_stop_from_another_thread() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default());
        let handle = h.stop_handle();
        h.tick(&mut RecordingSurface::new(), &mut Mute)?;
        std::thread::spawn(move || handle.stop()).join().unwrap();
        assert_eq!(h.tick(&mut RecordingSurface::new(), &mut Mute)?, TickStatus::Stopped);
        assert_eq!(h.ticks(), 1);
        Ok(())
    }

    #[test]
    fn test_core_failure_stops_loop() {
        let mut core = RecordingCore::new();
        core.fail_on_step = Some(4);
        let mut h = running(core, HarnessConfig::default());
        let mut s = RecordingSurface::new();
        let err = h.tick(&mut s, &mut Mute).unwrap_err();
        assert!(matches!(err, HarnessError::Core(CoreError::InvalidOpcode { .. })));
        assert_eq!(h.state(), DriverState::Stopped);
        assert_eq!(h.core().calls, vec![Call::Step; 4]);
        assert_eq!(s.count(|c| *c == Paint::Present), 0);
        // and it stays down
        assert_eq!(h.tick(&mut s, &mut Mute).ok(), Some(TickStatus::Stopped));
        assert_eq!(h.core().steps(), 4);
    }

    #[test]
    fn test_run_bounded_ticks() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default().max_ticks(Some(3)));
        let mut input = ScriptedInput::default();
        h.run(&mut RecordingSurface::new(), &mut Mute, &mut input, &mut Unpaced)?;
        assert_eq!(h.ticks(), 3);
        assert_eq!(h.core().steps(), 30);
        assert_eq!(h.core().calls.iter().filter(|&&c| c == Call::Timers).count(), 3);
        assert_eq!(h.state(), DriverState::Stopped);
        Ok(())
    }

    #[test]
    fn test_run_quits_on_quit_event() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default());
        let mut input = ScriptedInput::new([vec![], vec![HostEvent::Quit]]);
        h.run(&mut RecordingSurface::new(), &mut Mute, &mut input, &mut Unpaced)?;
        assert_eq!(h.ticks(), 1);
        assert_eq!(h.state(), DriverState::Stopped);
        Ok(())
    }

    #[test]
    fn test_run_applies_keys_between_ticks() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default().max_ticks(Some(2)));
        let mut input = ScriptedInput::new([
            vec![HostEvent::Key(KeyEvent::press('1')), HostEvent::Key(KeyEvent::press('v'))],
            vec![HostEvent::Key(KeyEvent::release('1'))],
        ]);
        h.run(&mut RecordingSurface::new(), &mut Mute, &mut input, &mut Unpaced)?;
        let latches = &h.core().mem.as_slice()[0x1860..0x1870];
        assert_eq!(latches[1], 0);
        assert_eq!(latches[15], 1);
        Ok(())
    }

    #[test]
    fn test_key_before_start_rejected() {
        let mut h = Harness::create(RecordingCore::new(), Keymap::default(), HarnessConfig::default());
        assert!(h.handle_key(KeyEvent::press('1')).is_err());
    }

    #[test]
    fn test_diagnostics_reported() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default().diagnostics(true));
        h.core_mut().mem.as_mut_slice()[0x1850 + 3] = 7;
        let mut s = RecordingSurface::new();
        h.tick(&mut s, &mut Mute)?;
        assert_eq!(s.count(|c| matches!(c, Paint::Diagnostics(_))), 10);
        let d = s.last_diagnostics().unwrap();
        assert_eq!(d.registers[3], 7);
        assert_eq!((d.index, d.program_counter), (0x123, 0x200));
        Ok(())
    }

    #[test]
    fn test_diagnostics_off_by_default() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default());
        let mut s = RecordingSurface::new();
        h.tick(&mut s, &mut Mute)?;
        assert_eq!(s.last_diagnostics(), None);
        Ok(())
    }

    #[test]
    fn test_tone_reported_on_edges() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default().sound(true));
        let mut tone = ToneRecorder::new();
        let mut s = RecordingSurface::new();
        h.core_mut().tone = true;
        h.tick(&mut s, &mut tone)?;
        h.tick(&mut s, &mut tone)?;
        h.core_mut().tone = false;
        h.tick(&mut s, &mut tone)?;
        assert_eq!((tone.starts, tone.stops), (1, 1));
        Ok(())
    }

    #[test]
    fn test_tone_silenced_when_run_ends() -> Result<(), HarnessError> {
        let mut core = RecordingCore::new();
        core.tone = true;
        let mut h = running(core, HarnessConfig::default().sound(true).max_ticks(Some(1)));
        let mut tone = ToneRecorder::new();
        h.run(&mut RecordingSurface::new(), &mut tone, &mut ScriptedInput::default(), &mut Unpaced)?;
        assert_eq!((tone.starts, tone.stops), (1, 1));
        Ok(())
    }

    #[test]
    fn test_sound_failure_does_not_stop_run() -> Result<(), HarnessError> {
        let mut h = running(RecordingCore::new(), HarnessConfig::default().sound(true));
        let mut broken = Broken { attempts: 0 };
        let mut s = RecordingSurface::new();
        h.core_mut().tone = true;
        assert_eq!(h.tick(&mut s, &mut broken)?, TickStatus::Ran);
        h.core_mut().tone = false;
        assert_eq!(h.tick(&mut s, &mut broken)?, TickStatus::Ran);
        h.core_mut().tone = true;
        h.config.max_ticks = Some(5);
        h.run(&mut s, &mut broken, &mut ScriptedInput::default(), &mut Unpaced)?;
        assert_eq!(h.ticks(), 5);
        assert_eq!(h.core().steps(), 50);
        // start, stop, start again, then the silence when the run ends
        assert_eq!(broken.attempts, 4);
        Ok(())
    }

    #[test]
    fn test_rebinds_after_reallocation() -> Result<(), HarnessError> {
        let mut core = RecordingCore::new();
        core.grow_on_step = Some(5);
        let mut h = running(core, HarnessConfig::default());
        let before = *h.views().unwrap();
        assert_eq!(h.tick(&mut RecordingSurface::new(), &mut Mute)?, TickStatus::Ran);
        let after = *h.views().unwrap();
        assert_ne!(before, after);
        assert!(after.is_current(h.core().linear_memory()));
        // program survived the move
        assert_eq!(&h.core().mem.as_slice()[0x200..0x202], &[0x12, 0x00]);
        Ok(())
    }

    #[test]
    fn test_oversized_program_rejected() {
        let mut h = Harness::create(RecordingCore::new(), Keymap::default(), HarnessConfig::default());
        h.start().unwrap();
        let err = h.load_program(&vec![0u8; 4096]).unwrap_err();
        assert!(matches!(err, HarnessError::Load(LoadError::Overflow { .. })));
        assert_eq!(h.state(), DriverState::Loading);
    }

    #[test]
    fn test_paced_clock_waits() {
        let mut clock = PacedClock::new(200);
        let start = Instant::now();
        clock.wait_next_frame();
        clock.wait_next_frame();
        assert!(start.elapsed() >= Duration::from_millis(9));
    }
}
