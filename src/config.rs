/// instruction steps per rendered frame
pub const DEFAULT_STEPS_PER_TICK: usize = 10;
/// surface pixels per machine pixel
pub const DEFAULT_CELL_SIZE: u32 = 5;
/// host frames per second
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Knobs for a harness run. The keymap is not one of them; see `input`.
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub steps_per_tick: usize,
    pub cell_size: u32,
    pub frame_rate: u32,
    /// push register state to the surface every step
    pub diagnostics: bool,
    /// forward the core's tone signal to the sound sink
    pub sound: bool,
    /// stop after this many ticks; run until told otherwise if `None`
    pub max_ticks: Option<u64>,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        HarnessConfig {
            steps_per_tick: DEFAULT_STEPS_PER_TICK,
            cell_size: DEFAULT_CELL_SIZE,
            frame_rate: DEFAULT_FRAME_RATE,
            diagnostics: false,
            sound: false,
            max_ticks: None,
        }
    }
}

impl HarnessConfig {
    pub fn steps_per_tick(mut self, steps: usize) -> Self {
        self.steps_per_tick = steps;
        self
    }

    pub fn cell_size(mut self, size: u32) -> Self {
        self.cell_size = size;
        self
    }

    pub fn frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps;
        self
    }

    pub fn diagnostics(mut self, on: bool) -> Self {
        self.diagnostics = on;
        self
    }

    pub fn sound(mut self, on: bool) -> Self {
        self.sound = on;
        self
    }

    pub fn max_ticks(mut self, ticks: Option<u64>) -> Self {
        self.max_ticks = ticks;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = HarnessConfig::default();
        assert_eq!(c.steps_per_tick, 10);
        assert_eq!(c.cell_size, 5);
        assert_eq!(c.frame_rate, 60);
        assert!(!c.diagnostics && !c.sound);
        assert_eq!(c.max_ticks, None);
    }

    #[test]
    fn test_builder() {
        let c = HarnessConfig::default()
            .steps_per_tick(1)
            .diagnostics(true)
            .max_ticks(Some(3));
        assert_eq!(c.steps_per_tick, 1);
        assert!(c.diagnostics);
        assert_eq!(c.max_ticks, Some(3));
        assert_eq!(c.cell_size, 5);
    }
}
