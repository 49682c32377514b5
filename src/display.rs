use std::fmt;
use std::io;
use tui::backend::CrosstermBackend;
use tui::layout::Rect;
use tui::style::{Color, Style};
use tui::symbols::Marker;
use tui::widgets::canvas::{Canvas, Points};
use tui::widgets::{Block, Borders, Paragraph};
use tui::Terminal;

use crate::memory::{FRAMEBUFFER_WIDTH, REGISTER_COUNT};

/// Surface is what the renderer paints the framebuffer onto. It should
/// abstract the implementation details, so a variety of kinds of screen would
/// work.
pub trait Surface {
    /// wipe back to background
    fn clear(&mut self);

    /// paint one lit cell, in surface pixels
    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32);

    /// surfaces without a diagnostic panel just drop these
    fn show_diagnostics(&mut self, _diagnostics: &Diagnostics) {}

    /// push everything painted since the last clear out to the host
    fn present(&mut self) -> Result<(), io::Error>;
}

/// Paint the framebuffer: clear, then one `cell_size` square per lit cell at
/// `(col * cell_size, row * cell_size)`. Any nonzero byte is lit. Returns how
/// many cells were painted.
pub fn render_frame<S>(framebuffer: &[u8], surface: &mut S, cell_size: u32) -> usize
where
    S: Surface + ?Sized,
{
    surface.clear();
    let mut lit = 0;
    for (i, _) in framebuffer.iter().enumerate().filter(|&(_, &px)| px != 0) {
        let row = (i / FRAMEBUFFER_WIDTH) as u32;
        let col = (i % FRAMEBUFFER_WIDTH) as u32;
        surface.fill_rect(col * cell_size, row * cell_size, cell_size, cell_size);
        lit += 1;
    }
    lit
}

/// Register snapshot for the diagnostic panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Diagnostics {
    pub registers: [u8; REGISTER_COUNT],
    pub index: u16,
    pub program_counter: u16,
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (n, v) in self.registers.iter().enumerate() {
            writeln!(f, "V{:X}  {:02x}", n, v)?;
        }
        writeln!(f, "I   {:03x}", self.index)?;
        write!(f, "PC  {:03x}", self.program_counter)
    }
}

// machine columns, machine rows, surface pixels per machine pixel
struct Resolution(u32, u32, u32);

impl Resolution {
    fn x_bounds(&self) -> [f64; 2] {
        [0.0, (self.0 - 1) as f64]
    }

    fn y_bounds(&self) -> [f64; 2] {
        [-1.0 * (self.1 - 1) as f64, 0.0]
    }

    /// canvas coordinates of the machine pixel a rect was painted for
    fn point(&self, x: u32, y: u32) -> (f64, f64) {
        ((x / self.2) as f64, -1.0 * (y / self.2) as f64)
    }
}

/// monochrome display in a terminal, rendered using TUI and crossterm; one
/// terminal cell per machine pixel, with the register panel to the right
pub struct TermSurface {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    resolution: Resolution,
    points: Vec<(f64, f64)>,
    diagnostics: Option<Diagnostics>,
}

impl TermSurface {
    pub fn new(cols: u32, rows: u32, cell_size: u32) -> Result<TermSurface, io::Error> {
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(TermSurface {
            terminal,
            resolution: Resolution(cols, rows, cell_size.max(1)),
            points: Vec::new(),
            diagnostics: None,
        })
    }
}

impl Drop for TermSurface {
    fn drop(&mut self) {
        let _ = self.terminal.show_cursor();
    }
}

impl Surface for TermSurface {
    fn clear(&mut self) {
        self.points.clear();
    }

    fn fill_rect(&mut self, x: u32, y: u32, _width: u32, _height: u32) {
        let p = self.resolution.point(x, y);
        self.points.push(p);
    }

    fn show_diagnostics(&mut self, diagnostics: &Diagnostics) {
        self.diagnostics = Some(*diagnostics);
    }

    fn present(&mut self) -> Result<(), io::Error> {
        let resolution = &self.resolution;
        let coords = &self.points;
        let diagnostics = self.diagnostics;
        self.terminal.draw(|f| {
            let screen = f.size();
            let size = Rect::new(0, 0, 2 + resolution.0 as u16, 2 + resolution.1 as u16);

            let canvas = Canvas::default()
                .block(
                    Block::default()
                        .title("CHIP-8")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(Color::Black)),
                )
                .x_bounds(resolution.x_bounds())
                .y_bounds(resolution.y_bounds())
                .marker(Marker::Block)
                .paint(|ctx| {
                    ctx.draw(&Points {
                        coords: coords.as_slice(),
                        color: Color::White,
                    });
                });
            f.render_widget(canvas, size.intersection(screen));

            if let Some(d) = diagnostics {
                let panel = Rect::new(size.width, 0, 12, size.height);
                let regs = Paragraph::new(d.to_string())
                    .block(Block::default().title("regs").borders(Borders::ALL));
                f.render_widget(regs, panel.intersection(screen));
            }
        })?;
        Ok(())
    }
}

/// One call made against a [`RecordingSurface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    Clear,
    Rect {
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
    Diagnostics(Diagnostics),
    Present,
}

/// useful for testing non-display routines
#[derive(Debug, Default)]
pub struct RecordingSurface {
    pub calls: Vec<Paint>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        RecordingSurface::default()
    }

    /// rectangles painted since the last clear
    pub fn rects(&self) -> Vec<(u32, u32, u32, u32)> {
        let since = self
            .calls
            .iter()
            .rposition(|c| *c == Paint::Clear)
            .map_or(0, |i| i + 1);
        self.calls[since..]
            .iter()
            .filter_map(|c| match *c {
                Paint::Rect {
                    x,
                    y,
                    width,
                    height,
                } => Some((x, y, width, height)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, kind: fn(&Paint) -> bool) -> usize {
        self.calls.iter().filter(|c| kind(c)).count()
    }

    pub fn last_diagnostics(&self) -> Option<Diagnostics> {
        self.calls.iter().rev().find_map(|c| match c {
            Paint::Diagnostics(d) => Some(*d),
            _ => None,
        })
    }
}

impl Surface for RecordingSurface {
    fn clear(&mut self) {
        self.calls.push(Paint::Clear);
    }

    fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32) {
        self.calls.push(Paint::Rect {
            x,
            y,
            width,
            height,
        });
    }

    fn show_diagnostics(&mut self, diagnostics: &Diagnostics) {
        self.calls.push(Paint::Diagnostics(*diagnostics));
    }

    fn present(&mut self) -> Result<(), io::Error> {
        self.calls.push(Paint::Present);
        Ok(())
    }
}
