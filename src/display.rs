use std::io;
use tui::backend::CrosstermBackend;
use tui::layout::Rect;
use tui::style::{Color, Style};
use tui::symbols::Marker;
use tui::widgets::canvas::{Canvas, Points};
use tui::widgets::{Block, Borders};
use tui::Terminal;

/// pixels across
pub const COLUMNS: usize = 64;
/// pixels down
pub const ROWS: usize = 32;
pub const PIXEL_COUNT: usize = COLUMNS * ROWS;

pub const ON_COLOUR: Color = Color::White;
pub const OFF_COLOUR: Color = Color::Black;

/// Where each pixel lands on the drawing surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub columns: usize,
    pub rows: usize,
    /// device units per pixel, across
    pub pixel_width: u16,
    /// device units per pixel, down
    pub pixel_height: u16,
}

impl Geometry {
    /// 64x32 pixels on a 640x480 canvas
    pub const CHIP8: Geometry = Geometry {
        columns: COLUMNS,
        rows: ROWS,
        pixel_width: 10,
        pixel_height: 15,
    };

    pub fn pixel_count(&self) -> usize {
        self.columns * self.rows
    }

    /// index `i` is column `i mod columns`, row `i / columns`
    pub fn column_row(&self, i: usize) -> (usize, usize) {
        (i % self.columns, i / self.columns)
    }

    /// device rectangle covered by pixel `i`
    pub fn rect_for(&self, i: usize) -> Rect {
        let (x, y) = self.column_row(i);
        Rect::new(
            x as u16 * self.pixel_width,
            y as u16 * self.pixel_height,
            self.pixel_width,
            self.pixel_height,
        )
    }

    /// the whole canvas
    pub fn canvas(&self) -> Rect {
        Rect::new(
            0,
            0,
            self.columns as u16 * self.pixel_width,
            self.rows as u16 * self.pixel_height,
        )
    }

    fn x_bounds(&self) -> [f64; 2] {
        [0.0, (self.columns - 1) as f64]
    }

    fn y_bounds(&self) -> [f64; 2] {
        [-1.0 * (self.rows - 1) as f64, 0.0]
    }
}

/// Something that can paint rectangles. The framebuffer only ever talks to
/// its surface through this, so a variety of kinds of screen would work.
pub trait Surface {
    /// paint a rectangle in device units
    fn fill_rect(&mut self, rect: Rect, colour: Color) -> Result<(), io::Error>;

    /// push whatever has been painted out to the screen
    fn present(&mut self) -> Result<(), io::Error>;
}

/// The host-side mirror of the machine's display.
///
/// `flip` and `draw` are separate so a batch of pixels can be flipped and
/// then only the changed ones redrawn; a flip isn't visible until its pixel
/// is drawn.
pub struct Framebuffer<S: Surface> {
    pixels: [bool; PIXEL_COUNT],
    geometry: Geometry,
    surface: S,
}

impl<S: Surface> Framebuffer<S> {
    /// all pixels off, surface cleared to match
    pub fn new(mut surface: S) -> Result<Framebuffer<S>, io::Error> {
        let geometry = Geometry::CHIP8;
        surface.fill_rect(geometry.canvas(), OFF_COLOUR)?;
        Ok(Framebuffer {
            pixels: [false; PIXEL_COUNT],
            geometry,
            surface,
        })
    }

    /// Toggle pixel `i`. Panics unless `i < PIXEL_COUNT`.
    pub fn flip(&mut self, i: usize) {
        self.pixels[i] = !self.pixels[i];
    }

    pub fn pixel(&self, i: usize) -> bool {
        self.pixels[i]
    }

    /// paint pixel `i` in its current state
    pub fn draw(&mut self, i: usize) -> Result<(), io::Error> {
        let colour = if self.pixels[i] { ON_COLOUR } else { OFF_COLOUR };
        self.surface.fill_rect(self.geometry.rect_for(i), colour)
    }

    /// Bring the framebuffer in line with `frame`, flipping and drawing only
    /// the pixels that differ. Returns how many changed.
    pub fn apply_frame(&mut self, frame: &[bool; PIXEL_COUNT]) -> Result<usize, io::Error> {
        let changed: Vec<usize> = (0..PIXEL_COUNT)
            .filter(|&i| self.pixels[i] != frame[i])
            .collect();
        for &i in &changed {
            self.flip(i);
        }
        for &i in &changed {
            self.draw(i)?;
        }
        Ok(changed.len())
    }

    pub fn present(&mut self) -> Result<(), io::Error> {
        self.surface.present()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }
}

/// monochrome surface in a terminal, rendered using TUI and crossterm; one
/// terminal cell per pixel
pub struct TermSurface {
    terminal: Terminal<CrosstermBackend<io::Stdout>>,
    geometry: Geometry,
    cells: Vec<Color>,
}

impl TermSurface {
    pub fn new(geometry: Geometry) -> Result<TermSurface, io::Error> {
        let backend = CrosstermBackend::new(io::stdout());
        let mut terminal = Terminal::new(backend)?;
        terminal.clear()?;
        terminal.hide_cursor()?;
        Ok(TermSurface {
            terminal,
            geometry,
            cells: vec![OFF_COLOUR; geometry.pixel_count()],
        })
    }

    fn points(&self, colour: Color) -> Vec<(f64, f64)> {
        let g = self.geometry;
        self.cells
            .iter()
            .enumerate()
            .filter(|(_, c)| **c == colour)
            .map(|(i, _)| {
                let (x, y) = g.column_row(i);
                (x as f64, -1.0 * y as f64)
            })
            .collect()
    }
}

impl Surface for TermSurface {
    fn fill_rect(&mut self, rect: Rect, colour: Color) -> Result<(), io::Error> {
        // map device units back onto the cells they cover
        let g = self.geometry;
        let x0 = (rect.x / g.pixel_width) as usize;
        let y0 = (rect.y / g.pixel_height) as usize;
        let x1 = ((rect.x + rect.width + g.pixel_width - 1) / g.pixel_width) as usize;
        let y1 = ((rect.y + rect.height + g.pixel_height - 1) / g.pixel_height) as usize;
        for y in y0..y1.min(g.rows) {
            for x in x0..x1.min(g.columns) {
                self.cells[y * g.columns + x] = colour;
            }
        }
        Ok(())
    }

    fn present(&mut self) -> Result<(), io::Error> {
        let off = self.points(OFF_COLOUR);
        let on = self.points(ON_COLOUR);
        let g = self.geometry;
        self.terminal.draw(|f| {
            let size = Rect::new(0, 0, 2 + g.columns as u16, 2 + g.rows as u16);
            let canvas = Canvas::default()
                .block(
                    Block::default()
                        .title("CHIP-8")
                        .borders(Borders::ALL)
                        .style(Style::default().bg(OFF_COLOUR)),
                )
                .x_bounds(g.x_bounds())
                .y_bounds(g.y_bounds())
                .marker(Marker::Block)
                .paint(|ctx| {
                    ctx.draw(&Points {
                        coords: &off,
                        color: OFF_COLOUR,
                    });
                    ctx.draw(&Points {
                        coords: &on,
                        color: ON_COLOUR,
                    });
                });
            f.render_widget(canvas, size);
        })?;
        Ok(())
    }
}

impl Drop for TermSurface {
    fn drop(&mut self) {
        let _ = self.terminal.show_cursor();
    }
}

/// Surface that remembers what it was asked to paint. Useful headless and for
/// testing non-display routines.
#[derive(Debug, Default)]
pub struct RecordingSurface {
    fills: Vec<(Rect, Color)>,
    presents: usize,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fills(&self) -> &[(Rect, Color)] {
        &self.fills
    }

    /// colour most recently painted at exactly `rect`
    pub fn last_fill(&self, rect: Rect) -> Option<Color> {
        self.fills
            .iter()
            .rev()
            .find(|(r, _)| *r == rect)
            .map(|(_, c)| *c)
    }

    pub fn presents(&self) -> usize {
        self.presents
    }

    /// forget what has been painted so far
    pub fn take_fills(&mut self) -> Vec<(Rect, Color)> {
        std::mem::take(&mut self.fills)
    }
}

impl Surface for RecordingSurface {
    fn fill_rect(&mut self, rect: Rect, colour: Color) -> Result<(), io::Error> {
        self.fills.push((rect, colour));
        Ok(())
    }

    fn present(&mut self) -> Result<(), io::Error> {
        self.presents += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framebuffer() -> Framebuffer<RecordingSurface> {
        Framebuffer::new(RecordingSurface::new()).unwrap()
    }

    // Geometry tests
    #[test]
    fn test_pixel_count() {
        assert_eq!(Geometry::CHIP8.pixel_count(), 2048)
    }

    #[test]
    fn test_canvas_is_640_by_480() {
        assert_eq!(Geometry::CHIP8.canvas(), Rect::new(0, 0, 640, 480));
    }

    #[test]
    fn test_x_bounds() {
        assert_eq!(Geometry::CHIP8.x_bounds(), [0.0, 63.0]);
    }

    #[test]
    fn test_y_bounds() {
        assert_eq!(Geometry::CHIP8.y_bounds(), [-31.0, 0.0]);
    }

    #[test]
    fn test_index_mapping() {
        let g = Geometry::CHIP8;
        assert_eq!(g.column_row(0), (0, 0));
        assert_eq!(g.column_row(63), (63, 0));
        assert_eq!(g.column_row(64), (0, 1));
        assert_eq!(g.column_row(2047), (63, 31));
        assert_eq!(g.rect_for(65), Rect::new(10, 15, 10, 15));
        assert_eq!(g.rect_for(2047), Rect::new(630, 465, 10, 15));
    }

    // Framebuffer tests
    #[test]
    fn test_starts_cleared() {
        let fb = framebuffer();
        assert!((0..PIXEL_COUNT).all(|i| !fb.pixel(i)));
        assert_eq!(
            fb.surface().fills(),
            &[(Rect::new(0, 0, 640, 480), OFF_COLOUR)]
        );
    }

    #[test]
    fn test_flip_twice_restores() {
        let mut fb = framebuffer();
        for i in [0, 1, 64, 1000, 2047] {
            fb.flip(i);
            assert!(fb.pixel(i));
            fb.flip(i);
            assert!(!fb.pixel(i));
        }
    }

    #[test]
    fn test_flip_is_invisible_until_drawn() {
        let mut fb = framebuffer();
        fb.flip(5);
        assert_eq!(fb.surface().fills().len(), 1);
        fb.draw(5).unwrap();
        assert_eq!(
            fb.surface().last_fill(Geometry::CHIP8.rect_for(5)),
            Some(ON_COLOUR)
        );
    }

    #[test]
    fn test_draw_after_flip_is_complementary() {
        let mut fb = framebuffer();
        let rect = Geometry::CHIP8.rect_for(300);
        fb.draw(300).unwrap();
        let before = fb.surface().last_fill(rect).unwrap();
        fb.flip(300);
        fb.draw(300).unwrap();
        let after = fb.surface().last_fill(rect).unwrap();
        assert_ne!(before, after);
        assert_eq!(after, ON_COLOUR);
    }

    #[test]
    #[should_panic]
    fn test_flip_out_of_range_panics() {
        let mut fb = framebuffer();
        fb.flip(PIXEL_COUNT);
    }

    #[test]
    fn test_apply_frame_draws_only_changes() {
        let mut fb = framebuffer();
        let mut frame = [false; PIXEL_COUNT];
        frame[3] = true;
        frame[2000] = true;
        fb.surface.take_fills();

        assert_eq!(fb.apply_frame(&frame).unwrap(), 2);
        assert!(fb.pixel(3) && fb.pixel(2000));
        assert_eq!(fb.surface().fills().len(), 2);

        // nothing differs the second time round
        assert_eq!(fb.apply_frame(&frame).unwrap(), 0);
        assert_eq!(fb.surface().fills().len(), 2);

        frame[3] = false;
        assert_eq!(fb.apply_frame(&frame).unwrap(), 1);
        assert_eq!(
            fb.surface().last_fill(Geometry::CHIP8.rect_for(3)),
            Some(OFF_COLOUR)
        );
    }

    #[test]
    fn test_present_reaches_surface() {
        let mut fb = framebuffer();
        fb.present().unwrap();
        assert_eq!(fb.surface().presents(), 1);
    }
}
