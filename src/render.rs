//! Paints the terminal model onto the hosting tty via crossterm.

use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::queue;
use crossterm::style::{
    Attribute, Attributes, Color, Print, SetAttribute, SetAttributes, SetBackgroundColor,
    SetForegroundColor,
};
use crossterm::terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen};
use failure::Error;
use std::io::{self, Stdout, Write};
use term::color::ColorAttribute;
use term::{Cell, GlyphAttrs, Terminal, TerminalMode};

pub struct Renderer {
    out: Stdout,
}

impl Renderer {
    /// Put the hosting terminal into raw mode on its alternate screen.
    pub fn new() -> Result<Renderer, Error> {
        terminal::enable_raw_mode()?;
        let mut out = io::stdout();
        queue!(out, EnterAlternateScreen, Clear(ClearType::All), Hide)?;
        out.flush()?;
        Ok(Renderer { out })
    }

    /// Repaint every cell of every dirty row, then place the cursor.
    pub fn paint(&mut self, term: &mut Terminal) -> Result<(), Error> {
        let reverse_video = term.mode().contains(TerminalMode::REVERSE);
        let mut last_style: Option<(Color, Color, Attributes)> = None;

        for (row, line) in term.get_dirty_lines() {
            queue!(self.out, MoveTo(0, row as u16))?;
            for cell in &line.cells {
                let style = cell_style(cell, reverse_video);
                if last_style != Some(style) {
                    let (fg, bg, attrs) = style;
                    queue!(
                        self.out,
                        SetAttribute(Attribute::Reset),
                        SetForegroundColor(fg),
                        SetBackgroundColor(bg),
                        SetAttributes(attrs)
                    )?;
                    last_style = Some(style);
                }
                queue!(self.out, Print(cell.rune))?;
            }
        }
        term.clean_dirty_lines();

        queue!(self.out, SetAttribute(Attribute::Reset))?;
        if term.mode().contains(TerminalMode::HIDE) {
            queue!(self.out, Hide)?;
        } else {
            let pos = term.cursor_pos();
            queue!(self.out, MoveTo(pos.x as u16, pos.y as u16), Show)?;
        }
        self.out.flush()?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        let _ = queue!(self.out, SetAttribute(Attribute::Reset), Show, LeaveAlternateScreen);
        let _ = self.out.flush();
        let _ = terminal::disable_raw_mode();
    }
}

fn cell_style(cell: &Cell, reverse_video: bool) -> (Color, Color, Attributes) {
    let mut attrs = Attributes::default();
    if cell.attrs.contains(GlyphAttrs::BOLD) {
        attrs.set(Attribute::Bold);
    }
    if cell.attrs.contains(GlyphAttrs::FAINT) {
        attrs.set(Attribute::Dim);
    }
    if cell.attrs.contains(GlyphAttrs::ITALIC) {
        attrs.set(Attribute::Italic);
    }
    if cell.attrs.contains(GlyphAttrs::UNDERLINE) {
        attrs.set(Attribute::Underlined);
    }
    if cell.attrs.contains(GlyphAttrs::BLINK) {
        attrs.set(Attribute::SlowBlink);
    }
    if cell.attrs.contains(GlyphAttrs::INVISIBLE) {
        attrs.set(Attribute::Hidden);
    }
    if cell.attrs.contains(GlyphAttrs::STRUCK) {
        attrs.set(Attribute::CrossedOut);
    }
    // cell-level reverse and DECSCNM reverse video cancel out
    if cell.attrs.contains(GlyphAttrs::REVERSE) != reverse_video {
        attrs.set(Attribute::Reverse);
    }
    (color_for(cell.fg), color_for(cell.bg), attrs)
}

fn color_for(color: ColorAttribute) -> Color {
    match color {
        ColorAttribute::Default => Color::Reset,
        ColorAttribute::PaletteIndex(idx) => Color::AnsiValue(idx),
    }
}
