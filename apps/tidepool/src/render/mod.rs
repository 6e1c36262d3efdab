//! Frame production from a [`GridState`]: joined plain text, or an ANSI
//! stream that only emits SGR when the resolved style changes within a row.

use std::fmt::{self, Write as _};

use clap::ValueEnum;
use crossterm::Command;
use crossterm::cursor::{Hide, MoveTo, SetCursorStyle, Show};
use crossterm::style::ResetColor;
use crossterm::terminal::{Clear, ClearType};

use crate::grid::{GridState, Rgb};

#[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq)]
pub enum RenderMode {
    Text,
    #[default]
    Ansi,
}

impl RenderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Text => "text",
            RenderMode::Ansi => "ansi",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "text" | "plain" => Some(RenderMode::Text),
            "ansi" => Some(RenderMode::Ansi),
            _ => None,
        }
    }
}

/// Resolved style of one cell.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Style {
    pub fg: Option<Rgb>,
    pub bg: Option<Rgb>,
    pub reverse: bool,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Style {
    /// Highlight id → entry; unknown ids fall back to entry 0, then to no
    /// styling.
    pub fn resolve(grid: &GridState, hl_id: u64) -> Style {
        let Some(attrs) = grid.highlight(hl_id).or_else(|| grid.highlight(0)) else {
            return Style::default();
        };
        Style {
            fg: attrs.foreground,
            bg: attrs.background,
            reverse: attrs.reverse,
            bold: attrs.bold,
            italic: attrs.italic,
            underline: attrs.underline || attrs.undercurl,
        }
    }

    pub fn is_plain(&self) -> bool {
        *self == Style::default()
    }

    /// Writes a single SGR sequence that fully establishes this style.
    /// Reverse video with colours swaps them; without colours it uses SGR 7.
    pub fn write_sgr(&self, out: &mut String) {
        out.push_str("\x1b[0");
        if self.bold {
            out.push_str(";1");
        }
        if self.italic {
            out.push_str(";3");
        }
        if self.underline {
            out.push_str(";4");
        }
        let (fg, bg) = if self.reverse {
            (self.bg, self.fg)
        } else {
            (self.fg, self.bg)
        };
        if self.reverse && fg.is_none() && bg.is_none() {
            out.push_str(";7");
        }
        if let Some(Rgb { r, g, b }) = fg {
            let _ = write!(out, ";38;2;{r};{g};{b}");
        }
        if let Some(Rgb { r, g, b }) = bg {
            let _ = write!(out, ";48;2;{r};{g};{b}");
        }
        out.push('m');
    }
}

/// Glyph as drawn to a terminal: control characters become a space so a
/// stray ESC in a cell cannot inject sequences.
pub fn sanitize_glyph(glyph: char) -> char {
    if glyph.is_control() { ' ' } else { glyph }
}

pub fn to_plain_text(grid: &GridState) -> Vec<String> {
    grid.rows()
        .map(|row| row.iter().map(|cell| cell.glyph).collect())
        .collect()
}

/// Upper bound on the up-front reservation for an ANSI frame.
const MAX_FRAME_RESERVE: usize = 1 << 20;

fn ansi_capacity(width: usize, height: usize) -> usize {
    height
        .saturating_mul(width.saturating_add(16))
        .saturating_add(32)
        .min(MAX_FRAME_RESERVE)
}

pub fn to_ansi(grid: &GridState) -> String {
    let mut out = String::with_capacity(ansi_capacity(grid.width(), grid.height()));
    // Writing into a String cannot fail.
    let _ = write_ansi(grid, &mut out);
    out
}

fn write_ansi(grid: &GridState, out: &mut String) -> fmt::Result {
    Hide.write_ansi(out)?;
    for (r, row) in grid.rows().enumerate() {
        MoveTo(0, to_u16(r)).write_ansi(out)?;
        let mut current = Style::default();
        for cell in row {
            let style = Style::resolve(grid, cell.hl_id);
            if style != current {
                if style.is_plain() {
                    ResetColor.write_ansi(out)?;
                } else {
                    style.write_sgr(out);
                }
                current = style;
            }
            out.push(sanitize_glyph(cell.glyph));
        }
        ResetColor.write_ansi(out)?;
        Clear(ClearType::UntilNewLine).write_ansi(out)?;
    }
    ResetColor.write_ansi(out)?;
    let cursor = grid.cursor();
    let row = cursor.row.min(grid.height().saturating_sub(1));
    let col = cursor.col.min(grid.width().saturating_sub(1));
    MoveTo(to_u16(col), to_u16(row)).write_ansi(out)?;
    Show.write_ansi(out)
}

fn to_u16(n: usize) -> u16 {
    u16::try_from(n).unwrap_or(u16::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorShape {
    Block,
    Bar,
    Underline,
}

impl CursorShape {
    pub fn to_crossterm(self) -> SetCursorStyle {
        match self {
            CursorShape::Block => SetCursorStyle::SteadyBlock,
            CursorShape::Bar => SetCursorStyle::SteadyBar,
            CursorShape::Underline => SetCursorStyle::SteadyUnderScore,
        }
    }
}

/// Insert modes draw a bar, replace and command-line modes an underline.
pub fn cursor_shape_for_mode(mode: &str) -> CursorShape {
    match mode.chars().next() {
        Some('i') => CursorShape::Bar,
        Some('R') | Some('r') | Some('c') => CursorShape::Underline,
        _ => CursorShape::Block,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{HighlightAttrs, LineCell, RedrawEvent};

    fn grid_with_row(width: usize, text: &str, hl_id: u64) -> GridState {
        let mut grid = GridState::new(width, 1);
        let cells = text
            .chars()
            .map(|c| LineCell::new(c.to_string(), Some(hl_id), 1))
            .collect();
        grid.apply(&RedrawEvent::Line {
            row: 0,
            col_start: 0,
            cells,
        });
        grid
    }

    fn define(grid: &mut GridState, id: u64, attrs: HighlightAttrs) {
        grid.apply(&RedrawEvent::HighlightDefine { id, attrs });
    }

    fn sgr_count(ansi: &str) -> usize {
        // Style sequences only; excludes resets and cursor escapes.
        ansi.matches("\x1b[0;").count()
    }

    #[test]
    fn plain_text_is_a_pure_join() {
        let grid = grid_with_row(4, "a\x1bb", 0);
        assert_eq!(to_plain_text(&grid), vec!["a\x1bb ".to_string()]);
    }

    #[test]
    fn one_sgr_for_a_uniform_run() {
        let mut grid = grid_with_row(10, "abcdefghij", 3);
        define(
            &mut grid,
            3,
            HighlightAttrs {
                foreground: Some(Rgb::new(1, 2, 3)),
                ..HighlightAttrs::default()
            },
        );
        let ansi = to_ansi(&grid);
        assert_eq!(sgr_count(&ansi), 1);
        assert!(ansi.contains("\x1b[0;38;2;1;2;3mabcdefghij\x1b[0m\x1b[K"));
    }

    #[test]
    fn frame_layout() {
        let mut grid = GridState::new(2, 2);
        grid.apply(&RedrawEvent::CursorGoto { row: 1, col: 0 });
        assert_eq!(
            to_ansi(&grid),
            "\x1b[?25l\x1b[1;1H  \x1b[0m\x1b[K\x1b[2;1H  \x1b[0m\x1b[K\x1b[0m\x1b[2;1H\x1b[?25h"
        );
    }

    #[test]
    fn style_changes_emit_new_sgr_and_resets_to_plain() {
        let mut grid = GridState::new(3, 1);
        grid.apply(&RedrawEvent::Line {
            row: 0,
            col_start: 0,
            cells: vec![
                LineCell::new("a", Some(1), 1),
                LineCell::new("b", Some(2), 1),
                LineCell::new("c", Some(1), 1),
            ],
        });
        define(
            &mut grid,
            2,
            HighlightAttrs {
                bold: true,
                ..HighlightAttrs::default()
            },
        );
        let ansi = to_ansi(&grid);
        assert!(ansi.contains("a\x1b[0;1mb\x1b[0mc"), "{ansi:?}");
    }

    #[test]
    fn unknown_id_falls_back_to_zero_then_plain() {
        let mut grid = grid_with_row(1, "x", 42);
        assert_eq!(Style::resolve(&grid, 42), Style::default());
        define(
            &mut grid,
            0,
            HighlightAttrs {
                italic: true,
                ..HighlightAttrs::default()
            },
        );
        assert!(Style::resolve(&grid, 42).italic);
    }

    #[test]
    fn reverse_swaps_colours_or_uses_sgr7() {
        let mut out = String::new();
        Style {
            fg: Some(Rgb::new(1, 1, 1)),
            bg: Some(Rgb::new(9, 9, 9)),
            reverse: true,
            ..Style::default()
        }
        .write_sgr(&mut out);
        assert_eq!(out, "\x1b[0;38;2;9;9;9;48;2;1;1;1m");

        out.clear();
        Style {
            reverse: true,
            ..Style::default()
        }
        .write_sgr(&mut out);
        assert_eq!(out, "\x1b[0;7m");
    }

    #[test]
    fn control_glyphs_are_sanitised_in_ansi_only() {
        let grid = grid_with_row(3, "a\x1b\t", 0);
        let ansi = to_ansi(&grid);
        assert!(ansi.contains("\x1b[1;1Ha  \x1b[0m"));
    }

    #[test]
    fn cursor_is_clamped_to_the_grid() {
        let mut grid = GridState::new(4, 3);
        grid.apply(&RedrawEvent::CursorGoto { row: 10, col: 10 });
        assert!(to_ansi(&grid).ends_with("\x1b[3;4H\x1b[?25h"));
    }

    #[test]
    fn cursor_shapes_follow_mode() {
        assert_eq!(cursor_shape_for_mode("insert"), CursorShape::Bar);
        assert_eq!(cursor_shape_for_mode("replace"), CursorShape::Underline);
        assert_eq!(cursor_shape_for_mode("Replace"), CursorShape::Underline);
        assert_eq!(cursor_shape_for_mode("cmdline_normal"), CursorShape::Underline);
        assert_eq!(cursor_shape_for_mode("normal"), CursorShape::Block);
        assert_eq!(cursor_shape_for_mode(""), CursorShape::Block);
    }

    #[test]
    fn frame_reservation_saturates_and_is_bounded() {
        assert_eq!(ansi_capacity(80, 24), 24 * 96 + 32);
        assert_eq!(ansi_capacity(usize::MAX, 2), MAX_FRAME_RESERVE);
        assert_eq!(ansi_capacity(2, usize::MAX), MAX_FRAME_RESERVE);
        assert_eq!(ansi_capacity(0, 0), 32);
    }
}
