pub mod event;
pub mod highlight;

use std::collections::HashMap;

use tracing::{debug, trace};

pub use event::{LineCell, RedrawEvent, RedrawParseError, parse_redraw};
pub use highlight::{DefaultColors, HighlightAttrs, Rgb};

/// One grid position: a single codepoint plus the highlight id it was drawn with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub glyph: char,
    pub hl_id: u64,
}

impl Cell {
    pub const BLANK: Cell = Cell {
        glyph: ' ',
        hl_id: 0,
    };

    pub const fn new(glyph: char, hl_id: u64) -> Self {
        Self { glyph, hl_id }
    }
}

impl Default for Cell {
    fn default() -> Self {
        Self::BLANK
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CursorPos {
    pub row: usize,
    pub col: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mode {
    pub name: String,
    pub index: i64,
}

impl Default for Mode {
    fn default() -> Self {
        Self {
            name: "normal".to_owned(),
            index: 0,
        }
    }
}

/// Half-open rectangle used by the legacy count-only scroll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScrollRegion {
    top: usize,
    bottom: usize,
    left: usize,
    right: usize,
}

/// What a batch did, for counters and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub applied: usize,
    pub ignored: usize,
    pub flushes: usize,
    /// True when the batch had no `flush` and a render pass ran at its end.
    pub implicit_flush: bool,
}

/// Character grid driven by redraw events.
///
/// Every row holds exactly `width` cells. The cursor is stored as received
/// and only clamped by consumers that need an on-screen position.
///
/// ```
/// # use tidepool::grid::{GridState, LineCell, RedrawEvent};
/// let mut grid = GridState::new(4, 2);
/// grid.apply(&RedrawEvent::Line {
///     row: 1,
///     col_start: 1,
///     cells: vec![LineCell::new("ab", Some(2), 2)],
/// });
/// assert_eq!(grid.row_text(1).as_deref(), Some(" aa "));
/// ```
#[derive(Debug, Clone)]
pub struct GridState {
    width: usize,
    height: usize,
    cells: Vec<Vec<Cell>>,
    cursor: CursorPos,
    mode: Mode,
    highlights: HashMap<u64, HighlightAttrs>,
    default_colors: DefaultColors,
    scroll_region: Option<ScrollRegion>,
}

impl GridState {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            cells: blank_rows(width, height),
            cursor: CursorPos::default(),
            mode: Mode::default(),
            highlights: HashMap::new(),
            default_colors: DefaultColors::default(),
            scroll_region: None,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn cursor(&self) -> CursorPos {
        self.cursor
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn default_colors(&self) -> DefaultColors {
        self.default_colors
    }

    pub fn highlight(&self, id: u64) -> Option<&HighlightAttrs> {
        self.highlights.get(&id)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<&Cell> {
        self.cells.get(row)?.get(col)
    }

    pub fn row(&self, row: usize) -> Option<&[Cell]> {
        self.cells.get(row).map(Vec::as_slice)
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Cell]> {
        self.cells.iter().map(Vec::as_slice)
    }

    pub fn row_text(&self, row: usize) -> Option<String> {
        self.row(row).map(|cells| cells.iter().map(|c| c.glyph).collect())
    }

    /// Applies one event. Returns `true` for `Flush`.
    pub fn apply(&mut self, event: &RedrawEvent) -> bool {
        match event {
            RedrawEvent::Resize { cols, rows } => self.resize(*cols, *rows),
            RedrawEvent::Clear => self.clear(),
            RedrawEvent::Line {
                row,
                col_start,
                cells,
            } => self.line(*row, *col_start, cells),
            RedrawEvent::Scroll {
                top,
                bottom,
                left,
                right,
                rows,
                cols,
            } => self.scroll(*top, *bottom, *left, *right, *rows, *cols),
            RedrawEvent::RegionScroll { count } => {
                let region = self.scroll_region.unwrap_or(ScrollRegion {
                    top: 0,
                    bottom: self.height,
                    left: 0,
                    right: self.width,
                });
                self.scroll(
                    region.top,
                    region.bottom,
                    region.left,
                    region.right,
                    *count,
                    0,
                );
            }
            RedrawEvent::SetScrollRegion {
                top,
                bottom,
                left,
                right,
            } => {
                self.scroll_region = Some(ScrollRegion {
                    top: *top,
                    bottom: *bottom,
                    left: *left,
                    right: *right,
                });
            }
            RedrawEvent::CursorGoto { row, col } => {
                self.cursor = CursorPos {
                    row: *row,
                    col: *col,
                };
            }
            RedrawEvent::ModeChange { name, index } => {
                self.mode = Mode {
                    name: name.clone(),
                    index: *index,
                };
            }
            RedrawEvent::HighlightDefine { id, attrs } => {
                self.highlights.insert(*id, attrs.clone());
            }
            RedrawEvent::DefaultColorsSet {
                foreground,
                background,
                special,
            } => {
                self.default_colors = DefaultColors {
                    foreground: *foreground,
                    background: *background,
                    special: *special,
                };
            }
            RedrawEvent::Put { text } => self.put(text),
            RedrawEvent::GridDestroy => trace!("grid_destroy ignored"),
            RedrawEvent::Flush => return true,
            RedrawEvent::Ignored { .. } => {}
        }
        false
    }

    /// Applies a whole `redraw` batch in order, calling `on_flush` for every
    /// `Flush` and once at the end if the batch had none.
    pub fn apply_batch<F>(&mut self, events: &[RedrawEvent], mut on_flush: F) -> BatchSummary
    where
        F: FnMut(&GridState),
    {
        let mut summary = BatchSummary::default();
        for event in events {
            if matches!(event, RedrawEvent::Ignored { .. }) {
                summary.ignored += 1;
            } else {
                summary.applied += 1;
            }
            if self.apply(event) {
                summary.flushes += 1;
                on_flush(self);
            }
        }
        if summary.flushes == 0 {
            summary.implicit_flush = true;
            on_flush(self);
        }
        summary
    }

    fn resize(&mut self, width: usize, height: usize) {
        debug!(width, height, "grid resize");
        self.width = width;
        self.height = height;
        self.cells = blank_rows(width, height);
    }

    fn clear(&mut self) {
        for row in &mut self.cells {
            row.fill(Cell::BLANK);
        }
    }

    fn line(&mut self, row: usize, col_start: usize, cells: &[LineCell]) {
        let width = self.width;
        let Some(target) = self.cells.get_mut(row) else {
            trace!(row, height = self.height, "grid_line outside grid");
            return;
        };
        let mut col = col_start;
        let mut hl_id = 0;
        for run in cells {
            if let Some(id) = run.hl_id {
                hl_id = id;
            }
            let glyph = run.text.chars().next().unwrap_or(' ');
            for _ in 0..run.repeat {
                if col >= width {
                    return;
                }
                target[col] = Cell::new(glyph, hl_id);
                col += 1;
            }
        }
    }

    /// Shifts `[top, bottom) x [left, right)` by `rows`. A non-zero `cols`
    /// blanks the rectangle instead.
    fn scroll(&mut self, top: usize, bottom: usize, left: usize, right: usize, rows: i64, cols: i64) {
        let bottom = bottom.min(self.height);
        let right = right.min(self.width);
        if top >= bottom || left >= right {
            return;
        }

        if cols != 0 {
            for row in &mut self.cells[top..bottom] {
                row[left..right].fill(Cell::BLANK);
            }
            return;
        }

        let height = bottom - top;
        let shift = usize::try_from(rows.unsigned_abs())
            .unwrap_or(usize::MAX)
            .min(height);
        if rows > 0 {
            for dst in top..bottom - shift {
                let src = dst + shift;
                self.copy_span(src, dst, left, right);
            }
            for row in &mut self.cells[bottom - shift..bottom] {
                row[left..right].fill(Cell::BLANK);
            }
        } else if rows < 0 {
            for dst in (top + shift..bottom).rev() {
                let src = dst - shift;
                self.copy_span(src, dst, left, right);
            }
            for row in &mut self.cells[top..top + shift] {
                row[left..right].fill(Cell::BLANK);
            }
        }
    }

    fn copy_span(&mut self, src: usize, dst: usize, left: usize, right: usize) {
        let (src_row, dst_row) = if src < dst {
            let (head, tail) = self.cells.split_at_mut(dst);
            (&head[src], &mut tail[0])
        } else {
            let (head, tail) = self.cells.split_at_mut(src);
            (&tail[0], &mut head[dst])
        };
        dst_row[left..right].copy_from_slice(&src_row[left..right]);
    }

    fn put(&mut self, text: &str) {
        let CursorPos { row, col } = self.cursor;
        let width = self.width;
        let Some(target) = self.cells.get_mut(row) else {
            return;
        };
        let mut col = col;
        for glyph in text.chars() {
            if col >= width {
                break;
            }
            target[col] = Cell::new(glyph, 0);
            col += 1;
        }
        self.cursor.col = col;
    }
}

fn blank_rows(width: usize, height: usize) -> Vec<Vec<Cell>> {
    (0..height).map(|_| vec![Cell::BLANK; width]).collect()
}
