//! Parsing of `redraw` notification params into [`RedrawEvent`]s.
//!
//! Each event arrives as `[name, args...]`. When the first argument is an
//! array every trailing element is one argument tuple (batched form);
//! otherwise the whole tail is a single positional tuple.

use msgpack_wire::Value;
use thiserror::Error;
use tracing::{trace, warn};

use super::highlight::{HighlightAttrs, Rgb};

/// One `[text, hl_id?, repeat?]` run of a `grid_line` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineCell {
    pub text: String,
    /// `None` reuses the id of the previous run in the same line event.
    pub hl_id: Option<u64>,
    pub repeat: usize,
}

impl LineCell {
    pub fn new(text: impl Into<String>, hl_id: Option<u64>, repeat: usize) -> Self {
        Self {
            text: text.into(),
            hl_id,
            repeat,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RedrawEvent {
    Resize {
        cols: usize,
        rows: usize,
    },
    Clear,
    Line {
        row: usize,
        col_start: usize,
        cells: Vec<LineCell>,
    },
    /// Half-open rectangle `[top, bottom) x [left, right)`.
    Scroll {
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
        rows: i64,
        cols: i64,
    },
    /// Legacy count-only `scroll`, applied to the region last set by
    /// [`RedrawEvent::SetScrollRegion`].
    RegionScroll {
        count: i64,
    },
    /// Stored half-open; the legacy event's inclusive bounds are converted
    /// during parsing.
    SetScrollRegion {
        top: usize,
        bottom: usize,
        left: usize,
        right: usize,
    },
    CursorGoto {
        row: usize,
        col: usize,
    },
    ModeChange {
        name: String,
        index: i64,
    },
    HighlightDefine {
        id: u64,
        attrs: HighlightAttrs,
    },
    DefaultColorsSet {
        foreground: Option<Rgb>,
        background: Option<Rgb>,
        special: Option<Rgb>,
    },
    /// Legacy `put`: text written at the cursor.
    Put {
        text: String,
    },
    GridDestroy,
    Flush,
    Ignored {
        name: String,
    },
}

impl RedrawEvent {
    /// Label used for logs and the per-event counter.
    pub fn name(&self) -> &str {
        match self {
            RedrawEvent::Resize { .. } => "grid_resize",
            RedrawEvent::Clear => "grid_clear",
            RedrawEvent::Line { .. } => "grid_line",
            RedrawEvent::Scroll { .. } => "grid_scroll",
            RedrawEvent::RegionScroll { .. } => "scroll",
            RedrawEvent::SetScrollRegion { .. } => "set_scroll_region",
            RedrawEvent::CursorGoto { .. } => "grid_cursor_goto",
            RedrawEvent::ModeChange { .. } => "mode_change",
            RedrawEvent::HighlightDefine { .. } => "hl_attr_define",
            RedrawEvent::DefaultColorsSet { .. } => "default_colors_set",
            RedrawEvent::Put { .. } => "put",
            RedrawEvent::GridDestroy => "grid_destroy",
            RedrawEvent::Flush => "flush",
            RedrawEvent::Ignored { .. } => "ignored",
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("bad `{event}` arguments: {reason}")]
pub struct RedrawParseError {
    pub event: String,
    pub reason: String,
}

/// Parses the params of a `redraw` notification. Tuples that fail to parse
/// are logged and skipped; the rest of the batch is kept.
pub fn parse_redraw(params: &Value) -> Vec<RedrawEvent> {
    let Some(batches) = params.as_array() else {
        warn!(kind = params.kind(), "redraw params are not an array");
        return Vec::new();
    };
    let mut events = Vec::with_capacity(batches.len());
    for batch in batches {
        match parse_event_batch(batch) {
            Ok(parsed) => events.extend(parsed),
            Err(err) => warn!(error = %err, "skipping redraw event"),
        }
    }
    events
}

/// Parses one `[name, args...]` entry, which may expand to several events.
/// A malformed tuple inside a batch is logged and dropped without losing
/// its siblings.
pub fn parse_event_batch(batch: &Value) -> Result<Vec<RedrawEvent>, RedrawParseError> {
    let items = batch.as_array().ok_or_else(|| RedrawParseError {
        event: "<unknown>".into(),
        reason: format!("event is a {}, expected array", batch.kind()),
    })?;
    let (name, tail) = match items.split_first() {
        Some((name, tail)) => (
            name.as_str().ok_or_else(|| RedrawParseError {
                event: "<unknown>".into(),
                reason: "event name is not a string".into(),
            })?,
            tail,
        ),
        None => {
            return Err(RedrawParseError {
                event: "<unknown>".into(),
                reason: "empty event".into(),
            });
        }
    };

    if !is_known(name) {
        trace!(event = name, "ignoring redraw event");
        return Ok(vec![RedrawEvent::Ignored {
            name: name.to_owned(),
        }]);
    }

    let tuples: Vec<&[Value]> = match tail.first() {
        None => vec![tail],
        Some(first) if first.as_array().is_some() => tail
            .iter()
            .filter_map(|arg| {
                let tuple = arg.as_array();
                if tuple.is_none() {
                    trace!(event = name, kind = arg.kind(), "non-array tuple in batch");
                }
                tuple
            })
            .collect(),
        Some(_) => vec![tail],
    };

    let mut events = Vec::with_capacity(tuples.len());
    for tuple in tuples {
        match parse_tuple(name, Args::new(name, tuple)) {
            Ok(event) => events.push(event),
            Err(err) => warn!(error = %err, "skipping redraw tuple"),
        }
    }
    Ok(events)
}

fn is_known(name: &str) -> bool {
    matches!(
        name,
        "grid_resize"
            | "resize"
            | "grid_clear"
            | "clear"
            | "grid_line"
            | "grid_scroll"
            | "scroll"
            | "set_scroll_region"
            | "grid_cursor_goto"
            | "cursor_goto"
            | "mode_change"
            | "hl_attr_define"
            | "default_colors_set"
            | "put"
            | "grid_destroy"
            | "flush"
    )
}

/// Largest grid a resize may ask for, in cells.
pub const MAX_GRID_CELLS: usize = 1 << 22;

fn parse_tuple(name: &str, args: Args<'_>) -> Result<RedrawEvent, RedrawParseError> {
    let event = match name {
        // grid_* events lead with a grid id; a single grid is modelled.
        "grid_resize" => args.resize(1)?,
        "resize" => args.resize(0)?,
        "grid_clear" | "clear" => RedrawEvent::Clear,
        "grid_line" => RedrawEvent::Line {
            row: args.usize(1)?,
            col_start: args.usize(2)?,
            cells: parse_cells(&args, 3)?,
        },
        "grid_scroll" => RedrawEvent::Scroll {
            top: args.usize(1)?,
            bottom: args.usize(2)?,
            left: args.usize(3)?,
            right: args.usize(4)?,
            rows: args.int(5)?,
            cols: args.int(6).unwrap_or(0),
        },
        "scroll" if args.len() >= 5 => RedrawEvent::Scroll {
            top: args.usize(0)?,
            bottom: args.usize(1)?,
            left: args.usize(2)?,
            right: args.usize(3)?,
            rows: args.int(4)?,
            cols: args.int(5).unwrap_or(0),
        },
        "scroll" => RedrawEvent::RegionScroll {
            count: args.int(0)?,
        },
        "set_scroll_region" => RedrawEvent::SetScrollRegion {
            top: args.usize(0)?,
            bottom: args.inclusive_end(1)?,
            left: args.usize(2)?,
            right: args.inclusive_end(3)?,
        },
        "grid_cursor_goto" => RedrawEvent::CursorGoto {
            row: args.usize(1)?,
            col: args.usize(2)?,
        },
        "cursor_goto" => RedrawEvent::CursorGoto {
            row: args.usize(0)?,
            col: args.usize(1)?,
        },
        "mode_change" => RedrawEvent::ModeChange {
            name: args.str(0)?.to_owned(),
            index: args.int(1).unwrap_or(0),
        },
        "hl_attr_define" => RedrawEvent::HighlightDefine {
            id: args.u64(0)?,
            attrs: HighlightAttrs::from_map(args.get(1)?),
        },
        "default_colors_set" => RedrawEvent::DefaultColorsSet {
            foreground: args.get(0).ok().and_then(Rgb::from_value),
            background: args.get(1).ok().and_then(Rgb::from_value),
            special: args.get(2).ok().and_then(Rgb::from_value),
        },
        "put" => RedrawEvent::Put {
            text: args.str(0)?.to_owned(),
        },
        "grid_destroy" => RedrawEvent::GridDestroy,
        "flush" => RedrawEvent::Flush,
        other => RedrawEvent::Ignored {
            name: other.to_owned(),
        },
    };
    Ok(event)
}

fn parse_cells(args: &Args<'_>, index: usize) -> Result<Vec<LineCell>, RedrawParseError> {
    let raw = args
        .get(index)?
        .as_array()
        .ok_or_else(|| args.error(format!("argument {index} is not a cell array")))?;
    let mut cells = Vec::with_capacity(raw.len());
    for (i, cell) in raw.iter().enumerate() {
        let parts = cell
            .as_array()
            .ok_or_else(|| args.error(format!("cell {i} is not an array")))?;
        let text = parts
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| args.error(format!("cell {i} has no text")))?;
        let hl_id = parts.get(1).and_then(Value::as_u64);
        let repeat = parts
            .get(2)
            .and_then(Value::as_usize)
            .filter(|n| *n > 0)
            .unwrap_or(1);
        cells.push(LineCell::new(text, hl_id, repeat));
    }
    Ok(cells)
}

struct Args<'a> {
    event: &'a str,
    items: &'a [Value],
}

impl<'a> Args<'a> {
    fn new(event: &'a str, items: &'a [Value]) -> Self {
        Self { event, items }
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn error(&self, reason: String) -> RedrawParseError {
        RedrawParseError {
            event: self.event.to_owned(),
            reason,
        }
    }

    fn get(&self, index: usize) -> Result<&'a Value, RedrawParseError> {
        self.items
            .get(index)
            .ok_or_else(|| self.error(format!("missing argument {index}")))
    }

    fn int(&self, index: usize) -> Result<i64, RedrawParseError> {
        let value = self.get(index)?;
        value
            .as_i64()
            .ok_or_else(|| self.error(format!("argument {index} is a {}, expected int", value.kind())))
    }

    fn u64(&self, index: usize) -> Result<u64, RedrawParseError> {
        let value = self.get(index)?;
        value.as_u64().ok_or_else(|| {
            self.error(format!(
                "argument {index} is not a non-negative int ({})",
                value.kind()
            ))
        })
    }

    fn usize(&self, index: usize) -> Result<usize, RedrawParseError> {
        let value = self.get(index)?;
        value.as_usize().ok_or_else(|| {
            self.error(format!(
                "argument {index} is not a non-negative int ({})",
                value.kind()
            ))
        })
    }

    /// Half-open end from an inclusive bound.
    fn inclusive_end(&self, index: usize) -> Result<usize, RedrawParseError> {
        self.usize(index)?
            .checked_add(1)
            .ok_or_else(|| self.error(format!("argument {index} is out of range")))
    }

    /// Width and height at `index` and `index + 1`, each within terminal
    /// range and together within [`MAX_GRID_CELLS`].
    fn resize(&self, index: usize) -> Result<RedrawEvent, RedrawParseError> {
        let mut dims = [0usize; 2];
        for (offset, dim) in dims.iter_mut().enumerate() {
            let at = index + offset;
            *dim = self.usize(at)?;
            if u16::try_from(*dim).is_err() {
                return Err(self.error(format!("argument {at} is too large for a grid ({dim})")));
            }
        }
        let [cols, rows] = dims;
        if cols.saturating_mul(rows) > MAX_GRID_CELLS {
            return Err(self.error(format!("{cols}x{rows} exceeds {MAX_GRID_CELLS} cells")));
        }
        Ok(RedrawEvent::Resize { cols, rows })
    }

    fn str(&self, index: usize) -> Result<&'a str, RedrawParseError> {
        let value = self.get(index)?;
        value
            .as_str()
            .ok_or_else(|| self.error(format!("argument {index} is a {}, expected str", value.kind())))
    }
}
