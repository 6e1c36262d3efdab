use msgpack_wire::Value;

/// 24-bit colour as sent by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_u24(packed: u32) -> Self {
        Self {
            r: ((packed >> 16) & 0xff) as u8,
            g: ((packed >> 8) & 0xff) as u8,
            b: (packed & 0xff) as u8,
        }
    }

    /// Accepts `0xRRGGBB` integers and `#rrggbb` strings. Negative integers
    /// mean "unset" on the wire and map to `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        if let Some(n) = value.as_i64() {
            return u32::try_from(n)
                .ok()
                .filter(|n| *n <= 0xff_ffff)
                .map(Self::from_u24);
        }
        let hex = value.as_str()?.trim();
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            return None;
        }
        u32::from_str_radix(hex, 16).ok().map(Self::from_u24)
    }
}

/// RGB attributes of one highlight table entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HighlightAttrs {
    pub foreground: Option<Rgb>,
    pub background: Option<Rgb>,
    pub special: Option<Rgb>,
    pub reverse: bool,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
    pub undercurl: bool,
    pub strikethrough: bool,
}

impl HighlightAttrs {
    /// Reads an `rgb_attrs` map. Unknown keys are ignored.
    pub fn from_map(value: &Value) -> Self {
        let flag = |key: &str| value.map_get(key).and_then(Value::as_bool).unwrap_or(false);
        let colour = |key: &str| value.map_get(key).and_then(Rgb::from_value);
        Self {
            foreground: colour("foreground"),
            background: colour("background"),
            special: colour("special"),
            reverse: flag("reverse"),
            bold: flag("bold"),
            italic: flag("italic"),
            underline: flag("underline"),
            undercurl: flag("undercurl"),
            strikethrough: flag("strikethrough"),
        }
    }
}

/// Colours announced by `default_colors_set`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefaultColors {
    pub foreground: Option<Rgb>,
    pub background: Option<Rgb>,
    pub special: Option<Rgb>,
}
