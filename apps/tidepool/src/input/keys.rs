use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

/// Translates a terminal key event into editor key notation for `nvim_input`.
///
/// Returns `None` for releases and keys with no notation.
pub fn translate_key(key: &KeyEvent) -> Option<String> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let mods = key.modifiers;
    let ctrl = mods.contains(KeyModifiers::CONTROL);
    let alt = mods.contains(KeyModifiers::ALT);
    let shift = mods.contains(KeyModifiers::SHIFT);

    let name = match key.code {
        KeyCode::Char(c) => {
            if !ctrl && !alt {
                return Some(literal(c));
            }
            let base = if c == '<' { "lt".to_owned() } else { c.to_string() };
            return Some(wrap(&prefix(ctrl, alt, false), &base));
        }
        KeyCode::Enter => "CR",
        KeyCode::Backspace => "BS",
        KeyCode::Esc => "Esc",
        KeyCode::Tab if shift => "S-Tab",
        KeyCode::Tab => "Tab",
        KeyCode::BackTab => "S-Tab",
        KeyCode::Up => "Up",
        KeyCode::Down => "Down",
        KeyCode::Left => "Left",
        KeyCode::Right => "Right",
        KeyCode::Delete => "Del",
        KeyCode::Home => "Home",
        KeyCode::End => "End",
        KeyCode::PageUp => "PageUp",
        KeyCode::PageDown => "PageDown",
        KeyCode::Insert => "Insert",
        KeyCode::F(n) if (1..=12).contains(&n) => {
            return Some(wrap(&prefix(ctrl, alt, shift), &format!("F{n}")));
        }
        _ => return None,
    };
    if name == "S-Tab" {
        return Some(wrap(&prefix(ctrl, alt, false), name));
    }
    Some(wrap(&prefix(ctrl, alt, shift), name))
}

/// Translates plain text (e.g. a bracketed paste) character by character.
pub fn translate_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\r' | '\n' => out.push_str("<CR>"),
            '\t' => out.push_str("<Tab>"),
            '\x1b' => out.push_str("<Esc>"),
            '\x7f' => out.push_str("<BS>"),
            c => out.push_str(&literal(c)),
        }
    }
    out
}

fn literal(c: char) -> String {
    if c == '<' { "<lt>".to_owned() } else { c.to_string() }
}

fn prefix(ctrl: bool, alt: bool, shift: bool) -> String {
    let mut out = String::new();
    if ctrl {
        out.push_str("C-");
    }
    if alt {
        out.push_str("A-");
    }
    if shift {
        out.push_str("S-");
    }
    out
}

fn wrap(prefix: &str, name: &str) -> String {
    format!("<{prefix}{name}>")
}
