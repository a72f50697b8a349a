//! The built-in standard modifiers every template object is seeded with.

use std::rc::Rc;

/// `(modifier_name, args, marker_name, value, out_buffer)`. A modifier appends bytes
/// to `out_buffer`; it may inspect `value` but never mutates it, and must not retain
/// any argument beyond the call.
pub type ModifierFn = Rc<dyn Fn(&str, &str, &str, &str, &mut String)>;

/// Appends `value` unchanged.
pub fn none_modifier() -> ModifierFn {
    Rc::new(|_name, _args, _marker, value, out| out.push_str(value))
}

/// Appends `value` with `\a \b \f \n \r \t \v ' " \ ?` backslash-escaped.
pub fn cstring_escape_modifier() -> ModifierFn {
    Rc::new(|_name, _args, _marker, value, out| {
        for ch in value.chars() {
            match ch {
                '\u{7}' => out.push_str("\\a"),
                '\u{8}' => out.push_str("\\b"),
                '\u{c}' => out.push_str("\\f"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '\u{b}' => out.push_str("\\v"),
                '\'' => out.push_str("\\'"),
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '?' => out.push_str("\\?"),
                other => out.push(other),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_identity() {
        let m = none_modifier();
        let mut out = String::new();
        m("none", "", "X", "raw value", &mut out);
        assert_eq!(out, "raw value");
    }

    #[test]
    fn cstring_escape_matches_example() {
        let m = cstring_escape_modifier();
        let mut out = String::new();
        m("cstring_escape", "", "X", "a\"\nb", &mut out);
        assert_eq!(out, "a\\\"\\nb");
    }
}
