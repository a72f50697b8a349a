//! The marker parser and the recursive expansion engine that drives it.
//!
//! There is no persistent parse tree: a template is walked once, depth-first, by a
//! small set of mutually recursive functions. Nested sections and includes push a
//! [`Frame`] onto a stack that mirrors the recursion exactly — the same structure the
//! original engine calls a parse-context chain — and pop it on return. Nothing here
//! outlives a single `expand` call.

use std::collections::HashMap;

use crate::engine::dictionary::{DictHandle, ModifierMissingFn, VariableMissingFn};
use crate::engine::modifier::ModifierFn;
use crate::error::{Error, Result};

const MAX_MARKER_LEN: usize = 64;
const MAX_MODIFIER_LEN: usize = 128;

/// The byte-string pair recognized as marker boundaries. Both ends are 1 to 8 bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delimiters {
    start: String,
    end: String,
}

impl Delimiters {
    /// Validates and builds a delimiter pair for use as a `Template`'s initial
    /// delimiters.
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Result<Self> {
        let start = start.into();
        let end = end.into();
        if !(1..=8).contains(&start.len()) || !(1..=8).contains(&end.len()) {
            return Err(Error::Syntax {
                line: 0,
                message: "delimiters must be 1 to 8 bytes each".to_string(),
            });
        }
        Ok(Delimiters { start, end })
    }

    fn assume_valid(start: &str, end: &str) -> Self {
        Delimiters { start: start.to_string(), end: end.to_string() }
    }
}

impl Default for Delimiters {
    fn default() -> Self {
        Delimiters { start: "{{".to_string(), end: "}}".to_string() }
    }
}

/// One activation of the expansion engine: the dictionary driving the current
/// iteration (`None` for a hidden or empty section/include), whether this activation
/// is expanding an include's fetched text (which triggers indentation reproduction),
/// and the host line's leading whitespace captured when the include began.
struct Frame {
    active: Option<DictHandle>,
    expanding_include: bool,
    line_ws: String,
}

/// The shared output buffer plus the bookkeeping needed to reproduce include
/// indentation: the byte offset where the current output line began, and whether a
/// newline was just emitted and its indentation reproduction is still pending (it is
/// dropped, rather than flushed, if the body ends before any further content).
struct Output {
    buf: String,
    line_start: usize,
    pending_indent: bool,
}

impl Output {
    fn new() -> Self {
        Output { buf: String::new(), line_start: 0, pending_indent: false }
    }

    fn emit(&mut self, frames: &[Frame], fragment: &str) {
        for ch in fragment.chars() {
            if self.pending_indent {
                for frame in frames.iter().filter(|f| f.expanding_include) {
                    self.buf.push_str(&frame.line_ws);
                }
                self.pending_indent = false;
            }
            self.buf.push(ch);
            if ch == '\n' {
                self.line_start = self.buf.len();
                self.pending_indent = true;
            }
        }
    }

    /// The whitespace-only prefix of the current output line, or empty if the line
    /// already has non-whitespace content. Captured when an include begins, so its
    /// body's newlines reproduce the host's indentation.
    fn current_line_ws(&self) -> String {
        let candidate = &self.buf[self.line_start..];
        if !candidate.is_empty() && candidate.bytes().all(|b| b == b' ' || b == b'\t') {
            candidate.to_string()
        } else {
            String::new()
        }
    }

    fn snapshot(&self) -> (usize, usize, bool) {
        (self.buf.len(), self.line_start, self.pending_indent)
    }

    fn restore(&mut self, snap: (usize, usize, bool)) {
        self.buf.truncate(snap.0);
        self.line_start = snap.1;
        self.pending_indent = snap.2;
    }
}

enum StopReason {
    Eof,
    EndSection(String),
}

enum Marker<'a> {
    Comment,
    Variable { name: &'a str, mods: Vec<(&'a str, Option<&'a str>)> },
    Section { name: &'a str },
    EndSection { name: &'a str },
    Delimiter { start: &'a str, end: &'a str },
    Include { name: &'a str },
}

fn line_of(input: &str, pos: usize) -> usize {
    input.as_bytes()[..pos.min(input.len())].iter().filter(|&&b| b == b'\n').count() + 1
}

fn valid_marker_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_MARKER_LEN
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn valid_modifier_name(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= MAX_MODIFIER_LEN
        && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn validate_marker_name(name: &str, line: usize) -> Result<()> {
    if valid_marker_name(name) {
        Ok(())
    } else {
        Err(Error::Syntax { line, message: format!("invalid marker name {name:?}") })
    }
}

fn classify<'a>(input: &str, marker_pos: usize, body: &'a str) -> Result<Marker<'a>> {
    let trimmed = body.trim_start();
    let line = line_of(input, marker_pos);
    let sigil = match trimmed.chars().next() {
        Some(c) => c,
        None => return Err(Error::Syntax { line, message: "empty marker".to_string() }),
    };
    match sigil {
        '!' => Ok(Marker::Comment),
        '#' => {
            let name = &trimmed[1..];
            validate_marker_name(name, line)?;
            Ok(Marker::Section { name })
        }
        '/' => {
            let name = &trimmed[1..];
            validate_marker_name(name, line)?;
            Ok(Marker::EndSection { name })
        }
        '>' => {
            let name = &trimmed[1..];
            validate_marker_name(name, line)?;
            Ok(Marker::Include { name })
        }
        '=' => {
            let inner = trimmed
                .strip_prefix('=')
                .and_then(|s| s.strip_suffix('='))
                .ok_or_else(|| Error::Syntax {
                    line,
                    message: "malformed set-delimiter directive".to_string(),
                })?;
            let mut parts = inner.split_whitespace();
            let new_start = parts.next().ok_or_else(|| Error::Syntax {
                line,
                message: "set-delimiter requires two delimiters".to_string(),
            })?;
            let new_end = parts.next().ok_or_else(|| Error::Syntax {
                line,
                message: "set-delimiter requires two delimiters".to_string(),
            })?;
            if parts.next().is_some() {
                return Err(Error::Syntax {
                    line,
                    message: "set-delimiter takes exactly two tokens".to_string(),
                });
            }
            if !(1..=8).contains(&new_start.len()) || !(1..=8).contains(&new_end.len()) {
                return Err(Error::Syntax {
                    line,
                    message: "delimiters must be 1 to 8 bytes each".to_string(),
                });
            }
            Ok(Marker::Delimiter { start: new_start, end: new_end })
        }
        _ => {
            let (name_part, mods_part) = match trimmed.find(':') {
                Some(i) => (&trimmed[..i], Some(&trimmed[i + 1..])),
                None => (trimmed, None),
            };
            validate_marker_name(name_part, line)?;
            let mut mods = Vec::new();
            if let Some(mods_part) = mods_part {
                for segment in mods_part.split(':') {
                    let (mod_name, args) = match segment.find('=') {
                        Some(i) => (&segment[..i], Some(&segment[i + 1..])),
                        None => (segment, None),
                    };
                    if !valid_modifier_name(mod_name) {
                        return Err(Error::Syntax {
                            line,
                            message: format!("invalid modifier name {mod_name:?}"),
                        });
                    }
                    mods.push((mod_name, args));
                }
            }
            Ok(Marker::Variable { name: name_part, mods })
        }
    }
}

fn find_variable_missing(frames: &[Frame]) -> Option<VariableMissingFn> {
    frames
        .iter()
        .rev()
        .filter_map(|f| f.active.as_ref())
        .find_map(|d| d.borrow().variable_missing().cloned())
}

fn find_modifier_missing(frames: &[Frame]) -> Option<ModifierMissingFn> {
    frames
        .iter()
        .rev()
        .filter_map(|f| f.active.as_ref())
        .find_map(|d| d.borrow().modifier_missing().cloned())
}

fn expand_variable(
    name: &str,
    mods: &[(&str, Option<&str>)],
    modifiers: &HashMap<String, ModifierFn>,
    output: &mut Output,
    frames: &[Frame],
) {
    let active = frames.last().and_then(|f| f.active.clone());
    let value = active.as_ref().and_then(|d| d.borrow().lookup_string(name));
    let value = match value {
        Some(v) => v,
        None => match find_variable_missing(frames).and_then(|cb| cb(name)) {
            Some(v) => v,
            None => return,
        },
    };

    if mods.is_empty() {
        output.emit(frames, &value);
        return;
    }

    // Each segment's output feeds the next (`cstring_escape:breakup_lines` splits the
    // *escaped* value), so the pipeline threads one buffer through in sequence.
    let mut applied = false;
    let mut current = value.clone();
    for (mod_name, args) in mods {
        let args = args.unwrap_or("");
        let mut segment_out = String::new();
        if let Some(f) = modifiers.get(*mod_name) {
            f(mod_name, args, name, &current, &mut segment_out);
            applied = true;
            current = segment_out;
        } else if let Some(cb) = find_modifier_missing(frames) {
            cb(mod_name, args, name, &current, &mut segment_out);
            applied = true;
            current = segment_out;
        }
    }
    if applied {
        output.emit(frames, &current);
    } else {
        output.emit(frames, &value);
    }
}

#[allow(clippy::too_many_arguments)]
fn expand_body(
    input: &str,
    pos: &mut usize,
    delims: &mut Delimiters,
    modifiers: &HashMap<String, ModifierFn>,
    output: &mut Output,
    frames: &mut Vec<Frame>,
    current_section: Option<&str>,
    last_expansion: bool,
) -> Result<StopReason> {
    loop {
        let Some(rel) = input[*pos..].find(delims.start.as_str()) else {
            output.emit(frames, &input[*pos..]);
            *pos = input.len();
            return Ok(StopReason::Eof);
        };
        let marker_start = *pos + rel;
        output.emit(frames, &input[*pos..marker_start]);

        let body_start = marker_start + delims.start.len();
        let Some(body_rel) = input[body_start..].find(delims.end.as_str()) else {
            return Err(Error::Syntax {
                line: line_of(input, marker_start),
                message: "unterminated marker".to_string(),
            });
        };
        let body = &input[body_start..body_start + body_rel];
        let after_marker = body_start + body_rel + delims.end.len();

        let marker = classify(input, marker_start, body)?;
        *pos = after_marker;

        match marker {
            Marker::Comment => {}
            Marker::Delimiter { start, end } => {
                *delims = Delimiters::assume_valid(start, end);
            }
            Marker::Variable { name, mods } => {
                expand_variable(name, &mods, modifiers, output, frames);
            }
            Marker::EndSection { name } => {
                if Some(name) != current_section {
                    return Err(Error::Syntax {
                        line: line_of(input, marker_start),
                        message: format!("mismatched end section {name:?}"),
                    });
                }
                return Ok(StopReason::EndSection(name.to_string()));
            }
            Marker::Section { name } => {
                expand_section(
                    input,
                    pos,
                    delims,
                    modifiers,
                    output,
                    frames,
                    current_section,
                    last_expansion,
                    name,
                )?;
            }
            Marker::Include { name } => {
                expand_include(delims, modifiers, output, frames, name)?;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn expand_section(
    input: &str,
    pos: &mut usize,
    delims: &mut Delimiters,
    modifiers: &HashMap<String, ModifierFn>,
    output: &mut Output,
    frames: &mut Vec<Frame>,
    current_section: Option<&str>,
    last_expansion: bool,
    name: &str,
) -> Result<()> {
    let body_start = *pos;

    if let Some(cur) = current_section {
        if name == format!("{cur}_separator") {
            let snap = output.snapshot();
            let inherited_active = frames.last().and_then(|f| f.active.clone());
            frames.push(Frame { active: inherited_active, expanding_include: false, line_ws: String::new() });
            let mut local_pos = body_start;
            let mut local_delims = delims.clone();
            let stop =
                expand_body(input, &mut local_pos, &mut local_delims, modifiers, output, frames, Some(name), false);
            frames.pop();
            expect_closed(stop, name, input, body_start)?;
            if last_expansion {
                output.restore(snap);
            }
            *pos = local_pos;
            *delims = local_delims;
            return Ok(());
        }
    }

    let active = frames.last().and_then(|f| f.active.clone());
    let children = active.as_ref().and_then(|d| d.borrow().lookup_sections(name)).unwrap_or_default();

    if children.is_empty() {
        let snap = output.snapshot();
        frames.push(Frame { active: None, expanding_include: false, line_ws: String::new() });
        let mut local_pos = body_start;
        let mut local_delims = delims.clone();
        let stop = expand_body(input, &mut local_pos, &mut local_delims, modifiers, output, frames, Some(name), true);
        frames.pop();
        expect_closed(stop, name, input, body_start)?;
        output.restore(snap);
        *pos = local_pos;
        *delims = local_delims;
        return Ok(());
    }

    let last_index = children.len() - 1;
    let mut final_pos = body_start;
    let mut final_delims = delims.clone();
    for (i, child) in children.iter().enumerate() {
        let is_last = i == last_index;
        let active_for_child = if child.hidden { None } else { Some(child.dict.clone()) };
        let snap = output.snapshot();
        frames.push(Frame { active: active_for_child, expanding_include: false, line_ws: String::new() });
        let mut local_pos = body_start;
        let mut local_delims = delims.clone();
        let stop =
            expand_body(input, &mut local_pos, &mut local_delims, modifiers, output, frames, Some(name), is_last);
        frames.pop();
        expect_closed(stop, name, input, body_start)?;
        if child.hidden {
            output.restore(snap);
        }
        final_pos = local_pos;
        final_delims = local_delims;
    }
    *pos = final_pos;
    *delims = final_delims;
    Ok(())
}

fn expect_closed(stop: Result<StopReason>, name: &str, input: &str, body_start: usize) -> Result<()> {
    match stop? {
        StopReason::EndSection(_) => Ok(()),
        StopReason::Eof => Err(Error::Syntax {
            line: line_of(input, body_start),
            message: format!("unterminated section {name:?}"),
        }),
    }
}

fn expand_include(
    delims: &Delimiters,
    modifiers: &HashMap<String, ModifierFn>,
    output: &mut Output,
    frames: &mut Vec<Frame>,
    name: &str,
) -> Result<()> {
    let active = frames.last().and_then(|f| f.active.clone());
    let Some((text, children)) =
        active.as_ref().and_then(|d| d.borrow().lookup_include_text_and_sections(name))
    else {
        return Ok(());
    };
    let Some(text) = text else { return Ok(()) };

    let line_ws = output.current_line_ws();

    if children.is_empty() {
        frames.push(Frame { active: None, expanding_include: true, line_ws });
        let mut local_pos = 0;
        let mut local_delims = delims.clone();
        let stop = expand_body(&text, &mut local_pos, &mut local_delims, modifiers, output, frames, None, true);
        frames.pop();
        stop?;
        return Ok(());
    }

    let last_index = children.len() - 1;
    for (i, child) in children.iter().enumerate() {
        let is_last = i == last_index;
        let active_for_child = if child.hidden { None } else { Some(child.dict.clone()) };
        frames.push(Frame { active: active_for_child, expanding_include: true, line_ws: line_ws.clone() });
        let mut local_pos = 0;
        let mut local_delims = delims.clone();
        let stop = expand_body(&text, &mut local_pos, &mut local_delims, modifiers, output, frames, None, is_last);
        frames.pop();
        stop?;
    }
    Ok(())
}

/// Runs the engine over `text` once, against `root`, returning the fully-materialized
/// output or the first fatal error encountered. On error no partial output is
/// returned: the caller gets all-or-nothing.
pub(crate) fn expand_template(
    text: &str,
    root: DictHandle,
    modifiers: &HashMap<String, ModifierFn>,
    initial_delims: Delimiters,
) -> Result<String> {
    let mut output = Output::new();
    let mut frames = vec![Frame { active: Some(root), expanding_include: false, line_ws: String::new() }];
    let mut pos = 0;
    let mut delims = initial_delims;
    let stop = expand_body(text, &mut pos, &mut delims, modifiers, &mut output, &mut frames, None, false)?;
    debug_assert!(matches!(stop, StopReason::Eof), "a top-level end-section would have errored already");
    Ok(output.buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dictionary::{Dictionary, DictionaryHandleExt};
    use crate::engine::modifier::{cstring_escape_modifier, none_modifier};

    fn modifiers() -> HashMap<String, ModifierFn> {
        let mut m = HashMap::new();
        m.insert("none".to_string(), none_modifier());
        m.insert("cstring_escape".to_string(), cstring_escape_modifier());
        m
    }

    #[test]
    fn identity_without_markers() {
        let dict = Dictionary::new();
        let out = expand_template("hello", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn variable_substitution() {
        let dict = Dictionary::new();
        dict.borrow_mut().set_string("X", "1");
        dict.borrow_mut().set_string("Y", "2");
        let out = expand_template("{{X}}-{{Y}}", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "1-2");
    }

    #[test]
    fn missing_variable_no_callback() {
        let dict = Dictionary::new();
        let out = expand_template("[{{X}}]", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "[]");
    }

    #[test]
    fn section_iteration() {
        let dict = Dictionary::new();
        for v in ["a", "b", "c"] {
            let child = Dictionary::new();
            child.borrow_mut().set_string("I", v);
            dict.add_dictionary("L", child).unwrap();
        }
        let out = expand_template("{{#L}}{{I}};{{/L}}", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "a;b;c;");
    }

    #[test]
    fn separator_between_iterations() {
        let dict = Dictionary::new();
        for v in ["a", "b", "c"] {
            let child = Dictionary::new();
            child.borrow_mut().set_string("I", v);
            dict.add_dictionary("L", child).unwrap();
        }
        let t = "{{#L}}{{I}}{{#L_separator}},{{/L_separator}}{{/L}}";
        let out = expand_template(t, dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "a,b,c");
    }

    #[test]
    fn separator_single_child_no_comma() {
        let dict = Dictionary::new();
        let child = Dictionary::new();
        child.borrow_mut().set_string("I", "x");
        dict.add_dictionary("L", child).unwrap();
        let t = "{{#L}}{{I}}{{#L_separator}},{{/L_separator}}{{/L}}";
        let out = expand_template(t, dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "x");
    }

    #[test]
    fn separator_no_children_empty() {
        let dict = Dictionary::new();
        let t = "{{#L}}{{I}}{{#L_separator}},{{/L_separator}}{{/L}}";
        let out = expand_template(t, dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn hidden_section_is_silent() {
        let dict = Dictionary::new();
        let child = Dictionary::new();
        child.borrow_mut().set_string("I", "x");
        dict.add_dictionary("S", child).unwrap();
        dict.borrow_mut().set_section_visibility("S", false).unwrap();
        let out = expand_template("{{#S}}{{I}}{{/S}}", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn include_indentation_is_reproduced() {
        let dict = Dictionary::new();
        dict.borrow_mut()
            .set_include_cb("INC", std::rc::Rc::new(|_| Some("line1\nline2\n".to_string())), None)
            .unwrap();
        let out = expand_template("X:\n    {{>INC}}\n", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "X:\n    line1\n    line2\n\n");
    }

    #[test]
    fn include_is_fetched_at_most_once() {
        let dict = Dictionary::new();
        let calls = std::rc::Rc::new(std::cell::Cell::new(0usize));
        let calls_cb = calls.clone();
        dict.borrow_mut()
            .set_include_cb(
                "INC",
                std::rc::Rc::new(move |_| {
                    calls_cb.set(calls_cb.get() + 1);
                    Some("hi".to_string())
                }),
                None,
            )
            .unwrap();
        for v in ["a", "b"] {
            let child = Dictionary::new();
            child.borrow_mut().set_string("I", v);
            dict.add_dictionary("L", child).unwrap();
        }
        let out = expand_template("{{#L}}{{>INC}}{{/L}}", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "hihi");
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn delimiter_switch_round_trip() {
        let dict = Dictionary::new();
        dict.borrow_mut().set_string("V", "Z");
        let out =
            expand_template("{{=<% %>=}}<%V%>{{V}}", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "Z{{V}}");
    }

    #[test]
    fn modifier_pipeline_cstring_escape() {
        let dict = Dictionary::new();
        dict.borrow_mut().set_string("X", "a\"\nb");
        let out = expand_template("{{X:cstring_escape}}", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "a\\\"\\nb");
    }

    #[test]
    fn unmatched_modifier_pipeline_falls_back_to_raw_value() {
        let dict = Dictionary::new();
        dict.borrow_mut().set_string("X", "raw");
        let out = expand_template("{{X:nope}}", dict, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "raw");
    }

    #[test]
    fn parent_chain_lookup() {
        let parent = Dictionary::new();
        parent.borrow_mut().set_string("P", "from-parent");
        let child = Dictionary::new();
        parent.add_dictionary("S", child).unwrap();
        let out =
            expand_template("{{#S}}{{P}}{{/S}}", parent, &modifiers(), Delimiters::default()).unwrap();
        assert_eq!(out, "from-parent");
    }

    #[test]
    fn builtin_variables_resolve_without_setup() {
        let dict = Dictionary::new();
        let out = expand_template("{{BI_SPACE}}{{BI_NEWLINE}}", dict, &modifiers(), Delimiters::default())
            .unwrap();
        assert_eq!(out, " \n");
    }

    #[test]
    fn mismatched_end_section_fails() {
        let dict = Dictionary::new();
        let err = expand_template("{{#A}}{{/B}}", dict, &modifiers(), Delimiters::default()).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }

    #[test]
    fn marker_over_64_bytes_fails() {
        let dict = Dictionary::new();
        let long_name = "A".repeat(65);
        let text = format!("{{{{{long_name}}}}}");
        let err = expand_template(&text, dict, &modifiers(), Delimiters::default()).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }
}
