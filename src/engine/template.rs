//! The `Template` object: a template's text, its modifier registry, and a non-owning
//! reference to the dictionary it expands against.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;

use crate::engine::dictionary::DictHandle;
use crate::engine::modifier::{ModifierFn, cstring_escape_modifier, none_modifier};
use crate::engine::parser::{Delimiters, expand_template};
use crate::error::{Error, Result};

/// A parsed template bound to a modifier registry and, optionally, a dictionary to
/// expand against.
///
/// `Template` owns its text and its modifiers; it holds only a cloned (non-owning, in
/// the sense that dropping the `Template` doesn't affect the dictionary graph)
/// reference to the dictionary set on it with [`Template::set_dictionary`].
///
/// # Examples
///
/// ```rust
/// use ctpl::{Dictionary, DictionaryHandleExt, Template};
///
/// let dict = Dictionary::new();
/// dict.borrow_mut().set_string("NAME", "world");
///
/// let mut template = Template::new();
/// template.load_template_text("Hello {{NAME}}!");
/// template.set_dictionary(dict);
/// assert_eq!(template.expand().unwrap(), "Hello world!");
/// ```
#[derive(Clone)]
pub struct Template {
    text: String,
    modifiers: HashMap<String, ModifierFn>,
    dictionary: Option<DictHandle>,
    delimiters: Delimiters,
}

impl Template {
    /// Creates an empty template seeded with the `none` and `cstring_escape`
    /// built-in modifiers and the default `{{`/`}}` delimiters.
    pub fn new() -> Self {
        let mut modifiers = HashMap::new();
        modifiers.insert("none".to_string(), none_modifier());
        modifiers.insert("cstring_escape".to_string(), cstring_escape_modifier());
        Template { text: String::new(), modifiers, dictionary: None, delimiters: Delimiters::default() }
    }

    /// Replaces the template text, releasing whatever text was previously loaded.
    pub fn load_template_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Reads `path` and loads its contents as the template text.
    pub fn load_template_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|source| Error::Io { path: path.display().to_string(), source })?;
        self.text = text;
        Ok(())
    }

    /// Reconfigures the delimiter pair used at the start of expansion. A template
    /// using `{{=NEW_START NEW_END=}}` internally switches again past this point.
    pub fn set_delimiters(&mut self, start: impl Into<String>, end: impl Into<String>) -> Result<()> {
        self.delimiters = Delimiters::new(start, end)?;
        Ok(())
    }

    /// Registers (or replaces) a modifier under `name`.
    pub fn add_modifier(&mut self, name: impl Into<String>, f: ModifierFn) {
        self.modifiers.insert(name.into(), f);
    }

    /// Binds the dictionary this template expands against.
    pub fn set_dictionary(&mut self, dictionary: DictHandle) {
        self.dictionary = Some(dictionary);
    }

    /// Expands the template text against the bound dictionary, producing the fully
    /// materialized output.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Syntax`] for malformed markers, mismatched section nesting, or
    /// an out-of-range marker/modifier name.
    pub fn expand(&self) -> Result<String> {
        let root = match &self.dictionary {
            Some(d) => d.clone(),
            None => crate::engine::dictionary::Dictionary::new(),
        };
        expand_template(&self.text, root, &self.modifiers, self.delimiters.clone())
    }
}

impl Default for Template {
    fn default() -> Self {
        Template::new()
    }
}

impl Display for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::dictionary::{Dictionary, DictionaryHandleExt};

    #[test]
    fn expand_without_dictionary_uses_global_only() {
        let mut template = Template::new();
        template.load_template_text("{{BI_SPACE}}x{{BI_SPACE}}");
        assert_eq!(template.expand().unwrap(), " x ");
    }

    #[test]
    fn expand_with_bound_dictionary() {
        let dict = Dictionary::new();
        dict.borrow_mut().set_string("NAME", "world");
        let mut template = Template::new();
        template.load_template_text("Hello {{NAME}}!");
        template.set_dictionary(dict);
        assert_eq!(template.expand().unwrap(), "Hello world!");
    }

    #[test]
    fn custom_modifier_is_applied() {
        let dict = Dictionary::new();
        dict.borrow_mut().set_string("X", "abc");
        let mut template = Template::new();
        template.add_modifier(
            "shout",
            std::rc::Rc::new(|_n, _a, _m, v, out| out.push_str(&v.to_uppercase())),
        );
        template.load_template_text("{{X:shout}}");
        template.set_dictionary(dict);
        assert_eq!(template.expand().unwrap(), "ABC");
    }

    #[test]
    fn set_delimiters_changes_initial_markers() {
        let dict = Dictionary::new();
        dict.borrow_mut().set_string("X", "z");
        let mut template = Template::new();
        template.set_delimiters("<%", "%>").unwrap();
        template.load_template_text("<%X%>");
        template.set_dictionary(dict);
        assert_eq!(template.expand().unwrap(), "z");
    }

    #[test]
    fn load_template_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.tpl");
        std::fs::write(&path, "{{BI_NEWLINE}}").unwrap();
        let mut template = Template::new();
        template.load_template_from_path(&path).unwrap();
        assert_eq!(template.expand().unwrap(), "\n");
    }

    #[test]
    fn load_template_from_missing_path_fails() {
        let mut template = Template::new();
        let err = template.load_template_from_path("/nonexistent/path/xyz.tpl").unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn section_iteration_end_to_end() {
        let dict = Dictionary::new();
        for name in ["a", "b"] {
            let child = Dictionary::new();
            child.borrow_mut().set_string("ITEM", name);
            dict.add_dictionary("ITEMS", child).unwrap();
        }
        let mut template = Template::new();
        template.load_template_text("{{#ITEMS}}{{ITEM}}{{#ITEMS_separator}}, {{/ITEMS_separator}}{{/ITEMS}}");
        template.set_dictionary(dict);
        assert_eq!(template.expand().unwrap(), "a, b");
    }
}
