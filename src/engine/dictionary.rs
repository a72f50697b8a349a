//! The hierarchical dictionary: a marker-name-keyed mapping of values, used both as the
//! data a template expands against and as the child-list that drives section iteration.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use crate::error::{Error, Result};

/// A handle to a dictionary. Dictionaries form a parent-owned-children graph: a parent
/// holds `Rc` references to its children, a child holds only a non-owning `Weak`
/// reference back to its parent, so destroying a parent destroys its children but a
/// child never keeps its parent alive.
pub type DictHandle = Rc<RefCell<Dictionary>>;

/// A modifier callback invoked when a pipeline segment names a modifier that isn't
/// registered on the template. Mirrors the signature of a regular modifier function.
pub type ModifierMissingFn = Rc<dyn Fn(&str, &str, &str, &str, &mut String)>;

/// A callback invoked when a marker resolves to nothing and the dictionary chain has
/// no value for it.
pub type VariableMissingFn = Rc<dyn Fn(&str) -> Option<String>>;

/// Fetches the template text for an include, given its filename (or marker name if no
/// filename was set).
pub type GetTemplateFn = Rc<dyn Fn(&str) -> Option<String>>;

/// Releases a cached include template. Called at most once, when the owning
/// [`Include`] is dropped.
pub type CleanupTemplateFn = Rc<dyn Fn(&str, &str)>;

/// One child of a section or include's list, together with the visibility flag
/// `set_section_visibility` toggles. A hidden child still drives one iteration of the
/// body (the cursor advances through it) but with no active dictionary, so the body
/// produces no output for that iteration.
#[derive(Clone)]
pub struct SectionChild {
    pub dict: DictHandle,
    pub hidden: bool,
}

/// The tagged value kind stored per marker in a dictionary's entry table.
pub enum Value {
    /// A literal replacement string.
    String(String),
    /// An ordered list of child dictionaries, driving section iteration.
    Sections(Vec<SectionChild>),
    /// An include descriptor. Behaves as a section list over its own children; each
    /// iteration expands the *fetched* template rather than the host template.
    Include(Include),
}

impl Value {
    /// Returns the section list backing this value, if it has one. Both `Sections`
    /// and `Include` expose one, so section iteration and include iteration share the
    /// same code path without punning on the value's representation.
    pub fn as_sections(&self) -> Option<&[SectionChild]> {
        match self {
            Value::Sections(list) => Some(list),
            Value::Include(inc) => Some(&inc.sections),
            Value::String(_) => None,
        }
    }

    fn as_sections_mut(&mut self) -> Option<&mut Vec<SectionChild>> {
        match self {
            Value::Sections(list) => Some(list),
            Value::Include(inc) => Some(&mut inc.sections),
            Value::String(_) => None,
        }
    }
}

/// An include descriptor: a section list (see [`Value::as_sections`]) plus the
/// machinery to fetch and memoize the included template's text exactly once.
pub struct Include {
    sections: Vec<SectionChild>,
    marker: String,
    get_template: Option<GetTemplateFn>,
    cleanup_template: Option<CleanupTemplateFn>,
    cached_template: RefCell<Option<String>>,
    filename: Option<String>,
}

impl Include {
    /// Returns the already-fetched template text, fetching and caching it first if
    /// this is the first expansion of this include.
    pub fn template_text(&self) -> Option<String> {
        if self.cached_template.borrow().is_none() {
            let key = self.filename.as_deref().unwrap_or(&self.marker);
            let fetched = self.get_template.as_ref().and_then(|get| get(key));
            *self.cached_template.borrow_mut() = fetched;
        }
        self.cached_template.borrow().clone()
    }
}

impl Drop for Include {
    fn drop(&mut self) {
        if let (Some(cleanup), Some(text)) =
            (&self.cleanup_template, self.cached_template.borrow_mut().take())
        {
            cleanup(&self.marker, &text);
        }
    }
}

/// Hierarchical, marker-name-keyed collection of values, with a non-owning back
/// reference to a parent dictionary for lookup chaining.
pub struct Dictionary {
    entries: HashMap<String, Value>,
    modifier_missing: Option<ModifierMissingFn>,
    variable_missing: Option<VariableMissingFn>,
    parent: Option<Weak<RefCell<Dictionary>>>,
}

impl Dictionary {
    /// Creates a new, empty dictionary whose parent is the process-wide global
    /// dictionary (seeded with `BI_SPACE`/`BI_NEWLINE`).
    pub fn new() -> DictHandle {
        let handle = Rc::new(RefCell::new(Dictionary::empty()));
        handle.borrow_mut().parent = Some(Rc::downgrade(&global_dictionary()));
        handle
    }

    pub(crate) fn empty() -> Dictionary {
        Dictionary {
            entries: HashMap::new(),
            modifier_missing: None,
            variable_missing: None,
            parent: None,
        }
    }

    fn parent_handle(&self) -> Option<DictHandle> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Replaces the entry for `marker` with a literal string.
    pub fn set_string(&mut self, marker: &str, text: impl Into<String>) {
        self.entries.insert(marker.to_string(), Value::String(text.into()));
    }

    /// As [`Dictionary::set_string`], with the caller having already rendered its
    /// `format!`-style arguments into `formatted`.
    pub fn set_stringf(&mut self, marker: &str, formatted: impl Into<String>) {
        self.set_string(marker, formatted);
    }

    /// As [`Dictionary::set_string`], with the value rendered from its decimal
    /// representation.
    pub fn set_int(&mut self, marker: &str, value: i64) {
        self.set_string(marker, value.to_string());
    }

    /// Installs (or replaces) the include callbacks for `marker`, preserving any
    /// section list already accumulated under it. Fails if `marker` already holds a
    /// `String`.
    pub fn set_include_cb(
        &mut self,
        marker: &str,
        get_template: GetTemplateFn,
        cleanup_template: Option<CleanupTemplateFn>,
    ) -> Result<()> {
        let existing_sections = match self.entries.remove(marker) {
            None => Vec::new(),
            Some(Value::String(_)) => {
                return Err(Error::TypeMismatch { marker: marker.to_string() });
            }
            Some(Value::Sections(list)) => list,
            Some(Value::Include(inc)) => inc.sections,
        };
        self.entries.insert(
            marker.to_string(),
            Value::Include(Include {
                sections: existing_sections,
                marker: marker.to_string(),
                get_template: Some(get_template),
                cleanup_template,
                cached_template: RefCell::new(None),
                filename: None,
            }),
        );
        Ok(())
    }

    /// Installs the default file-backed loader and a no-op cleanup for `marker`, then
    /// records `path` as the include's filename.
    pub fn set_include_filename(&mut self, marker: &str, path: impl Into<String>) -> Result<()> {
        let path = path.into();
        self.set_include_cb(marker, default_file_loader(), None)?;
        if let Some(Value::Include(inc)) = self.entries.get_mut(marker) {
            inc.filename = Some(path);
        }
        Ok(())
    }

    /// Marks the most recently added child of `marker`'s section (or include) list
    /// hidden or visible; a hidden child expands its body with no active dictionary,
    /// producing no output, but still advances the parser's cursor. If `marker` has no
    /// children yet, installs a sentinel empty-dictionary child in the requested
    /// visibility state rather than no-op'ing.
    pub fn set_section_visibility(&mut self, marker: &str, visible: bool) -> Result<()> {
        match self.entries.get_mut(marker) {
            Some(Value::String(_)) => Err(Error::TypeMismatch { marker: marker.to_string() }),
            Some(value) => {
                match value.as_sections_mut().and_then(|list| list.last_mut()) {
                    Some(last) => last.hidden = !visible,
                    None => {
                        let sentinel = Rc::new(RefCell::new(Dictionary::empty()));
                        value
                            .as_sections_mut()
                            .expect("non-string entry has a section list")
                            .push(SectionChild { dict: sentinel, hidden: !visible });
                    }
                }
                Ok(())
            }
            None => {
                let sentinel = Rc::new(RefCell::new(Dictionary::empty()));
                self.entries.insert(
                    marker.to_string(),
                    Value::Sections(vec![SectionChild { dict: sentinel, hidden: !visible }]),
                );
                Ok(())
            }
        }
    }

    pub fn set_modifier_missing_cb(&mut self, cb: ModifierMissingFn) {
        self.modifier_missing = Some(cb);
    }

    pub fn set_variable_missing_cb(&mut self, cb: VariableMissingFn) {
        self.variable_missing = Some(cb);
    }

    pub(crate) fn modifier_missing(&self) -> Option<&ModifierMissingFn> {
        self.modifier_missing.as_ref()
    }

    pub(crate) fn variable_missing(&self) -> Option<&VariableMissingFn> {
        self.variable_missing.as_ref()
    }

    /// Looks up `marker` as a string, walking the parent chain to the global
    /// dictionary. Returns `None` if no ancestor has a string entry for it.
    pub fn lookup_string(&self, marker: &str) -> Option<String> {
        match self.entries.get(marker) {
            Some(Value::String(s)) => Some(s.clone()),
            Some(_) => None,
            None => self.parent_handle().and_then(|p| p.borrow().lookup_string(marker)),
        }
    }

    /// Looks up `marker` as a section list, walking the parent chain.
    pub fn lookup_sections(&self, marker: &str) -> Option<Vec<SectionChild>> {
        match self.entries.get(marker) {
            Some(value) => value.as_sections().map(|s| s.to_vec()),
            None => self.parent_handle().and_then(|p| p.borrow().lookup_sections(marker)),
        }
    }

    /// Convenience: `lookup_string(marker) == Some(value)`.
    pub fn variable_equals(&self, marker: &str, value: &str) -> bool {
        self.lookup_string(marker).as_deref() == Some(value)
    }

    /// Writes one `marker=value` line per entry, with section entries printed as
    /// `marker=(section)` once per child in the list.
    pub fn print_dictionary(&self, mut out: impl std::fmt::Write) -> std::fmt::Result {
        for (marker, value) in &self.entries {
            match value {
                Value::String(s) => writeln!(out, "{marker}={s}")?,
                Value::Sections(list) => {
                    for _ in list {
                        writeln!(out, "{marker}=(section)")?;
                    }
                }
                Value::Include(inc) => {
                    for _ in &inc.sections {
                        writeln!(out, "{marker}=(section)")?;
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn lookup_include_text_and_sections(
        &self,
        marker: &str,
    ) -> Option<(Option<String>, Vec<SectionChild>)> {
        match self.entries.get(marker) {
            Some(Value::Include(inc)) => Some((inc.template_text(), inc.sections.clone())),
            Some(_) => None,
            None => self
                .parent_handle()
                .and_then(|p| p.borrow().lookup_include_text_and_sections(marker)),
        }
    }
}

fn default_file_loader() -> GetTemplateFn {
    Rc::new(|path: &str| std::fs::read_to_string(path).ok())
}

thread_local! {
    static GLOBAL_DICTIONARY: DictHandle = {
        let mut dict = Dictionary::empty();
        dict.set_string("BI_SPACE", " ");
        dict.set_string("BI_NEWLINE", "\n");
        Rc::new(RefCell::new(dict))
    };
}

/// Returns the process-wide (thread-local, since dictionary handles are `Rc`-based
/// and intentionally not `Send`) global dictionary: the implicit root ancestor of
/// every lookup chain, seeded with `BI_SPACE` and `BI_NEWLINE`.
pub fn global_dictionary() -> DictHandle {
    GLOBAL_DICTIONARY.with(|d| d.clone())
}

/// Extension trait providing the handle-aware half of dictionary mutation. Adding a
/// child dictionary means re-parenting the child onto the *handle*, which a plain
/// `&mut Dictionary` method cannot express (it would need an `Rc` pointing to itself),
/// so `add_dictionary` is defined here, over `DictHandle`, rather than as an inherent
/// method of `Dictionary`.
pub trait DictionaryHandleExt {
    fn add_dictionary(&self, marker: &str, child: DictHandle) -> Result<()>;
}

impl DictionaryHandleExt for DictHandle {
    fn add_dictionary(&self, marker: &str, child: DictHandle) -> Result<()> {
        child.borrow_mut().parent = Some(Rc::downgrade(self));
        let entry = SectionChild { dict: child, hidden: false };
        let mut this = self.borrow_mut();
        match this.entries.get_mut(marker) {
            None => {
                this.entries.insert(marker.to_string(), Value::Sections(vec![entry]));
                Ok(())
            }
            Some(Value::String(_)) => Err(Error::TypeMismatch { marker: marker.to_string() }),
            Some(value) => {
                value.as_sections_mut().expect("non-string entry has a section list").push(entry);
                Ok(())
            }
        }
    }
}
