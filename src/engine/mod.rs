//! The expansion engine: dictionaries, the built-in modifiers, the marker
//! parser/state machine, and the `Template` object that ties them together.

pub mod dictionary;
pub mod modifier;
mod parser;
mod template;

pub use dictionary::{
    CleanupTemplateFn, DictHandle, Dictionary, DictionaryHandleExt, GetTemplateFn, Include,
    ModifierMissingFn, SectionChild, Value, VariableMissingFn, global_dictionary,
};
pub use modifier::{ModifierFn, cstring_escape_modifier, none_modifier};
pub use parser::Delimiters;
pub use template::Template;
