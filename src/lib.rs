//! # ctpl
//!
//! A CTemplate-dialect text template engine: hierarchical dictionaries, section
//! iteration, includes, and a modifier pipeline.
//!
//! ```rust
//! use ctpl::{Dictionary, DictionaryHandleExt, Template};
//!
//! let dict = Dictionary::new();
//! dict.borrow_mut().set_string("NAME", "world");
//!
//! let mut template = Template::new();
//! template.load_template_text("Hello {{NAME}}!");
//! template.set_dictionary(dict);
//! assert_eq!(template.expand().unwrap(), "Hello world!");
//! ```

mod engine;
pub mod error;

pub use engine::{
    CleanupTemplateFn, DictHandle, Dictionary, DictionaryHandleExt, GetTemplateFn, Include,
    ModifierFn, ModifierMissingFn, SectionChild, Template, Value, VariableMissingFn,
    global_dictionary,
};
pub use error::{Error, Result};
