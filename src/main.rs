//! `ctpl-embed`: embeds one or more files as C string literals, in the style of the
//! original CTemplate embedding tool.

use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use ctpl::{Dictionary, DictionaryHandleExt, Error, ModifierFn, Result, Template};

#[derive(Parser)]
#[command(name = "ctpl-embed", about = "Embed files as C string literals")]
struct Cli {
    /// PATH[=NAME] operands; NAME overrides the identifier derived from PATH.
    files: Vec<String>,
}

fn identifier_safe(s: &str) -> String {
    s.chars().map(|c| if c == '.' || c == '\\' || c == '/' { '_' } else { c }).collect()
}

/// Splits a `cstring_escape`d value roughly every 70 bytes, closing the string literal
/// and reopening it on the next line (`"\n    "`) unless the split would land right
/// after a backslash escape.
fn breakup_lines_modifier() -> ModifierFn {
    Rc::new(|_name, _args, _marker, value, out| {
        let mut since_break = 0usize;
        for ch in value.chars() {
            out.push(ch);
            since_break += ch.len_utf8();
            if since_break >= 70 && ch != '\\' {
                out.push_str("\"\n    \"");
                since_break = 0;
            }
        }
    })
}

const BUILTIN_TEMPLATE: &str =
    "@#Template@const char @TemplateName@[] = \"@TemplateBody:cstring_escape:breakup_lines@\";\n@/Template@";

fn run(files: &[String]) -> Result<String> {
    let root = Dictionary::new();
    for entry in files {
        let (path, name) = match entry.split_once('=') {
            Some((p, n)) => (p, Some(n)),
            None => (entry.as_str(), None),
        };
        let body = std::fs::read_to_string(path)
            .map_err(|source| Error::Io { path: path.to_string(), source })?;
        let template_name = identifier_safe(name.unwrap_or(path));

        let child = Dictionary::new();
        child.borrow_mut().set_string("TemplateName", template_name);
        child.borrow_mut().set_string("TemplateBody", body);
        root.add_dictionary("Template", child)?;
    }

    let mut template = Template::new();
    template.set_delimiters("@", "@")?;
    template.add_modifier("breakup_lines", breakup_lines_modifier());
    template.load_template_text(BUILTIN_TEMPLATE);
    template.set_dictionary(root);
    template.expand()
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.files.is_empty() {
        eprintln!("USAGE: ctpl-embed PATH[=NAME]...");
        return ExitCode::FAILURE;
    }

    match run(&cli.files) {
        Ok(out) => {
            print!("{out}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
