//! Crash-message resolution.
//!
//! The runtime's `rf_crash` takes a message pointer; the messages
//! themselves live in the standard library as a TOML catalog
//! (`stdlib/errors.toml`). When no stdlib path is configured, parent
//! directories of the working directory are searched for a `stdlib`
//! folder. Messages the catalog does not define fall back to built-in
//! defaults so the generator keeps working without a stdlib checkout.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Default messages for the errors the generator itself emits.
const DEFAULTS: &[(&str, &str)] = &[
    ("overflow", "arithmetic overflow"),
    ("absent", "absent value"),
    ("division_by_zero", "division by zero"),
];

#[derive(Debug, Default, Deserialize)]
struct Catalog {
    #[serde(default)]
    errors: HashMap<String, String>,
}

/// Resolver for named crash messages.
#[derive(Debug, Default)]
pub struct CrashMessages {
    messages: HashMap<String, String>,
}

impl CrashMessages {
    /// Load the catalog under an explicit stdlib path, or search parent
    /// directories for a `stdlib` folder when none is given. Missing or
    /// malformed catalogs are not an error; defaults still apply.
    pub fn load(stdlib_path: Option<&Path>) -> Self {
        let root = stdlib_path
            .map(PathBuf::from)
            .or_else(find_stdlib);

        let mut messages: HashMap<String, String> = DEFAULTS
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        if let Some(root) = root {
            let catalog_path = root.join("errors.toml");
            if let Ok(content) = std::fs::read_to_string(&catalog_path) {
                if let Ok(catalog) = toml::from_str::<Catalog>(&content) {
                    messages.extend(catalog.errors);
                }
            }
        }

        CrashMessages { messages }
    }

    /// Resolve a message by name; defaults cover the generator's own
    /// error names, so lookups for those are total.
    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.messages.get(name).map(String::as_str)
    }

    /// The overflow message used by checked-arithmetic trap blocks.
    pub fn overflow(&self) -> &str {
        self.resolve("overflow").unwrap_or("arithmetic overflow")
    }

    /// The message used by `absent` statements.
    pub fn absent(&self) -> &str {
        self.resolve("absent").unwrap_or("absent value")
    }
}

/// Search the current directory and its ancestors for a `stdlib` folder.
fn find_stdlib() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join("stdlib");
        if candidate.is_dir() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}
