//! Semantic-analysis results consumed by the code generator.
//!
//! The semantic analyzer runs before code generation and publishes two
//! artifacts: a symbol table of every routine it resolved, and a registry
//! of loaded modules (imports) keyed by module name. The generator only
//! queries these; it never mutates them.

use crate::ast::Node;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

/// A parameter as recorded by the semantic analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolParameter {
    pub name: String,
    /// `None` for `auto`-typed parameters (externals only).
    pub type_name: Option<String>,
}

/// A routine symbol resolved by the semantic analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutineSymbol {
    pub name: String,
    pub parameters: Vec<SymbolParameter>,
    pub return_type: Option<String>,
    pub is_external: bool,
    pub is_generic: bool,
}

/// The semantic symbol table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SemanticSymbols {
    routines: Vec<RoutineSymbol>,
    namespaces: HashSet<String>,
}

impl SemanticSymbols {
    pub fn new() -> Self {
        SemanticSymbols::default()
    }

    pub fn add_routine(&mut self, symbol: RoutineSymbol) {
        self.routines.push(symbol);
    }

    pub fn add_namespace(&mut self, name: impl Into<String>) {
        self.namespaces.insert(name.into());
    }

    /// Every routine symbol, in registration order.
    pub fn get_all_symbols(&self) -> &[RoutineSymbol] {
        &self.routines
    }

    /// Whether a dotted-name prefix is a namespace rather than a receiver
    /// type. Method mangling depends on this distinction.
    pub fn is_namespace(&self, name: &str) -> bool {
        self.namespaces.contains(name)
    }
}

/// A module the import loader resolved: source path plus parsed AST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadedModule {
    pub path: PathBuf,
    pub ast: Node,
}

/// Registry of loaded modules, keyed by module name.
///
/// A `BTreeMap` keeps iteration deterministic, which keeps emitted IR
/// stable across runs for the same input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, LoadedModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        ModuleRegistry::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, module: LoadedModule) {
        self.modules.insert(name.into(), module);
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &LoadedModule)> {
        self.modules.iter()
    }
}

/// The handoff format the front end serializes for the `rfgen` CLI:
/// program AST plus the analyzer's outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramBundle {
    #[serde(default)]
    pub source_file: Option<String>,
    pub program: Node,
    #[serde(default)]
    pub symbols: SemanticSymbols,
    #[serde(default)]
    pub modules: ModuleRegistry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_namespace_lookup() {
        let mut symbols = SemanticSymbols::new();
        symbols.add_namespace("Console");
        assert!(symbols.is_namespace("Console"));
        assert!(!symbols.is_namespace("Point"));
    }

    #[test]
    fn test_registry_iterates_in_name_order() {
        let mut registry = ModuleRegistry::new();
        let ast = Node::Program {
            declarations: vec![],
        };
        registry.insert(
            "zeta",
            LoadedModule {
                path: PathBuf::from("zeta.rf"),
                ast: ast.clone(),
            },
        );
        registry.insert(
            "alpha",
            LoadedModule {
                path: PathBuf::from("alpha.rf"),
                ast,
            },
        );
        let names: Vec<_> = registry.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
