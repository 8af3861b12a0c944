//! Generic templates, instantiation, and pending-work queues.
//!
//! Generics are erased by monomorphization: the driver records templates
//! when it first visits them, call sites and type references request
//! instantiations, and the pending queues are drained after top-level
//! traversal. Routine bodies are deferred to end-of-program (forward
//! references, no unbounded re-entry); record and entity skeletons are
//! emitted immediately so later references resolve.

use super::error::CodeGenError;
use super::mangle::monomorphic_name;
use super::state::CodeGen;
use super::types::{replace_word, split_generic_args};
use crate::ast::Node;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fmt::Write as _;

/// Bookkeeping tables for generic templates and their instantiations.
/// Routine templates sit in a `BTreeMap` so template scans (method
/// lookup by base name) stay deterministic.
#[derive(Debug, Default)]
pub(crate) struct GenericRegistry {
    routine_templates: BTreeMap<String, Node>,
    record_templates: HashMap<String, Node>,
    entity_templates: HashMap<String, Node>,
    routine_instantiations: HashMap<String, Vec<Vec<String>>>,
    type_instantiations: HashMap<String, Vec<Vec<String>>>,
    emitted_types: HashSet<String>,
    pending_routines: VecDeque<String>,
    pending_records: VecDeque<String>,
    pending_entities: VecDeque<String>,
    /// record/entity mangled name -> ordered (field name, llvm type).
    fields: HashMap<String, Vec<(String, String)>>,
    menus: HashSet<String>,
}

impl GenericRegistry {
    pub fn new() -> Self {
        GenericRegistry::default()
    }

    pub fn register_routine_template(&mut self, name: &str, node: Node) {
        self.routine_templates.insert(name.to_string(), node);
    }

    pub fn register_record_template(&mut self, name: &str, node: Node) {
        self.record_templates.insert(name.to_string(), node);
    }

    pub fn register_entity_template(&mut self, name: &str, node: Node) {
        self.entity_templates.insert(name.to_string(), node);
    }

    pub fn register_menu(&mut self, name: &str) {
        self.menus.insert(name.to_string());
    }

    pub fn has_routine_template(&self, name: &str) -> bool {
        self.routine_templates.contains_key(name)
    }

    pub fn has_record_template(&self, name: &str) -> bool {
        self.record_templates.contains_key(name)
    }

    pub fn has_entity_template(&self, name: &str) -> bool {
        self.entity_templates.contains_key(name)
    }

    pub fn is_menu(&self, name: &str) -> bool {
        self.menus.contains(name)
    }

    /// Whether a name denotes a type this module knows about: a
    /// registered template, an emitted aggregate, or a menu.
    pub fn is_known_type(&self, name: &str) -> bool {
        self.record_templates.contains_key(name)
            || self.entity_templates.contains_key(name)
            || self.fields.contains_key(name)
            || self.menus.contains(name)
    }

    pub fn routine_template(&self, name: &str) -> Option<&Node> {
        self.routine_templates.get(name)
    }

    pub fn routine_template_names(&self) -> impl Iterator<Item = String> + '_ {
        self.routine_templates.keys().cloned()
    }

    pub fn record_template(&self, name: &str) -> Option<&Node> {
        self.record_templates.get(name)
    }

    pub fn entity_template(&self, name: &str) -> Option<&Node> {
        self.entity_templates.get(name)
    }

    /// Record a routine instantiation. Returns false when the argument
    /// list was already seen (idempotent instantiation).
    pub fn record_routine_instantiation(&mut self, name: &str, args: &[String]) -> bool {
        let lists = self
            .routine_instantiations
            .entry(name.to_string())
            .or_default();
        if lists.iter().any(|list| list == args) {
            return false;
        }
        lists.push(args.to_vec());
        true
    }

    /// Record a type instantiation. Same dedupe contract as routines.
    pub fn record_type_instantiation(&mut self, name: &str, args: &[String]) -> bool {
        let lists = self
            .type_instantiations
            .entry(name.to_string())
            .or_default();
        if lists.iter().any(|list| list == args) {
            return false;
        }
        lists.push(args.to_vec());
        true
    }

    pub fn mark_type_emitted(&mut self, mangled: &str) -> bool {
        self.emitted_types.insert(mangled.to_string())
    }

    pub fn register_fields(&mut self, mangled: &str, fields: Vec<(String, String)>) {
        self.fields.insert(mangled.to_string(), fields);
    }

    pub fn record_fields(&self, mangled: &str) -> Option<&Vec<(String, String)>> {
        self.fields.get(mangled)
    }

    pub fn push_pending_routine(&mut self, name: &str, args: &[String]) {
        self.pending_routines.push_back(encode_pending(name, args));
    }

    pub fn push_pending_record(&mut self, name: &str, args: &[String]) {
        self.pending_records.push_back(encode_pending(name, args));
    }

    pub fn push_pending_entity(&mut self, name: &str, args: &[String]) {
        self.pending_entities.push_back(encode_pending(name, args));
    }

    pub fn pop_pending_routine(&mut self) -> Option<(String, Vec<String>)> {
        self.pending_routines.pop_front().map(|s| decode_pending(&s))
    }

    pub fn pop_pending_record(&mut self) -> Option<(String, Vec<String>)> {
        self.pending_records.pop_front().map(|s| decode_pending(&s))
    }

    pub fn pop_pending_entity(&mut self) -> Option<(String, Vec<String>)> {
        self.pending_entities.pop_front().map(|s| decode_pending(&s))
    }

    pub fn pending_is_empty(&self) -> bool {
        self.pending_routines.is_empty()
            && self.pending_records.is_empty()
            && self.pending_entities.is_empty()
    }
}

fn encode_pending(name: &str, args: &[String]) -> String {
    format!("{}|{}", name, args.join(","))
}

fn decode_pending(item: &str) -> (String, Vec<String>) {
    match item.split_once('|') {
        Some((name, args)) if !args.is_empty() => {
            (name.to_string(), split_generic_args(args))
        }
        Some((name, _)) => (name.to_string(), Vec::new()),
        None => (item.to_string(), Vec::new()),
    }
}

/// Type parameters named in the receiver portion of a dotted generic
/// routine name (`Stack<T>.push` yields `["T"]`).
pub(crate) fn receiver_type_params(name: &str) -> Vec<String> {
    let Some(dot) = name.rfind('.') else {
        return Vec::new();
    };
    let receiver = &name[..dot];
    match super::types::parse_generic(receiver) {
        Some((_, args)) => split_generic_args(args),
        None => Vec::new(),
    }
}

/// Filter a routine's declared type parameters down to the real
/// routine-level generics.
///
/// The parser delivers receiver type arguments as routine parameters
/// (`Text<letter8>.to_cstr` arrives with `letter8`); a parameter that
/// appears as `<param>` inside the dot-prefixed receiver is not a
/// routine-level generic and must be stripped, or the routine is
/// registered as a template and never emitted.
pub(crate) fn filter_receiver_params(name: &str, params: &[String]) -> Vec<String> {
    let Some(dot) = name.rfind('.') else {
        return params.to_vec();
    };
    let receiver = &name[..dot];
    let Some((_, receiver_args)) = super::types::parse_generic(receiver) else {
        return params.to_vec();
    };
    params
        .iter()
        .filter(|param| {
            replace_word(receiver_args, param, "\u{0}") == receiver_args
        })
        .cloned()
        .collect()
}

impl CodeGen {
    /// Whether a routine declaration is a generic template.
    ///
    /// True when routine-level parameters survive the receiver filter,
    /// or when the receiver portion's angle arguments are unbound type
    /// parameters rather than concrete types (`Stack<T>.push` is a
    /// template; `Text<letter8>.to_cstr` is not).
    pub(crate) fn routine_is_template(&self, name: &str, type_params: &[String]) -> bool {
        if !filter_receiver_params(name, type_params).is_empty() {
            return true;
        }
        receiver_type_params(name).iter().any(|param| {
            type_params.contains(param)
                && !super::mangle::is_builtin_type(param)
                && !self.generics.is_known_type(param)
        })
    }

    /// Request a monomorphic instance of a generic routine.
    ///
    /// Returns the mangled name. Bodies are deferred: the first request
    /// enqueues pending work, later requests with the same argument list
    /// only return the cached name.
    pub(crate) fn instantiate_generic_routine(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<String, CodeGenError> {
        let mangled = monomorphic_name(name, args);
        if self.generics.record_routine_instantiation(name, args) {
            self.generics.push_pending_routine(name, args);
        }
        Ok(mangled)
    }

    /// Request a monomorphic instance of a generic record.
    ///
    /// Unlike routines, the struct skeleton is emitted immediately so
    /// subsequent type references resolve; the pending queue only drives
    /// the flush bookkeeping.
    pub(crate) fn instantiate_generic_record(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<String, CodeGenError> {
        let mangled = monomorphic_name(name, args);
        if self.generics.record_type_instantiation(name, args) {
            self.generics.push_pending_record(name, args);
            self.emit_type_skeleton(name, args, &mangled, false)?;
        }
        Ok(mangled)
    }

    /// Request a monomorphic instance of a generic entity.
    pub(crate) fn instantiate_generic_entity(
        &mut self,
        name: &str,
        args: &[String],
    ) -> Result<String, CodeGenError> {
        let mangled = monomorphic_name(name, args);
        if self.generics.record_type_instantiation(name, args) {
            self.generics.push_pending_entity(name, args);
            self.emit_type_skeleton(name, args, &mangled, true)?;
        }
        Ok(mangled)
    }

    /// Emit the `%struct.<mangled> = type { ... }` skeleton for a
    /// generic record or entity instantiation and register its layout.
    fn emit_type_skeleton(
        &mut self,
        name: &str,
        args: &[String],
        mangled: &str,
        is_entity: bool,
    ) -> Result<(), CodeGenError> {
        if !self.generics.mark_type_emitted(mangled) {
            return Ok(());
        }

        let template = if is_entity {
            self.generics.entity_template(name).cloned()
        } else {
            self.generics.record_template(name).cloned()
        };
        let (type_params, template_fields) = match template {
            Some(Node::Record {
                type_params, fields, ..
            })
            | Some(Node::Entity {
                type_params, fields, ..
            }) => (type_params, fields),
            _ => {
                return Err(CodeGenError::UnsupportedOperation(format!(
                    "no template registered for generic type '{}'",
                    name
                )));
            }
        };

        let subs: HashMap<String, String> = type_params
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();

        let mut mapped_fields = Vec::with_capacity(template_fields.len());
        for field in &template_fields {
            let llvm = self.map_type_with_substitution(&field.type_name, &subs)?;
            mapped_fields.push((field.name.clone(), llvm));
        }

        let field_list = mapped_fields
            .iter()
            .map(|(_, t)| t.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(
            &mut self.type_definitions,
            "%struct.{} = type {{ {} }}",
            mangled, field_list
        )?;

        self.generics.register_fields(mangled, mapped_fields);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Field, SourceLocation};

    fn record_template(name: &str, params: &[&str], fields: &[(&str, &str)]) -> Node {
        Node::Record {
            name: name.to_string(),
            type_params: params.iter().map(|p| p.to_string()).collect(),
            fields: fields
                .iter()
                .map(|(n, t)| Field {
                    name: n.to_string(),
                    type_name: t.to_string(),
                    location: SourceLocation::default(),
                })
                .collect(),
            location: SourceLocation::default(),
        }
    }

    #[test]
    fn test_routine_instantiation_is_idempotent() {
        let mut codegen = CodeGen::for_tests();
        let args = vec!["s32".to_string()];
        let first = codegen.instantiate_generic_routine("id", &args).unwrap();
        let second = codegen.instantiate_generic_routine("id", &args).unwrap();
        assert_eq!(first, "id_s32");
        assert_eq!(first, second);
        // Only one pending work item for the pair
        assert!(codegen.generics.pop_pending_routine().is_some());
        assert!(codegen.generics.pop_pending_routine().is_none());
    }

    #[test]
    fn test_record_skeleton_emitted_once() {
        let mut codegen = CodeGen::for_tests();
        codegen
            .generics
            .register_record_template("Pair", record_template(
                "Pair",
                &["A", "B"],
                &[("first", "A"), ("second", "B")],
            ));

        let args = vec!["s32".to_string(), "f64".to_string()];
        let mangled = codegen.instantiate_generic_record("Pair", &args).unwrap();
        assert_eq!(mangled, "Pair_s32_f64");
        assert!(codegen
            .type_definitions
            .contains("%struct.Pair_s32_f64 = type { i32, double }"));

        codegen.instantiate_generic_record("Pair", &args).unwrap();
        assert_eq!(
            codegen.type_definitions.matches("%struct.Pair_s32_f64").count(),
            1
        );
    }

    #[test]
    fn test_pending_roundtrip_with_nested_args() {
        let mut registry = GenericRegistry::new();
        let args = vec!["Pair<s32, u8>".to_string(), "text".to_string()];
        registry.push_pending_routine("wrap", &args);
        let (name, decoded) = registry.pop_pending_routine().unwrap();
        assert_eq!(name, "wrap");
        assert_eq!(decoded, args);
    }

    #[test]
    fn test_filter_receiver_params() {
        let filtered = filter_receiver_params(
            "Text<letter8>.to_cstr",
            &["letter8".to_string()],
        );
        assert!(filtered.is_empty());

        let filtered = filter_receiver_params(
            "Stack<T>.map",
            &["T".to_string(), "U".to_string()],
        );
        assert_eq!(filtered, vec!["U".to_string()]);

        let filtered = filter_receiver_params("plain", &["T".to_string()]);
        assert_eq!(filtered, vec!["T".to_string()]);
    }

    #[test]
    fn test_receiver_type_params() {
        assert_eq!(
            receiver_type_params("Stack<T>.push"),
            vec!["T".to_string()]
        );
        assert_eq!(
            receiver_type_params("Map<K, V>.get"),
            vec!["K".to_string(), "V".to_string()]
        );
        assert!(receiver_type_params("plain").is_empty());
    }

    #[test]
    fn test_empty_type_params_equivalent_to_none() {
        let mut registry = GenericRegistry::new();
        assert!(!registry.has_routine_template("f"));
        // Recording an instantiation with no arguments still dedupes
        assert!(registry.record_routine_instantiation("f", &[]));
        assert!(!registry.record_routine_instantiation("f", &[]));
    }
}
