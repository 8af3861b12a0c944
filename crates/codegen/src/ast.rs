//! AST node definitions consumed by the code generator.
//!
//! The front end (lexer, parser, semantic analyzer) lives in a separate
//! crate and hands the generator a fully type-checked tree. The node set
//! here is the generator's input contract: every variant carries the
//! attributes the lowerer dispatches on, plus a source location for
//! diagnostics and stack-trace instrumentation.
//!
//! All nodes are serde-serializable so the tree can cross a process
//! boundary (the `rfgen` CLI reads a JSON-encoded program).

use serde::{Deserialize, Serialize};

/// Source anchor carried by every node.
///
/// `position` is the absolute byte offset in the source file; `line` and
/// `column` are 1-based.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceLocation {
    pub file: Option<String>,
    pub line: u32,
    pub column: u32,
    pub position: u32,
}

impl SourceLocation {
    pub fn new(line: u32, column: u32, position: u32) -> Self {
        SourceLocation {
            file: None,
            line,
            column,
            position,
        }
    }
}

/// A routine parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    /// Source-language type name. `None` for inferred (`auto`) parameters,
    /// which only occur on externals and are skipped during extern emission.
    pub type_name: Option<String>,
    #[serde(default)]
    pub location: SourceLocation,
}

/// A field of a record or entity declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub type_name: String,
    #[serde(default)]
    pub location: SourceLocation,
}

/// One case of a variant declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantCase {
    pub name: String,
    pub fields: Vec<Field>,
}

/// One arm of a `when` statement. `value: None` is the else arm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhenArm {
    pub value: Option<Node>,
    pub body: Vec<Node>,
}

/// Literal payloads. Integer and float literals keep their source text so
/// emission can render the exact decimal spelling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LiteralValue {
    Integer(String),
    Float(String),
    Boolean(bool),
    Text(String),
    Letter(char),
    None,
}

/// The AST tagged union.
///
/// Declarations, statements, and expressions share one enum; the lowerer
/// matches on the variant and returns either a temporary name (expressions)
/// or the empty string (statements and declarations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    /// Top-level program: ordered declarations.
    Program { declarations: Vec<Node> },

    // --- Declarations ---
    Routine {
        name: String,
        /// Generic type parameters. Empty means non-generic; a list that
        /// only restates receiver type arguments (e.g. `Text<letter8>.len`)
        /// is filtered by the generic registry before registration.
        type_params: Vec<String>,
        params: Vec<Parameter>,
        return_type: Option<String>,
        body: Vec<Node>,
        location: SourceLocation,
    },
    Variable {
        name: String,
        type_name: Option<String>,
        initializer: Option<Box<Node>>,
        mutable: bool,
        location: SourceLocation,
    },
    Record {
        name: String,
        type_params: Vec<String>,
        fields: Vec<Field>,
        location: SourceLocation,
    },
    Entity {
        name: String,
        type_params: Vec<String>,
        fields: Vec<Field>,
        location: SourceLocation,
    },
    Menu {
        name: String,
        cases: Vec<String>,
        location: SourceLocation,
    },
    Variant {
        name: String,
        type_params: Vec<String>,
        cases: Vec<VariantCase>,
        location: SourceLocation,
    },
    /// A named compile-time constant published by a module.
    Preset {
        name: String,
        type_name: Option<String>,
        value: Box<Node>,
        location: SourceLocation,
    },

    // --- Statements ---
    Assignment {
        target: Box<Node>,
        value: Box<Node>,
        location: SourceLocation,
    },
    Return {
        value: Option<Box<Node>>,
        location: SourceLocation,
    },
    Throw {
        value: Option<Box<Node>>,
        location: SourceLocation,
    },
    /// `absent`: throw the canonical absent-value error.
    Absent { location: SourceLocation },
    If {
        condition: Box<Node>,
        then_body: Vec<Node>,
        else_body: Option<Vec<Node>>,
        location: SourceLocation,
    },
    While {
        condition: Box<Node>,
        body: Vec<Node>,
        location: SourceLocation,
    },
    For {
        variable: String,
        start: Box<Node>,
        end: Box<Node>,
        body: Vec<Node>,
        location: SourceLocation,
    },
    When {
        subject: Box<Node>,
        arms: Vec<WhenArm>,
        location: SourceLocation,
    },
    Block {
        body: Vec<Node>,
        location: SourceLocation,
    },
    Break { location: SourceLocation },
    Continue { location: SourceLocation },
    /// `danger { ... }` is an unsafe region. Lowering is transparent;
    /// the semantic analyzer has already gated what may appear inside.
    Danger {
        body: Vec<Node>,
        location: SourceLocation,
    },
    /// `mayhem { ... }` is an unchecked region, also transparent here.
    Mayhem {
        body: Vec<Node>,
        location: SourceLocation,
    },

    // --- Scoped access ---
    Viewing {
        source: Box<Node>,
        handle: String,
        body: Vec<Node>,
        location: SourceLocation,
    },
    Hijacking {
        source: Box<Node>,
        handle: String,
        body: Vec<Node>,
        location: SourceLocation,
    },
    Observing {
        source: Box<Node>,
        handle: String,
        body: Vec<Node>,
        location: SourceLocation,
    },
    Seizing {
        source: Box<Node>,
        handle: String,
        body: Vec<Node>,
        location: SourceLocation,
    },

    // --- Expressions ---
    Literal {
        value: LiteralValue,
        /// Explicit type suffix on the literal (`42u8`), when present.
        type_suffix: Option<String>,
        location: SourceLocation,
    },
    Identifier {
        name: String,
        location: SourceLocation,
    },
    Binary {
        op: String,
        left: Box<Node>,
        right: Box<Node>,
        location: SourceLocation,
    },
    Unary {
        op: String,
        operand: Box<Node>,
        location: SourceLocation,
    },
    Call {
        callee: String,
        args: Vec<Node>,
        location: SourceLocation,
    },
    Member {
        object: Box<Node>,
        member: String,
        location: SourceLocation,
    },
    Index {
        object: Box<Node>,
        index: Box<Node>,
        location: SourceLocation,
    },
    Conditional {
        condition: Box<Node>,
        then_value: Box<Node>,
        else_value: Box<Node>,
        location: SourceLocation,
    },
    Range {
        start: Box<Node>,
        end: Box<Node>,
        inclusive: bool,
        location: SourceLocation,
    },
    /// `a < b < c`; middle operands are evaluated exactly once.
    ChainedComparison {
        operands: Vec<Node>,
        operators: Vec<String>,
        location: SourceLocation,
    },
    Lambda {
        params: Vec<Parameter>,
        body: Box<Node>,
        location: SourceLocation,
    },
    /// A bare type used in expression position (conversion targets,
    /// generic arguments surfaced as values).
    TypeRef {
        name: String,
        location: SourceLocation,
    },
    TypeConversion {
        target_type: String,
        value: Box<Node>,
        location: SourceLocation,
    },
    SliceConstructor {
        element_type: String,
        length: Box<Node>,
        heap: bool,
        location: SourceLocation,
    },
    GenericMethodCall {
        receiver: String,
        type_args: Vec<String>,
        method: String,
        args: Vec<Node>,
        location: SourceLocation,
    },
    GenericMember {
        base: String,
        type_args: Vec<String>,
        member: String,
        location: SourceLocation,
    },
    /// Raw memory operations surfaced by the stdlib (`read`/`write` through
    /// an address). Distinct from the intrinsic families.
    MemoryOperation {
        op: String,
        args: Vec<Node>,
        location: SourceLocation,
    },
    IntrinsicCall {
        name: String,
        type_args: Vec<String>,
        args: Vec<Node>,
        location: SourceLocation,
    },
    NamedArgument {
        name: String,
        value: Box<Node>,
        location: SourceLocation,
    },
}

impl Node {
    /// The source location of this node, when it carries one.
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Node::Program { .. } => None,
            Node::Routine { location, .. }
            | Node::Variable { location, .. }
            | Node::Record { location, .. }
            | Node::Entity { location, .. }
            | Node::Menu { location, .. }
            | Node::Variant { location, .. }
            | Node::Preset { location, .. }
            | Node::Assignment { location, .. }
            | Node::Return { location, .. }
            | Node::Throw { location, .. }
            | Node::Absent { location }
            | Node::If { location, .. }
            | Node::While { location, .. }
            | Node::For { location, .. }
            | Node::When { location, .. }
            | Node::Block { location, .. }
            | Node::Break { location }
            | Node::Continue { location }
            | Node::Danger { location, .. }
            | Node::Mayhem { location, .. }
            | Node::Viewing { location, .. }
            | Node::Hijacking { location, .. }
            | Node::Observing { location, .. }
            | Node::Seizing { location, .. }
            | Node::Literal { location, .. }
            | Node::Identifier { location, .. }
            | Node::Binary { location, .. }
            | Node::Unary { location, .. }
            | Node::Call { location, .. }
            | Node::Member { location, .. }
            | Node::Index { location, .. }
            | Node::Conditional { location, .. }
            | Node::Range { location, .. }
            | Node::ChainedComparison { location, .. }
            | Node::Lambda { location, .. }
            | Node::TypeRef { location, .. }
            | Node::TypeConversion { location, .. }
            | Node::SliceConstructor { location, .. }
            | Node::GenericMethodCall { location, .. }
            | Node::GenericMember { location, .. }
            | Node::MemoryOperation { location, .. }
            | Node::IntrinsicCall { location, .. }
            | Node::NamedArgument { location, .. } => Some(location),
        }
    }

    /// Find a top-level routine by name (test helper and driver lookup).
    pub fn find_routine(&self, name: &str) -> Option<&Node> {
        if let Node::Program { declarations } = self {
            declarations.iter().find(|d| {
                matches!(d, Node::Routine { name: n, .. } if n == name)
            })
        } else {
            None
        }
    }
}
