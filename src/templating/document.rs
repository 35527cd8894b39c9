//! Parsed VTMP document model.
//!
//! A [`TemplateDocument`] is a tree: literal text and simple directives are leaves,
//! while conditionals and `@pre`/`@post` anchors own nested node lists. Every node
//! records the 1-based line it started on so render errors can point back at the source.

use std::fmt;

/// Directive keywords recognised after the `@` sigil.
///
/// The set is closed; anything else is an unknown directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    From,
    Arg,
    Env,
    Copy,
    Run,
    Label,
    Entry,
    Pre,
    Post,
    If,
    Else,
    End,
}

impl Keyword {
    /// Look up a keyword by its spelling.
    #[must_use]
    pub fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "from" => Self::From,
            "arg" => Self::Arg,
            "env" => Self::Env,
            "copy" => Self::Copy,
            "run" => Self::Run,
            "label" => Self::Label,
            "entry" => Self::Entry,
            "pre" => Self::Pre,
            "post" => Self::Post,
            "if" => Self::If,
            "else" => Self::Else,
            "end" => Self::End,
            _ => return None,
        })
    }

    /// The instruction kind for keywords that produce a leaf directive.
    #[must_use]
    pub const fn directive_kind(self) -> Option<DirectiveKind> {
        match self {
            Self::From => Some(DirectiveKind::From),
            Self::Arg => Some(DirectiveKind::Arg),
            Self::Env => Some(DirectiveKind::Env),
            Self::Copy => Some(DirectiveKind::Copy),
            Self::Run => Some(DirectiveKind::Run),
            Self::Label => Some(DirectiveKind::Label),
            Self::Entry => Some(DirectiveKind::Entry),
            Self::Pre | Self::Post | Self::If | Self::Else | Self::End => None,
        }
    }
}

/// Leaf directives: each renders to one instruction or side-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectiveKind {
    /// Base image
    From,
    /// Build-time parameter with optional default
    Arg,
    /// Persistent environment variable
    Env,
    /// File staged into the image
    Copy,
    /// Shell command run during the build
    Run,
    /// Image metadata
    Label,
    /// Default entrypoint
    Entry,
}

impl DirectiveKind {
    /// Keyword spelling without the sigil.
    #[must_use]
    pub const fn keyword(self) -> &'static str {
        match self {
            Self::From => "from",
            Self::Arg => "arg",
            Self::Env => "env",
            Self::Copy => "copy",
            Self::Run => "run",
            Self::Label => "label",
            Self::Entry => "entry",
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.keyword())
    }
}

/// Ordering anchor of a hoisted section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Anchor {
    /// Emitted before the main body
    Pre,
    /// Emitted after the main body
    Post,
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pre => write!(f, "@pre"),
            Self::Post => write!(f, "@post"),
        }
    }
}

/// Condition of an `@if` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Guard {
    /// `@if NAME` (or `@if !NAME` when negated): defined and non-empty
    Truthy {
        name: String,
        negated: bool,
    },
    /// `@if NAME == literal` (or `!=` when negated)
    Equals {
        name: String,
        literal: String,
        negated: bool,
    },
}

impl Guard {
    /// Variable the guard reads.
    #[must_use]
    pub fn variable(&self) -> &str {
        match self {
            Self::Truthy {
                name,
                ..
            }
            | Self::Equals {
                name,
                ..
            } => name,
        }
    }

    /// Evaluate against a variable's current value (`None` when undefined).
    ///
    /// An undefined variable is falsy and unequal to every literal.
    #[must_use]
    pub fn evaluate(&self, value: Option<&str>) -> bool {
        match self {
            Self::Truthy {
                negated,
                ..
            } => value.is_some_and(|v| !v.is_empty()) != *negated,
            Self::Equals {
                literal,
                negated,
                ..
            } => (value == Some(literal.as_str())) != *negated,
        }
    }
}

/// A leaf directive with its unexpanded argument text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub kind: DirectiveKind,
    /// Everything after the keyword, trimmed
    pub args: String,
    pub line: usize,
}

/// An `@if` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conditional {
    pub guard: Guard,
    pub line: usize,
    pub then_branch: Vec<Node>,
    /// Empty when the block has no `@else`
    pub else_branch: Vec<Node>,
}

/// A `@pre` or `@post` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub anchor: Anchor,
    pub line: usize,
    pub body: Vec<Node>,
}

/// One node of a parsed template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Consecutive literal lines, byte-for-byte including their line endings
    Text {
        text: String,
        line: usize,
    },
    Directive(Directive),
    Conditional(Conditional),
    Section(Section),
}

/// A parsed VTMP template.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateDocument {
    pub nodes: Vec<Node>,
}

impl TemplateDocument {
    /// Whether the document is only literal text.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.nodes.iter().all(|node| matches!(node, Node::Text { .. }))
    }

    /// Count leaf directives of a kind anywhere in the tree, including skipped branches.
    #[must_use]
    pub fn count(&self, kind: DirectiveKind) -> usize {
        fn walk(nodes: &[Node], kind: DirectiveKind) -> usize {
            nodes
                .iter()
                .map(|node| match node {
                    Node::Directive(d) => usize::from(d.kind == kind),
                    Node::Conditional(c) => walk(&c.then_branch, kind) + walk(&c.else_branch, kind),
                    Node::Section(s) => walk(&s.body, kind),
                    Node::Text {
                        ..
                    } => 0,
                })
                .sum()
        }
        walk(&self.nodes, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_set_is_closed() {
        for word in ["from", "arg", "env", "copy", "run", "label", "entry", "pre", "post", "if", "else", "end"] {
            assert!(Keyword::parse(word).is_some(), "{word}");
        }
        assert!(Keyword::parse("include").is_none());
        assert!(Keyword::parse("FROM").is_none());
    }

    #[test]
    fn test_guard_evaluation() {
        let truthy = Guard::Truthy {
            name: "X".to_string(),
            negated: false,
        };
        assert!(truthy.evaluate(Some("1")));
        assert!(!truthy.evaluate(Some("")));
        assert!(!truthy.evaluate(None));

        let not_equal = Guard::Equals {
            name: "X".to_string(),
            literal: "a".to_string(),
            negated: true,
        };
        assert!(not_equal.evaluate(Some("b")));
        assert!(not_equal.evaluate(None));
        assert!(!not_equal.evaluate(Some("a")));
    }
}
