//! Line-oriented VTMP parser.
//!
//! A line whose first non-blank character is `@` is a directive line: the keyword runs
//! to the first whitespace and the rest of the line is its argument text. `@@` at the
//! same position escapes a literal `@`. Every other line is literal text and is kept
//! byte-for-byte, line ending included.
//!
//! Block directives (`@if`, `@pre`, `@post`) are closed by `@end`; `@else` splits an
//! `@if`. Structure errors are reported at the offending line: a stray `@end` at the
//! `@end`, an unclosed block at the line that opened it.

use crate::core::VelocityError;

use super::TemplateLocation;
use super::document::{Anchor, Conditional, Directive, DirectiveKind, Guard, Keyword, Node, Section, TemplateDocument};

/// An open block waiting for its `@end`.
enum Frame {
    Conditional {
        guard: Guard,
        line: usize,
        then_branch: Vec<Node>,
        else_branch: Option<Vec<Node>>,
    },
    Section {
        anchor: Anchor,
        line: usize,
        body: Vec<Node>,
    },
}

impl Frame {
    const fn line(&self) -> usize {
        match self {
            Self::Conditional {
                line,
                ..
            }
            | Self::Section {
                line,
                ..
            } => *line,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Conditional {
                ..
            } => "@if".to_string(),
            Self::Section {
                anchor,
                ..
            } => anchor.to_string(),
        }
    }

    fn nodes_mut(&mut self) -> &mut Vec<Node> {
        match self {
            Self::Conditional {
                then_branch,
                else_branch,
                ..
            } => else_branch.as_mut().unwrap_or(then_branch),
            Self::Section {
                body,
                ..
            } => body,
        }
    }

    fn close(self) -> Node {
        match self {
            Self::Conditional {
                guard,
                line,
                then_branch,
                else_branch,
            } => Node::Conditional(Conditional {
                guard,
                line,
                then_branch,
                else_branch: else_branch.unwrap_or_default(),
            }),
            Self::Section {
                anchor,
                line,
                body,
            } => Node::Section(Section {
                anchor,
                line,
                body,
            }),
        }
    }
}

struct Parser {
    root: Vec<Node>,
    stack: Vec<Frame>,
}

impl Parser {
    fn current(&mut self) -> &mut Vec<Node> {
        match self.stack.last_mut() {
            Some(frame) => frame.nodes_mut(),
            None => &mut self.root,
        }
    }

    fn push_text(&mut self, text: &str, line: usize) {
        let nodes = self.current();
        if let Some(Node::Text {
            text: existing,
            ..
        }) = nodes.last_mut()
        {
            existing.push_str(text);
        } else {
            nodes.push(Node::Text {
                text: text.to_string(),
                line,
            });
        }
    }

    fn directive(&mut self, keyword: Keyword, args: &str, line: usize) -> Result<(), VelocityError> {
        match keyword {
            Keyword::If => {
                let guard = parse_guard(args, line)?;
                self.stack.push(Frame::Conditional {
                    guard,
                    line,
                    then_branch: Vec::new(),
                    else_branch: None,
                });
            }
            Keyword::Else => {
                no_arguments("@else", args, line)?;
                match self.stack.last_mut() {
                    Some(Frame::Conditional {
                        else_branch: else_branch @ None,
                        ..
                    }) => *else_branch = Some(Vec::new()),
                    Some(Frame::Conditional {
                        line: opened,
                        ..
                    }) => {
                        return Err(syntax(line, format!("second @else for the @if at line {opened}")));
                    }
                    Some(frame) => {
                        return Err(VelocityError::UnbalancedSection {
                            location: TemplateLocation::line(line),
                            reason: format!(
                                "@else inside {} opened at line {}, not an @if",
                                frame.describe(),
                                frame.line()
                            ),
                        });
                    }
                    None => {
                        return Err(VelocityError::UnbalancedSection {
                            location: TemplateLocation::line(line),
                            reason: "@else without matching @if".to_string(),
                        });
                    }
                }
            }
            Keyword::End => {
                no_arguments("@end", args, line)?;
                let frame = self.stack.pop().ok_or_else(|| VelocityError::UnbalancedSection {
                    location: TemplateLocation::line(line),
                    reason: "@end without matching open".to_string(),
                })?;
                let node = frame.close();
                self.current().push(node);
            }
            Keyword::Pre | Keyword::Post => {
                let anchor = if keyword == Keyword::Pre {
                    Anchor::Pre
                } else {
                    Anchor::Post
                };
                no_arguments(&anchor.to_string(), args, line)?;
                if let Some(open) = self.stack.iter().find(|f| matches!(f, Frame::Section { .. })) {
                    return Err(syntax(
                        line,
                        format!("{anchor} cannot be nested inside {} opened at line {}", open.describe(), open.line()),
                    ));
                }
                self.stack.push(Frame::Section {
                    anchor,
                    line,
                    body: Vec::new(),
                });
            }
            other => {
                // Every remaining keyword is a leaf
                let Some(kind) = other.directive_kind() else {
                    return Err(syntax(line, "directive is not a leaf"));
                };
                check_arity(kind, args, line)?;
                self.current().push(Node::Directive(Directive {
                    kind,
                    args: args.to_string(),
                    line,
                }));
            }
        }
        Ok(())
    }
}

fn syntax(line: usize, reason: impl Into<String>) -> VelocityError {
    VelocityError::TemplateSyntax {
        location: TemplateLocation::line(line),
        reason: reason.into(),
    }
}

fn no_arguments(directive: &str, args: &str, line: usize) -> Result<(), VelocityError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(syntax(line, format!("{directive} takes no arguments, found '{args}'")))
    }
}

/// Reject directives with too few (or, when the word count is final, too many) arguments.
///
/// A `{{ NAME }}` reference may expand to any number of words, so exact counts are only
/// enforced on arguments without references; the renderer checks the expanded text.
fn check_arity(kind: DirectiveKind, args: &str, line: usize) -> Result<(), VelocityError> {
    let words = args.split_whitespace().count();
    let exact = !args.contains("{{");
    let problem = match kind {
        DirectiveKind::From if exact && words != 1 => Some("expects exactly one image reference"),
        DirectiveKind::Copy if exact && words != 2 => Some("expects a source and a destination"),
        DirectiveKind::Arg if words == 0 => Some("expects a name and an optional default"),
        DirectiveKind::Env | DirectiveKind::Label if words == 0 => Some("expects a name and a value"),
        DirectiveKind::Run | DirectiveKind::Entry if words == 0 => Some("expects a command"),
        _ => None,
    };

    match problem {
        Some(problem) => Err(syntax(line, format!("{kind} {problem}"))),
        None => Ok(()),
    }
}

/// Whether `name` is a valid variable identifier.
pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

fn parse_guard(args: &str, line: usize) -> Result<Guard, VelocityError> {
    let (name, literal, negated) = if let Some((name, literal)) = args.split_once("==") {
        (name.trim(), Some(literal.trim()), false)
    } else if let Some((name, literal)) = args.split_once("!=") {
        (name.trim(), Some(literal.trim()), true)
    } else if let Some(name) = args.strip_prefix('!') {
        (name.trim(), None, true)
    } else {
        (args, None, false)
    };

    if !is_identifier(name) {
        return Err(syntax(line, format!("@if expects a variable name, found '{args}'")));
    }

    Ok(match literal {
        Some(literal) => Guard::Equals {
            name: name.to_string(),
            literal: unquote(literal).to_string(),
            negated,
        },
        None => Guard::Truthy {
            name: name.to_string(),
            negated,
        },
    })
}

fn unquote(literal: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = literal.strip_prefix(quote).and_then(|l| l.strip_suffix(quote)) {
            return inner;
        }
    }
    literal
}

/// Parse VTMP source into a [`TemplateDocument`].
///
/// # Errors
///
/// - [`VelocityError::UnknownDirective`] for a keyword outside the closed set
/// - [`VelocityError::UnbalancedSection`] for a stray `@end`/`@else` or an unclosed block
/// - [`VelocityError::TemplateSyntax`] for a directive with malformed arguments
///
/// Locations carry line numbers only; see [`VelocityError::at_template`].
pub fn parse(source: &str) -> Result<TemplateDocument, VelocityError> {
    let mut parser = Parser {
        root: Vec::new(),
        stack: Vec::new(),
    };

    for (index, raw) in source.split_inclusive('\n').enumerate() {
        let line = index + 1;
        let content = raw.trim_end_matches(['\n', '\r']);
        let body = content.trim_start();

        if body.starts_with("@@") {
            let indent = &content[..content.len() - body.len()];
            let ending = &raw[content.len()..];
            parser.push_text(&format!("{indent}{}{ending}", &body[1..]), line);
            continue;
        }

        let Some(directive) = body.strip_prefix('@') else {
            parser.push_text(raw, line);
            continue;
        };

        let (word, args) = match directive.split_once(char::is_whitespace) {
            Some((word, args)) => (word, args.trim()),
            None => (directive, ""),
        };

        let keyword = Keyword::parse(word).ok_or_else(|| VelocityError::UnknownDirective {
            directive: word.to_string(),
            location: TemplateLocation::line(line),
        })?;

        tracing::trace!("line {line}: @{word} {args}");
        parser.directive(keyword, args, line)?;
    }

    if let Some(open) = parser.stack.last() {
        return Err(VelocityError::UnbalancedSection {
            location: TemplateLocation::line(open.line()),
            reason: format!("{} is never closed by @end", open.describe()),
        });
    }

    Ok(TemplateDocument {
        nodes: parser.root,
    })
}
