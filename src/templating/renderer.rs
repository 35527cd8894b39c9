//! VTMP renderer.
//!
//! Rendering walks a [`TemplateDocument`] in source order against a [`VariableStore`]
//! and produces a backend-neutral [`BuildScript`]. Directives are evaluated the moment
//! they are reached. Conditional branches that are not taken are never visited, so their
//! variable references cannot fail.
//!
//! # Variable references
//!
//! `{{ NAME }}` is replaced by the value of `NAME`. Whitespace inside the braces is
//! optional. A reference to an undefined name is an error. Braces whose content is not
//! an identifier (`{{.Names}}`, `{{ $x }}`) are left untouched, and `\{{` produces a
//! literal `{{`.
//!
//! # `!envar`
//!
//! `@run !envar NAME value` renders as the command `export NAME="value"` and records the
//! pair in [`BuildScript::exports`] so backends can also persist it in the image.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::core::VelocityError;
use crate::variables::VariableStore;

use super::document::{Anchor, Directive, DirectiveKind, Node, TemplateDocument};
use super::error::find_similar_variables;
use super::parser::is_identifier;
use super::TemplateLocation;

/// Base image named by `@from`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseImage {
    pub reference: String,
    #[serde(skip)]
    pub line: usize,
}

/// A build argument with its resolved value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Argument {
    pub name: String,
    pub value: String,
}

/// A file or directory to stage into the build context and copy into the image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CopySpec {
    /// Path relative to the image's `files/` directory
    pub source: String,
    /// Path inside the image
    pub destination: String,
    /// Template line of the `@copy`
    pub line: usize,
}

/// An image label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Label {
    pub name: String,
    pub value: String,
}

/// A variable set by `@run !envar NAME value`: exported to the rest of the build step and
/// persisted in the image environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Export {
    pub name: String,
    pub value: String,
}

/// One backend-neutral instruction of a script body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Literal template text after substitution, emitted verbatim
    Text(String),
    /// Shell command executed during the build
    Run(String),
    /// Environment variable persisted in the image
    Env {
        name: String,
        value: String,
    },
}

/// The rendered output of one template.
///
/// `pre`, `main` and `post` hold instructions in emission order; copies, labels and the
/// entrypoint are side tables the backend places at fixed positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildScript {
    pub base: Option<BaseImage>,
    pub arguments: Vec<Argument>,
    pub pre: Vec<Instruction>,
    pub main: Vec<Instruction>,
    pub post: Vec<Instruction>,
    pub copies: Vec<CopySpec>,
    pub labels: Vec<Label>,
    /// `!envar` variables, in template order
    pub exports: Vec<Export>,
    pub entrypoint: Option<String>,
}

impl BuildScript {
    /// All instructions in emission order.
    pub fn instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.pre.iter().chain(&self.main).chain(&self.post)
    }
}

struct Renderer<'a> {
    variables: &'a VariableStore,
    /// Values bound by `@arg` during this render
    locals: BTreeMap<String, String>,
    script: BuildScript,
    anchor: Option<Anchor>,
}

impl Renderer<'_> {
    fn lookup(&self, name: &str) -> Option<&str> {
        self.locals.get(name).map(String::as_str).or_else(|| self.variables.get(name))
    }

    fn undefined(&self, name: &str, line: usize) -> VelocityError {
        let names = self.locals.keys().map(String::as_str).chain(self.variables.names());
        VelocityError::UndefinedVariable {
            variable: name.to_string(),
            location: TemplateLocation::line(line),
            suggestions: find_similar_variables(name, names),
        }
    }

    fn substitute(&self, text: &str, line: usize) -> Result<String, VelocityError> {
        let mut out = String::with_capacity(text.len());
        let mut rest = text;
        let mut consumed = 0;

        while let Some(open) = rest.find("{{") {
            if rest[..open].ends_with('\\') {
                out.push_str(&rest[..open - 1]);
                out.push_str("{{");
                consumed += open + 2;
                rest = &rest[open + 2..];
                continue;
            }

            let Some(close) = rest[open + 2..].find("}}") else {
                break;
            };
            let inner = rest[open + 2..open + 2 + close].trim();
            let end = open + 2 + close + 2;

            out.push_str(&rest[..open]);
            if is_identifier(inner) {
                let ref_line = line + text[..consumed + open].matches('\n').count();
                let value = self.lookup(inner).ok_or_else(|| self.undefined(inner, ref_line))?;
                out.push_str(value);
            } else {
                out.push_str(&rest[open..end]);
            }

            consumed += end;
            rest = &rest[end..];
        }

        out.push_str(rest);
        Ok(out)
    }

    fn emit(&mut self, instruction: Instruction) {
        let target = match self.anchor {
            Some(Anchor::Pre) => &mut self.script.pre,
            Some(Anchor::Post) => &mut self.script.post,
            None => &mut self.script.main,
        };
        target.push(instruction);
    }

    fn walk(&mut self, nodes: &[Node]) -> Result<(), VelocityError> {
        for node in nodes {
            match node {
                Node::Text {
                    text,
                    line,
                } => {
                    let text = self.substitute(text, *line)?;
                    self.emit(Instruction::Text(text));
                }
                Node::Directive(directive) => self.directive(directive)?,
                Node::Conditional(conditional) => {
                    let value = self.lookup(conditional.guard.variable());
                    let taken = conditional.guard.evaluate(value);
                    tracing::trace!(
                        "line {}: @if {} -> {taken}",
                        conditional.line,
                        conditional.guard.variable()
                    );
                    if taken {
                        self.walk(&conditional.then_branch)?;
                    } else {
                        self.walk(&conditional.else_branch)?;
                    }
                }
                Node::Section(section) => {
                    let outer = self.anchor.replace(section.anchor);
                    let result = self.walk(&section.body);
                    self.anchor = outer;
                    result?;
                }
            }
        }
        Ok(())
    }

    fn directive(&mut self, directive: &Directive) -> Result<(), VelocityError> {
        let line = directive.line;
        let syntax = |reason: String| VelocityError::TemplateSyntax {
            location: TemplateLocation::line(line),
            reason,
        };

        match directive.kind {
            DirectiveKind::From => {
                let reference = self.substitute(&directive.args, line)?;
                if reference.split_whitespace().count() != 1 {
                    return Err(syntax(format!("@from expands to '{reference}', expected one image reference")));
                }
                if let Some(existing) = &self.script.base {
                    return Err(syntax(format!("second @from, base already set at line {}", existing.line)));
                }
                self.script.base = Some(BaseImage {
                    reference: reference.trim().to_string(),
                    line,
                });
            }
            DirectiveKind::Arg => {
                let (name, default) = split_name(&directive.args);
                if !is_identifier(name) {
                    return Err(syntax(format!("@arg name '{name}' is not alphanumeric")));
                }
                if self.locals.contains_key(name) {
                    return Err(syntax(format!("argument '{name}' declared twice")));
                }
                let value = match (self.lookup(name), default) {
                    (Some(value), _) => value.to_string(),
                    (None, Some(default)) => self.substitute(default, line)?,
                    (None, None) => return Err(self.undefined(name, line)),
                };
                self.script.arguments.push(Argument {
                    name: name.to_string(),
                    value: value.clone(),
                });
                self.locals.insert(name.to_string(), value);
            }
            DirectiveKind::Env => {
                let (name, value) = split_name(&directive.args);
                let name = self.substitute(name, line)?;
                if !is_identifier(&name) {
                    return Err(syntax(format!("@env name '{name}' is not alphanumeric")));
                }
                let value = self.substitute(value.unwrap_or_default(), line)?;
                self.emit(Instruction::Env {
                    name,
                    value,
                });
            }
            DirectiveKind::Copy => {
                let expanded = self.substitute(&directive.args, line)?;
                let parts: Vec<&str> = expanded.split_whitespace().collect();
                let [source, destination] = parts.as_slice() else {
                    return Err(syntax(format!("@copy expands to '{expanded}', expected a source and a destination")));
                };
                self.script.copies.push(CopySpec {
                    source: (*source).to_string(),
                    destination: (*destination).to_string(),
                    line,
                });
            }
            DirectiveKind::Run => {
                let command = self.substitute(&directive.args, line)?;
                let Some(envar) = command.strip_prefix(ENVAR).filter(|rest| rest.starts_with(char::is_whitespace))
                else {
                    self.emit(Instruction::Run(command));
                    return Ok(());
                };
                let (name, value) = envar
                    .trim_start()
                    .split_once(char::is_whitespace)
                    .map(|(name, value)| (name, value.trim()))
                    .ok_or_else(|| syntax(format!("'{command}' expected {ENVAR} NAME value")))?;
                if !is_identifier(name) {
                    return Err(syntax(format!("{ENVAR} name '{name}' is not alphanumeric")));
                }
                self.emit(Instruction::Run(format!("export {name}=\"{}\"", value.replace('"', "\\\""))));
                self.script.exports.push(Export {
                    name: name.to_string(),
                    value: value.to_string(),
                });
            }
            DirectiveKind::Label => {
                let (name, value) = split_name(&directive.args);
                let name = self.substitute(name, line)?;
                let value = self.substitute(value.unwrap_or_default(), line)?;
                match self.script.labels.iter_mut().find(|l| l.name == name) {
                    Some(existing) => existing.value = value,
                    None => self.script.labels.push(Label {
                        name,
                        value,
                    }),
                }
            }
            DirectiveKind::Entry => {
                if self.script.entrypoint.is_some() {
                    return Err(syntax("second @entry, an image has one entrypoint".to_string()));
                }
                self.script.entrypoint = Some(self.substitute(&directive.args, line)?);
            }
        }
        Ok(())
    }
}

/// `@run` prefix that sets an environment variable instead of running a command.
const ENVAR: &str = "!envar";

/// Split `NAME rest of line` at the first whitespace.
fn split_name(args: &str) -> (&str, Option<&str>) {
    match args.split_once(char::is_whitespace) {
        Some((name, rest)) => (name, Some(rest.trim())),
        None => (args, None),
    }
}

/// Render a parsed template against a variable store.
///
/// Rendering is deterministic: the same document and store always produce the same
/// [`BuildScript`].
///
/// # Errors
///
/// - [`VelocityError::UndefinedVariable`] for a reference (or `@arg` without default)
///   that nothing defines
/// - [`VelocityError::TemplateSyntax`] for directives that are only invalid after
///   substitution, or a second `@from`/`@entry`
pub fn render(document: &TemplateDocument, variables: &VariableStore) -> Result<BuildScript, VelocityError> {
    let mut renderer = Renderer {
        variables,
        locals: BTreeMap::new(),
        script: BuildScript::default(),
        anchor: None,
    };
    renderer.walk(&document.nodes)?;
    Ok(renderer.script)
}
