//! Apptainer/Singularity definition file output.
//!
//! Layout:
//!
//! ```text
//! Bootstrap: <docker|oras|localimage|library>
//! From: <reference>
//!
//! %arguments      @arg values
//! <@pre text>
//! %files          @copy pairs
//! %post           @run commands (pre, main, post), main text inline
//! %environment    @env and `@run !envar` exports
//! %labels
//! %runscript      @entry
//! <@post text>
//! ```
//!
//! When the main body has no `@run`, its literal text is emitted outside any generated
//! section so hand-written definition files pass through untouched.

use std::sync::LazyLock;

use regex::Regex;

use super::push_line;
use crate::core::VelocityError;
use crate::templating::{BaseImage, BuildScript, Instruction, TemplateLocation};

const INDENT: &str = "    ";

static SOURCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:(?P<bootstrap>[\w-]*)://)?(?P<main>\S+)$").unwrap_or_else(|_| unreachable!("source pattern is a valid regex"))
});

/// Resolve the `Bootstrap:`/`From:` pair for a base reference.
fn bootstrap(base: &BaseImage) -> Result<(&'static str, String), VelocityError> {
    let unknown = |reason: String| VelocityError::TemplateSyntax {
        location: TemplateLocation::line(base.line),
        reason,
    };

    let caps = SOURCE_RE
        .captures(&base.reference)
        .ok_or_else(|| unknown(format!("unknown source format '{}' in @from", base.reference)))?;
    let main = caps.name("main").map_or("", |m| m.as_str()).to_string();

    let kind = match caps.name("bootstrap").map(|m| m.as_str()) {
        Some("docker") => "docker",
        Some("oras") => "oras",
        Some("localimage") => "localimage",
        Some("library") => "library",
        Some(other) => return Err(unknown(format!("unknown bootstrap type '{other}' in @from"))),
        None if main.ends_with(".sif") => "localimage",
        None => "docker",
    };

    tracing::debug!("@from source '{}' identified as '{kind}'", base.reference);
    Ok((kind, main))
}

fn start_section(out: &mut String, header: &str) {
    if !out.is_empty() && !out.ends_with("\n\n") {
        push_line(out, "");
    }
    push_line(out, header);
}

/// Format a rendered script as an Apptainer definition file.
pub fn format(script: &BuildScript) -> Result<String, VelocityError> {
    let mut out = String::new();

    if let Some(base) = &script.base {
        let (kind, main) = bootstrap(base)?;
        push_line(&mut out, &format!("Bootstrap: {kind}"));
        push_line(&mut out, &format!("From: {main}"));
    }

    if !script.arguments.is_empty() {
        start_section(&mut out, "%arguments");
        for argument in &script.arguments {
            push_line(&mut out, &format!("{INDENT}{}={}", argument.name, argument.value));
        }
    }

    let mut environment = Vec::new();
    let mut pre_runs = Vec::new();
    let mut post_runs = Vec::new();

    for instruction in &script.pre {
        match instruction {
            Instruction::Text(text) => out.push_str(text),
            Instruction::Run(command) => pre_runs.push(command.as_str()),
            Instruction::Env {
                name,
                value,
            } => environment.push((name, value)),
        }
    }

    for instruction in &script.post {
        match instruction {
            Instruction::Run(command) => post_runs.push(command.as_str()),
            Instruction::Env {
                name,
                value,
            } => environment.push((name, value)),
            Instruction::Text(_) => {}
        }
    }

    if !script.copies.is_empty() {
        start_section(&mut out, "%files");
        for copy in &script.copies {
            push_line(&mut out, &format!("{INDENT}{} {}", copy.source, copy.destination));
        }
    }

    let main_has_runs = script.main.iter().any(|i| matches!(i, Instruction::Run(_)));
    let has_post_section = main_has_runs || !pre_runs.is_empty() || !post_runs.is_empty();

    if !main_has_runs {
        for instruction in &script.main {
            match instruction {
                Instruction::Text(text) => out.push_str(text),
                Instruction::Env {
                    name,
                    value,
                } => environment.push((name, value)),
                Instruction::Run(_) => {}
            }
        }
    }

    if has_post_section {
        start_section(&mut out, "%post");
        for command in &pre_runs {
            push_line(&mut out, &format!("{INDENT}{command}"));
        }
        if main_has_runs {
            for instruction in &script.main {
                match instruction {
                    Instruction::Text(text) => out.push_str(text),
                    Instruction::Run(command) => push_line(&mut out, &format!("{INDENT}{command}")),
                    Instruction::Env {
                        name,
                        value,
                    } => environment.push((name, value)),
                }
            }
        }
        for command in &post_runs {
            push_line(&mut out, &format!("{INDENT}{command}"));
        }
    }

    environment.extend(script.exports.iter().map(|e| (&e.name, &e.value)));
    if !environment.is_empty() {
        start_section(&mut out, "%environment");
        for (name, value) in environment {
            push_line(&mut out, &format!("{INDENT}export {name}=\"{}\"", value.replace('"', "\\\"")));
        }
    }

    if !script.labels.is_empty() {
        start_section(&mut out, "%labels");
        for label in &script.labels {
            push_line(&mut out, &format!("{INDENT}{} {}", label.name, label.value));
        }
    }

    if let Some(entrypoint) = &script.entrypoint {
        start_section(&mut out, "%runscript");
        push_line(&mut out, &format!("{INDENT}{entrypoint}"));
    }

    for instruction in &script.post {
        if let Instruction::Text(text) = instruction {
            out.push_str(text);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templating::{parse, render};
    use crate::variables::{Layer, VariableStore};

    fn format_source(source: &str) -> Result<String, VelocityError> {
        let mut vars = VariableStore::new();
        vars.set("__base__", "/tmp/build/base-1-abcdef0.sif", Layer::Builtin);
        format(&render(&parse(source)?, &vars)?)
    }

    #[test]
    fn test_full_definition_file() {
        let source = "\
@from docker://ubuntu:22.04
@arg JOBS 4
@copy app.tgz /opt/app.tgz
@run tar -xf /opt/app.tgz
@run make -j{{ JOBS }}
@env PATH /opt/app/bin:$PATH
@label maintainer hpc
@entry /opt/app/bin/app
";
        let expected = "\
Bootstrap: docker
From: ubuntu:22.04

%arguments
    JOBS=4

%files
    app.tgz /opt/app.tgz

%post
    tar -xf /opt/app.tgz
    make -j4

%environment
    export PATH=\"/opt/app/bin:$PATH\"

%labels
    maintainer hpc

%runscript
    /opt/app/bin/app
";
        assert_eq!(format_source(source).unwrap(), expected);
    }

    #[test]
    fn test_bootstrap_detection() {
        let out = format_source("@from {{ __base__ }}\n").unwrap();
        assert_eq!(out, "Bootstrap: localimage\nFrom: /tmp/build/base-1-abcdef0.sif\n");

        let out = format_source("@from rockylinux:9\n").unwrap();
        assert!(out.starts_with("Bootstrap: docker\nFrom: rockylinux:9\n"));

        let out = format_source("@from oras://ghcr.io/me/img:1\n").unwrap();
        assert!(out.starts_with("Bootstrap: oras\n"));

        let err = format_source("@from ftp://example.org/img\n").unwrap_err();
        assert!(matches!(err, VelocityError::TemplateSyntax { .. }));
    }

    #[test]
    fn test_pre_and_post_runs_join_post_section() {
        let out = format_source("@pre\n@run echo first\n@end\n@run echo main\n@post\n@run echo last\n@end\n").unwrap();
        assert_eq!(out, "%post\n    echo first\n    echo main\n    echo last\n");
    }

    #[test]
    fn test_envar_exports_in_post_and_environment() {
        let source = "@from ubuntu\n@run !envar PREFIX /opt/app\n@run make install\n@env LANG C.UTF-8\n";
        let expected = "\
Bootstrap: docker
From: ubuntu

%post
    export PREFIX=\"/opt/app\"
    make install

%environment
    export LANG=\"C.UTF-8\"
    export PREFIX=\"/opt/app\"
";
        assert_eq!(format_source(source).unwrap(), expected);
    }

    #[test]
    fn test_main_text_passes_through_without_runs() {
        let out = format_source("@from ubuntu\n%post\n    apt-get update\n").unwrap();
        assert_eq!(out, "Bootstrap: docker\nFrom: ubuntu\n%post\n    apt-get update\n");
    }
}
