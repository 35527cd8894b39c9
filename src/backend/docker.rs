//! Dockerfile output for Docker and Podman.
//!
//! Consecutive `@run` commands are chained into one `RUN` layer:
//!
//! ```text
//! RUN apt-get update && \
//!     apt-get install -y gcc
//! ```
//!
//! `@run !envar NAME value` becomes an `export` inside the chain and an `ENV` line after
//! the main body.

use super::push_line;
use crate::core::VelocityError;
use crate::templating::{BuildScript, Instruction};

const CONTINUATION: &str = "    ";

/// Strip the `docker://` transport, which Dockerfiles do not accept.
fn from_reference(reference: &str) -> &str {
    reference.strip_prefix("docker://").unwrap_or(reference)
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn push_run_chain(out: &mut String, commands: &[&str]) {
    let mut line = String::from("RUN ");
    for (index, command) in commands.iter().enumerate() {
        if index > 0 {
            line.push_str(CONTINUATION);
        }
        line.push_str(command);
        if index + 1 < commands.len() {
            if command.trim_end().ends_with('\\') {
                line.push('\n');
            } else {
                line.push_str(" && \\\n");
            }
        }
    }
    push_line(out, &line);
}

fn push_instructions(out: &mut String, instructions: &[Instruction]) {
    let mut chain: Vec<&str> = Vec::new();
    for instruction in instructions {
        if let Instruction::Run(command) = instruction {
            chain.push(command);
            continue;
        }
        if !chain.is_empty() {
            push_run_chain(out, &chain);
            chain.clear();
        }
        match instruction {
            Instruction::Text(text) => out.push_str(text),
            Instruction::Env {
                name,
                value,
            } => push_line(out, &format!("ENV {name}={}", quote(value))),
            Instruction::Run(_) => {}
        }
    }
    if !chain.is_empty() {
        push_run_chain(out, &chain);
    }
}

/// Format a rendered script as a Dockerfile.
///
/// # Errors
///
/// Returns [`VelocityError::Json`] if the entrypoint cannot be encoded.
pub fn format(script: &BuildScript) -> Result<String, VelocityError> {
    let mut out = String::new();

    if let Some(base) = &script.base {
        push_line(&mut out, &format!("FROM {}", from_reference(&base.reference)));
    }
    for argument in &script.arguments {
        push_line(&mut out, &format!("ARG {}={}", argument.name, quote(&argument.value)));
    }

    push_instructions(&mut out, &script.pre);

    for copy in &script.copies {
        push_line(&mut out, &format!("COPY {} {}", copy.source, copy.destination));
    }

    push_instructions(&mut out, &script.main);

    for export in &script.exports {
        push_line(&mut out, &format!("ENV {}={}", export.name, quote(&export.value)));
    }

    for label in &script.labels {
        push_line(&mut out, &format!("LABEL {}={}", label.name, quote(&label.value)));
    }

    if let Some(entrypoint) = &script.entrypoint {
        let tokens: Vec<&str> = entrypoint.split_whitespace().collect();
        push_line(&mut out, &format!("ENTRYPOINT {}", serde_json::to_string(&tokens)?));
    }

    push_instructions(&mut out, &script.post);

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templating::{parse, render};
    use crate::variables::VariableStore;

    fn format_source(source: &str) -> String {
        format(&render(&parse(source).unwrap(), &VariableStore::new()).unwrap()).unwrap()
    }

    #[test]
    fn test_full_dockerfile() {
        let source = "\
@from docker://ubuntu:22.04
@arg JOBS 4
@copy app.tgz /opt/app.tgz
@run tar -xf /opt/app.tgz
@run make -j{{ JOBS }}
@env PATH /opt/app/bin:$PATH
@label maintainer hpc
@entry /opt/app/bin/app --serve
";
        let expected = "\
FROM ubuntu:22.04
ARG JOBS=\"4\"
COPY app.tgz /opt/app.tgz
RUN tar -xf /opt/app.tgz && \\
    make -j4
ENV PATH=\"/opt/app/bin:$PATH\"
LABEL maintainer=\"hpc\"
ENTRYPOINT [\"/opt/app/bin/app\",\"--serve\"]
";
        assert_eq!(format_source(source), expected);
    }

    #[test]
    fn test_text_breaks_run_chains() {
        let out = format_source("@run a\n# comment\n@run b\n@run c\n");
        assert_eq!(out, "RUN a\n# comment\nRUN b && \\\n    c\n");
    }

    #[test]
    fn test_existing_continuation_is_not_doubled() {
        let out = format_source("@run ./configure \\\n@run --prefix=/opt\n");
        assert_eq!(out, "RUN ./configure \\\n    --prefix=/opt\n");
    }

    #[test]
    fn test_envar_exports_in_chain_and_persists() {
        let out = format_source("@from ubuntu\n@run !envar PREFIX /opt/app\n@run ./configure --prefix=$PREFIX\n@label a b\n");
        let expected = "\
FROM ubuntu
RUN export PREFIX=\"/opt/app\" && \\
    ./configure --prefix=$PREFIX
ENV PREFIX=\"/opt/app\"
LABEL a=\"b\"
";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_pre_content_precedes_copies() {
        let out = format_source("@copy a /a\n@pre\nUSER root\n@end\n@run b\n");
        assert_eq!(out, "USER root\nCOPY a /a\nRUN b\n");
    }
}
