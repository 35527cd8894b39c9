//! VTMP template language.
//!
//! VTMP templates are backend-native build scripts (Dockerfile or Apptainer definition
//! text) interleaved with Velocity directives. The portions that are not directives are
//! preserved byte-for-byte.
//!
//! # Directives
//!
//! A directive occupies a whole line and starts with `@` (leading whitespace allowed):
//!
//! | Directive | Meaning |
//! |-----------|---------|
//! | `@from IMAGE` | base image |
//! | `@arg NAME [DEFAULT]` | build argument; value from the variable store, else the default |
//! | `@env NAME VALUE` | environment variable persisted in the image |
//! | `@copy SRC DEST` | stage `files/SRC` and copy it to `DEST` in the image |
//! | `@run COMMAND` | shell command run during the build |
//! | `@label NAME VALUE` | image metadata |
//! | `@entry COMMAND` | default entrypoint |
//! | `@pre` ... `@end` | content hoisted to the top of the script |
//! | `@post` ... `@end` | content moved to the bottom of the script |
//! | `@if GUARD` ... [`@else` ...] `@end` | conditional section |
//!
//! Guards are `NAME` (defined and non-empty), `!NAME`, `NAME == literal` and
//! `NAME != literal`. Conditionals nest; `@pre`/`@post` may contain conditionals but not
//! each other. A line starting with `@@` is literal text beginning with `@`.
//!
//! # Variables
//!
//! `{{ NAME }}` in literal text or directive arguments is replaced by the variable's
//! value. Undefined references are errors, never blanks.
//!
//! # Pipeline
//!
//! ```text
//! source --parse--> TemplateDocument --render(VariableStore)--> BuildScript --Backend::format--> script
//! ```
//!
//! # Examples
//!
//! ```rust,ignore
//! use velocity_cli::templating::{parse, render};
//! use velocity_cli::variables::{Layer, VariableStore};
//!
//! let doc = parse("@from ubuntu:{{ RELEASE }}\n@run apt-get update\n")?;
//! let mut vars = VariableStore::new();
//! vars.set("RELEASE", "22.04", Layer::Specification);
//! let script = render(&doc, &vars)?;
//! assert_eq!(script.base.unwrap().reference, "ubuntu:22.04");
//! ```

pub mod document;
pub mod error;
pub mod parser;
pub mod renderer;

pub use document::{Anchor, DirectiveKind, Guard, Node, TemplateDocument};
pub use error::TemplateLocation;
pub use parser::parse;
pub use renderer::{Argument, BaseImage, BuildScript, CopySpec, Export, Instruction, Label, render};
