//! `$${...}` substitution in spec fields, build scripts and targets.
//!
//! # Placeholder Formats
//!
//! - `$${name}`, `$${version}`, `$${iteration}`, `$${epoch}`, `$${arch}`,
//!   `$${vendor}`, `$${license}`, `$${url}`, `$${description}`, `$${type}` -
//!   fields of the package being built
//! - `$${build:FILE}` - `FILE` inside the build root
//! - `$${spec:FILE}` - `FILE` next to the package's `spec.yml`
//! - `$${include:FILE}` - raw content of `FILE` (relative to the spec root)
//! - `$${empty}` - path to an empty directory, with a trailing slash
//!
//! Single `$` characters pass through unchanged, so shell variables like
//! `$HOME` keep working in build scripts. Use `$$${` for a literal `$${`.
//!
//! ```
//! use hammer_lib::template::{parse, Placeholder, Segment};
//!
//! let segments = parse("$${build:consul} -> /usr/bin").unwrap();
//! assert_eq!(segments[0], Segment::Placeholder(Placeholder::BuildFile("consul".into())));
//! ```

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::spec::PackageSpec;

/// Package fields usable as `$${field}`.
pub const FIELD_NAMES: [&str; 11] = [
  "arch",
  "architecture",
  "description",
  "epoch",
  "iteration",
  "license",
  "name",
  "type",
  "url",
  "vendor",
  "version",
];

/// A parsed placeholder reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Placeholder {
  Field(String),
  BuildFile(String),
  SpecFile(String),
  Include(String),
  Empty,
}

/// A segment of parsed text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
  Literal(String),
  Placeholder(Placeholder),
}

#[derive(Debug, Error)]
pub enum TemplateError {
  #[error("unclosed placeholder at position {0}")]
  Unclosed(usize),

  #[error("unknown template field: {0}")]
  UnknownField(String),

  #[error("malformed placeholder: {0}")]
  Malformed(String),

  /// The context has no value for this kind of placeholder (e.g. no build root in `query`).
  #[error("'{0}' is not available here")]
  Unavailable(&'static str),

  #[error("failed to include {path}: {source}")]
  Include {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Supplies values for placeholders.
pub trait Context {
  fn field(&self, name: &str) -> Option<&str>;

  fn build_root(&self) -> Option<&Path>;

  fn spec_root(&self) -> &Path;

  fn empty_dir(&self) -> Option<&Path>;
}

/// Parses `input` into literal and placeholder segments.
pub fn parse(input: &str) -> Result<Vec<Segment>, TemplateError> {
  let mut segments = Vec::new();
  let mut literal = String::new();
  let mut chars = input.char_indices().peekable();

  while let Some((pos, ch)) = chars.next() {
    if ch != '$' {
      literal.push(ch);
      continue;
    }

    if !matches!(chars.peek(), Some((_, '$'))) {
      literal.push('$');
      continue;
    }
    chars.next();

    match chars.peek() {
      Some((_, '$')) => {
        chars.next();
        if matches!(chars.peek(), Some((_, '{'))) {
          chars.next();
          literal.push_str("$${");
        } else {
          literal.push_str("$$$");
        }
      }
      Some((_, '{')) => {
        chars.next();
        if !literal.is_empty() {
          segments.push(Segment::Literal(std::mem::take(&mut literal)));
        }

        let mut content = String::new();
        let mut closed = false;
        for (_, c) in chars.by_ref() {
          if c == '}' {
            closed = true;
            break;
          }
          content.push(c);
        }
        if !closed {
          return Err(TemplateError::Unclosed(pos));
        }

        segments.push(Segment::Placeholder(parse_placeholder(content.trim())?));
      }
      _ => literal.push_str("$$"),
    }
  }

  if !literal.is_empty() {
    segments.push(Segment::Literal(literal));
  }

  Ok(segments)
}

fn parse_placeholder(content: &str) -> Result<Placeholder, TemplateError> {
  if content == "empty" {
    return Ok(Placeholder::Empty);
  }

  if let Some((kind, file)) = content.split_once(':') {
    if file.is_empty() {
      return Err(TemplateError::Malformed(format!("missing file name in '{content}'")));
    }
    return match kind {
      "build" => Ok(Placeholder::BuildFile(file.to_string())),
      "spec" => Ok(Placeholder::SpecFile(file.to_string())),
      "include" => Ok(Placeholder::Include(file.to_string())),
      _ => Err(TemplateError::Malformed(format!("unknown placeholder kind '{kind}'"))),
    };
  }

  if FIELD_NAMES.contains(&content) {
    Ok(Placeholder::Field(content.to_string()))
  } else {
    Err(TemplateError::UnknownField(content.to_string()))
  }
}

/// Parses and substitutes in one step.
pub fn render(input: &str, ctx: &impl Context) -> Result<String, TemplateError> {
  let segments = parse(input)?;
  render_segments(&segments, ctx)
}

pub fn render_segments(segments: &[Segment], ctx: &impl Context) -> Result<String, TemplateError> {
  let mut out = String::new();

  for segment in segments {
    match segment {
      Segment::Literal(s) => out.push_str(s),
      Segment::Placeholder(p) => match p {
        Placeholder::Field(name) => {
          let value = ctx.field(name).ok_or_else(|| TemplateError::UnknownField(name.clone()))?;
          out.push_str(value);
        }
        Placeholder::BuildFile(file) => {
          let root = ctx.build_root().ok_or(TemplateError::Unavailable("build"))?;
          out.push_str(&root.join(file).to_string_lossy());
        }
        Placeholder::SpecFile(file) => {
          out.push_str(&ctx.spec_root().join(file).to_string_lossy());
        }
        Placeholder::Include(file) => {
          let path = ctx.spec_root().join(file);
          let content = std::fs::read_to_string(&path).map_err(|source| TemplateError::Include { path, source })?;
          out.push_str(&content);
        }
        Placeholder::Empty => {
          let dir = ctx.empty_dir().ok_or(TemplateError::Unavailable("empty"))?;
          out.push_str(&dir.to_string_lossy());
          out.push('/');
        }
      },
    }
  }

  Ok(out)
}

/// Context over a resolved package, optionally inside a running build.
#[derive(Debug, Clone, Copy)]
pub struct SpecContext<'a> {
  spec: &'a PackageSpec,
  build_root: Option<&'a Path>,
  empty_dir: Option<&'a Path>,
}

impl<'a> SpecContext<'a> {
  /// A context with package fields and the spec root only.
  pub fn new(spec: &'a PackageSpec) -> Self {
    Self {
      spec,
      build_root: None,
      empty_dir: None,
    }
  }

  pub fn with_build_dirs(mut self, build_root: &'a Path, empty_dir: &'a Path) -> Self {
    self.build_root = Some(build_root);
    self.empty_dir = Some(empty_dir);
    self
  }
}

impl Context for SpecContext<'_> {
  fn field(&self, name: &str) -> Option<&str> {
    let spec = self.spec;
    let value = match name {
      "name" => &spec.name,
      "version" => &spec.version,
      "iteration" => &spec.iteration,
      "epoch" => &spec.epoch,
      "arch" | "architecture" => &spec.architecture,
      "vendor" => &spec.vendor,
      "license" => &spec.license,
      "url" => &spec.url,
      "description" => &spec.description,
      "type" => &spec.package_type,
      _ => return None,
    };
    Some(value.as_str())
  }

  fn build_root(&self) -> Option<&Path> {
    self.build_root
  }

  fn spec_root(&self) -> &Path {
    &self.spec.spec_root
  }

  fn empty_dir(&self) -> Option<&Path> {
    self.empty_dir
  }
}
