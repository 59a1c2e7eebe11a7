//! Expansion of a [`PackageSpec`] tree into concrete build variants.
//!
//! Every node of a spec, including each entry of a `multi` list, becomes a
//! [`Variant`] stored in a [`Forest`]. Children inherit every field of their
//! parent except `multi` and the `build` script, then overlay their own
//! non-empty fields on top.

use std::ops::Index;

use thiserror::Error;
use tracing::debug;

use super::fields::overlay_field;
use super::types::PackageSpec;
use crate::consts::BUILD_SCRIPT;

/// Errors produced while expanding a spec.
#[derive(Debug, Error)]
pub enum ExpandError {
  /// A field accessor was handed a value of the wrong kind.
  #[error("field '{field}' cannot hold a {kind} value")]
  BadField { field: String, kind: &'static str },

  /// A field name has no accessors.
  #[error("no accessors for field '{field}'")]
  UnknownFieldKind { field: String },
}

/// Index of a [`Variant`] inside its [`Forest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VariantId(usize);

impl std::fmt::Display for VariantId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// One buildable node with all inherited fields resolved.
#[derive(Debug, Clone)]
pub struct Variant {
  id: VariantId,
  spec: PackageSpec,
  parent: Option<VariantId>,
  children: Vec<VariantId>,
}

impl Variant {
  pub fn id(&self) -> VariantId {
    self.id
  }

  pub fn spec(&self) -> &PackageSpec {
    &self.spec
  }

  pub fn parent(&self) -> Option<VariantId> {
    self.parent
  }

  pub fn children(&self) -> &[VariantId] {
    &self.children
  }

  /// Templates have children and are never packaged themselves.
  pub fn is_template(&self) -> bool {
    !self.children.is_empty()
  }

  pub fn name(&self) -> &str {
    &self.spec.name
  }

  /// Human readable label for logs, e.g. `consul (x86_64)`.
  pub fn label(&self) -> String {
    if self.spec.architecture.is_empty() {
      self.spec.name.clone()
    } else {
      format!("{} ({})", self.spec.name, self.spec.architecture)
    }
  }
}

/// Arena owning every expanded variant.
///
/// Parents own their children through the arena; children refer back to the
/// parent by id only.
#[derive(Debug)]
pub struct Forest {
  nodes: Vec<Variant>,
  roots: Vec<VariantId>,
  inherited: &'static [&'static str],
}

impl Default for Forest {
  fn default() -> Self {
    Self {
      nodes: Vec::new(),
      roots: Vec::new(),
      inherited: &PackageSpec::INHERITED,
    }
  }
}

impl Forest {
  pub fn new() -> Self {
    Self::default()
  }

  /// Expands `spec` and all of its `multi` descendants.
  ///
  /// With `parent = None` the result becomes a new root. On error nothing
  /// from this call remains in the forest.
  pub fn expand(&mut self, spec: &PackageSpec, parent: Option<VariantId>) -> Result<VariantId, ExpandError> {
    let mark = self.nodes.len();
    let roots = self.roots.len();

    match self.expand_node(spec.clone(), parent) {
      Ok(id) => {
        debug!(package = %spec.name, variants = self.nodes.len() - mark, "expanded spec");
        Ok(id)
      }
      Err(err) => {
        self.nodes.truncate(mark);
        self.roots.truncate(roots);
        for node in &mut self.nodes {
          node.children.retain(|child| child.0 < mark);
        }
        Err(err)
      }
    }
  }

  fn expand_node(&mut self, spec: PackageSpec, parent: Option<VariantId>) -> Result<VariantId, ExpandError> {
    let id = VariantId(self.nodes.len());
    let subs = spec.multi.clone();

    self.nodes.push(Variant {
      id,
      spec,
      parent,
      children: Vec::with_capacity(subs.len()),
    });
    match parent {
      Some(p) => self.nodes[p.0].children.push(id),
      None => self.roots.push(id),
    }

    for sub in &subs {
      let child = self.derive_child(id, sub)?;
      self.expand_node(child, Some(id))?;
    }

    Ok(id)
  }

  /// Base copy of `parent` with `sub` overlaid onto it.
  fn derive_child(&self, parent: VariantId, sub: &PackageSpec) -> Result<PackageSpec, ExpandError> {
    let mut base = self.nodes[parent.0].spec.clone();
    base.multi.clear();
    base.scripts.remove(BUILD_SCRIPT);

    for name in self.inherited {
      overlay_field(&mut base, sub, name)?;
    }
    Ok(base)
  }

  pub fn get(&self, id: VariantId) -> Option<&Variant> {
    self.nodes.get(id.0)
  }

  pub fn roots(&self) -> &[VariantId] {
    &self.roots
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &Variant> {
    self.nodes.iter()
  }

  /// Number of variants strictly below `id`.
  pub fn descendant_count(&self, id: VariantId) -> usize {
    self.nodes[id.0]
      .children
      .iter()
      .map(|child| 1 + self.descendant_count(*child))
      .sum()
  }

  /// Every variant strictly below `id`, depth first.
  pub fn descendants(&self, id: VariantId) -> Vec<VariantId> {
    let mut out = Vec::new();
    let mut stack: Vec<VariantId> = self.nodes[id.0].children.iter().rev().copied().collect();
    while let Some(next) = stack.pop() {
      out.push(next);
      stack.extend(self.nodes[next.0].children.iter().rev().copied());
    }
    out
  }

  /// Variants the scheduler will report on when starting from `roots`.
  pub fn total(&self, roots: &[VariantId]) -> usize {
    roots.iter().map(|root| 1 + self.descendant_count(*root)).sum()
  }
}

impl Index<VariantId> for Forest {
  type Output = Variant;

  fn index(&self, id: VariantId) -> &Variant {
    &self.nodes[id.0]
  }
}
