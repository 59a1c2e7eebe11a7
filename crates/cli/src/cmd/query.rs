//! Implementation of the `hammer query` command.

use std::path::Path;

use anyhow::{Context, Result};

use hammer_lib::spec::Loader;
use hammer_lib::template::{SpecContext, render};

/// Renders `template` once per spec found under `search`, one line each.
pub fn cmd_query(template: &str, search: &Path) -> Result<()> {
  let loaded = Loader::new(search).load().context("Failed to load package specs")?;

  for spec in &loaded {
    let rendered = render(template, &SpecContext::new(spec))
      .with_context(|| format!("Failed to render template for '{}'", spec.name))?;
    println!("{rendered}");
  }

  Ok(())
}
