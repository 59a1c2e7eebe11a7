//! Per-field accessors used when a child spec is overlaid onto its parent.
//!
//! Each inheritable [`PackageSpec`] field has one entry in [`FIELDS`] with a
//! getter that borrows the field as a [`FieldValue`] and a setter that writes
//! such a value back. The expander walks [`PackageSpec::INHERITED`] and looks
//! every name up here, so a field added to the struct without a table entry
//! fails loudly instead of silently not inheriting.

use super::expand::ExpandError;
use super::types::{FileAttr, PackageSpec, ResourceDescriptor, Scripts, Target};

/// A borrowed view of one spec field.
#[derive(Debug, Clone, Copy)]
pub enum FieldValue<'a> {
  Text(&'a str),
  List(&'a [String]),
  Attrs(&'a [FileAttr]),
  Resources(&'a [ResourceDescriptor]),
  Targets(&'a [Target]),
  Scripts(&'a Scripts),
  Specs(&'a [PackageSpec]),
}

impl FieldValue<'_> {
  /// Empty values never override what the base already holds.
  pub fn is_empty(&self) -> bool {
    match self {
      FieldValue::Text(v) => v.is_empty(),
      FieldValue::List(v) => v.is_empty(),
      FieldValue::Attrs(v) => v.is_empty(),
      FieldValue::Resources(v) => v.is_empty(),
      FieldValue::Targets(v) => v.is_empty(),
      FieldValue::Scripts(v) => v.is_empty(),
      FieldValue::Specs(v) => v.is_empty(),
    }
  }

  fn kind(&self) -> &'static str {
    match self {
      FieldValue::Text(_) => "text",
      FieldValue::List(_) => "list",
      FieldValue::Attrs(_) => "attrs",
      FieldValue::Resources(_) => "resources",
      FieldValue::Targets(_) => "targets",
      FieldValue::Scripts(_) => "scripts",
      FieldValue::Specs(_) => "specs",
    }
  }
}

pub type Getter = for<'a> fn(&'a PackageSpec) -> FieldValue<'a>;
pub type Setter = fn(&mut PackageSpec, FieldValue<'_>) -> Result<(), ExpandError>;

/// Accessors for one inheritable field.
pub struct Field {
  pub name: &'static str,
  pub get: Getter,
  pub set: Setter,
}

impl std::fmt::Debug for Field {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Field").field("name", &self.name).finish()
  }
}

fn bad_field(field: &'static str, value: &FieldValue<'_>) -> ExpandError {
  ExpandError::BadField {
    field: field.to_string(),
    kind: value.kind(),
  }
}

macro_rules! text_field {
  ($name:literal, $member:ident) => {
    Field {
      name: $name,
      get: {
        fn get(spec: &PackageSpec) -> FieldValue<'_> {
          FieldValue::Text(&spec.$member)
        }
        get
      },
      set: {
        fn set(spec: &mut PackageSpec, value: FieldValue<'_>) -> Result<(), ExpandError> {
          match value {
            FieldValue::Text(v) => {
              spec.$member = v.to_string();
              Ok(())
            }
            other => Err(bad_field($name, &other)),
          }
        }
        set
      },
    }
  };
}

macro_rules! list_field {
  ($name:literal, $member:ident, $variant:ident) => {
    Field {
      name: $name,
      get: {
        fn get(spec: &PackageSpec) -> FieldValue<'_> {
          FieldValue::$variant(&spec.$member)
        }
        get
      },
      set: {
        fn set(spec: &mut PackageSpec, value: FieldValue<'_>) -> Result<(), ExpandError> {
          match value {
            FieldValue::$variant(v) => {
              spec.$member = v.to_vec();
              Ok(())
            }
            other => Err(bad_field($name, &other)),
          }
        }
        set
      },
    }
  };
}

fn get_scripts(spec: &PackageSpec) -> FieldValue<'_> {
  FieldValue::Scripts(&spec.scripts)
}

/// Scripts merge key by key; the overlay wins on conflicts.
fn set_scripts(spec: &mut PackageSpec, value: FieldValue<'_>) -> Result<(), ExpandError> {
  match value {
    FieldValue::Scripts(scripts) => {
      for (name, body) in scripts {
        spec.scripts.insert(name.clone(), body.clone());
      }
      Ok(())
    }
    other => Err(bad_field("scripts", &other)),
  }
}

/// The field table, sorted by name.
pub static FIELDS: &[Field] = &[
  text_field!("architecture", architecture),
  list_field!("attrs", attrs, Attrs),
  list_field!("depends", depends, List),
  text_field!("description", description),
  text_field!("epoch", epoch),
  text_field!("extra-args", extra_args),
  text_field!("iteration", iteration),
  text_field!("license", license),
  list_field!("multi", multi, Specs),
  text_field!("name", name),
  list_field!("obsoletes", obsoletes, List),
  list_field!("resources", resources, Resources),
  Field {
    name: "scripts",
    get: get_scripts,
    set: set_scripts,
  },
  list_field!("targets", targets, Targets),
  text_field!("type", package_type),
  text_field!("url", url),
  text_field!("vendor", vendor),
  text_field!("version", version),
];

/// Looks up the accessors for `name`.
pub fn lookup(name: &str) -> Result<&'static Field, ExpandError> {
  FIELDS
    .binary_search_by(|f| f.name.cmp(name))
    .map(|idx| &FIELDS[idx])
    .map_err(|_| ExpandError::UnknownFieldKind {
      field: name.to_string(),
    })
}

/// Copies `name` from `overlay` onto `base` when the overlay value is non-empty.
pub fn overlay_field(base: &mut PackageSpec, overlay: &PackageSpec, name: &str) -> Result<(), ExpandError> {
  let field = lookup(name)?;
  let value = (field.get)(overlay);
  if value.is_empty() {
    return Ok(());
  }
  (field.set)(base, value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn table_is_sorted_for_lookup() {
    let names: Vec<_> = FIELDS.iter().map(|f| f.name).collect();
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
  }

  #[test]
  fn every_inherited_field_has_accessors() {
    for name in PackageSpec::INHERITED {
      assert!(lookup(name).is_ok(), "missing accessors for {name}");
    }
    assert_eq!(FIELDS.len(), PackageSpec::INHERITED.len());
  }

  #[test]
  fn unknown_field_is_reported() {
    let err = lookup("colour").unwrap_err();
    assert!(matches!(err, ExpandError::UnknownFieldKind { ref field } if field == "colour"));
  }

  #[test]
  fn setter_rejects_wrong_kind() {
    let mut spec = PackageSpec::default();
    let field = lookup("version").unwrap();
    let deps = vec!["glibc".to_string()];

    let err = (field.set)(&mut spec, FieldValue::List(&deps)).unwrap_err();
    assert!(matches!(err, ExpandError::BadField { ref field, kind: "list" } if field == "version"));
    assert!(spec.version.is_empty());
  }

  #[test]
  fn empty_overlay_keeps_base_value() {
    let mut base = PackageSpec {
      vendor: "acme".to_string(),
      ..Default::default()
    };
    overlay_field(&mut base, &PackageSpec::default(), "vendor").unwrap();
    assert_eq!(base.vendor, "acme");

    let overlay = PackageSpec {
      vendor: "initech".to_string(),
      ..Default::default()
    };
    overlay_field(&mut base, &overlay, "vendor").unwrap();
    assert_eq!(base.vendor, "initech");
  }

  #[test]
  fn scripts_merge_by_key() {
    let mut base = PackageSpec::default();
    base.scripts.insert("after-install".into(), "echo base".into());
    base.scripts.insert("before-remove".into(), "echo keep".into());

    let mut overlay = PackageSpec::default();
    overlay.scripts.insert("after-install".into(), "echo child".into());

    overlay_field(&mut base, &overlay, "scripts").unwrap();
    assert_eq!(base.scripts["after-install"], "echo child");
    assert_eq!(base.scripts["before-remove"], "echo keep");
  }

  #[test]
  fn attrs_and_obsoletes_replace_the_base_lists() {
    let mut base = PackageSpec {
      obsoletes: vec!["old".into()],
      attrs: vec![FileAttr {
        file: "/etc/base".into(),
        ..Default::default()
      }],
      ..Default::default()
    };
    let overlay = PackageSpec {
      attrs: vec![FileAttr {
        file: "/etc/child".into(),
        mode: "0600".into(),
        ..Default::default()
      }],
      ..Default::default()
    };

    overlay_field(&mut base, &overlay, "attrs").unwrap();
    overlay_field(&mut base, &overlay, "obsoletes").unwrap();
    assert_eq!(base.attrs.len(), 1);
    assert_eq!(base.attrs[0].file, "/etc/child");
    assert_eq!(base.obsoletes, vec!["old".to_string()]);

    let err = (lookup("attrs").unwrap().set)(&mut base, FieldValue::List(&[])).unwrap_err();
    assert!(matches!(err, ExpandError::BadField { ref field, kind: "list" } if field == "attrs"));
  }
}
