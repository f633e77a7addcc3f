//! Declarative binding of string-keyed option maps onto typed records.
//!
//! Each load declares a table of [`OptionDescriptor`]s: the wire name of the
//! option, a human-readable description, the primitive type it parses into,
//! and accessors into the target record. [`bind_options`] consumes such a
//! table to populate a record from user input; [`describe_options`] renders
//! the table (with current values as defaults) for UIs.

use std::collections::BTreeMap;

use crate::error::Error;

/// Primitive type an option value parses into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OptionKind {
    Int,
    Uint,
    Float,
    Bool,
    String,
}

/// A parsed option value, handed to a descriptor's setter. The variant
/// always matches the descriptor's declared [`OptionKind`].
#[derive(Clone, Debug, PartialEq)]
pub enum OptionValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Bool(bool),
    String(String),
}

/// Declares one configurable field of a record.
pub struct OptionDescriptor<T> {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: OptionKind,
    pub set: fn(&mut T, OptionValue),
    pub get: fn(&T) -> String,
}

/// Description of a declared option, as surfaced by `Load::options`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize)]
pub struct OptionInfo {
    pub name: String,
    pub description: String,
    pub default: String,
}

fn parse(kind: OptionKind, name: &str, raw: &str) -> Result<OptionValue, Error> {
    match kind {
        OptionKind::Int => raw
            .parse::<i64>()
            .map(OptionValue::Int)
            .map_err(|err| Error::Invalid(format!("option {name:?}: invalid integer {raw:?}: {err}"))),
        OptionKind::Uint => raw
            .parse::<u64>()
            .map(OptionValue::Uint)
            .map_err(|err| {
                Error::Invalid(format!("option {name:?}: invalid unsigned integer {raw:?}: {err}"))
            }),
        OptionKind::Float => raw
            .parse::<f64>()
            .map(OptionValue::Float)
            .map_err(|err| Error::Invalid(format!("option {name:?}: invalid number {raw:?}: {err}"))),
        OptionKind::Bool => match raw.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(OptionValue::Bool(true)),
            "false" | "f" | "0" => Ok(OptionValue::Bool(false)),
            _ => Err(Error::Invalid(format!(
                "option {name:?}: invalid boolean {raw:?}"
            ))),
        },
        OptionKind::String => Ok(OptionValue::String(raw.to_string())),
    }
}

/// Populates `target` from a string map using its descriptor table.
///
/// Keys the table does not declare are ignored; declared keys missing from
/// the map leave the field untouched; ill-typed values fail with
/// [`Error::Invalid`].
pub fn bind_options<T>(
    target: &mut T,
    descriptors: &[OptionDescriptor<T>],
    options: &BTreeMap<String, String>,
) -> Result<(), Error> {
    for desc in descriptors {
        let Some(raw) = options.get(desc.name) else {
            continue;
        };
        let value = parse(desc.kind, desc.name, raw)?;
        (desc.set)(target, value);
    }
    Ok(())
}

/// Renders the descriptor table, reading current field values as defaults.
pub fn describe_options<T>(target: &T, descriptors: &[OptionDescriptor<T>]) -> Vec<OptionInfo> {
    descriptors
        .iter()
        .map(|desc| OptionInfo {
            name: desc.name.to_string(),
            description: desc.description.to_string(),
            default: (desc.get)(target),
        })
        .collect()
}
