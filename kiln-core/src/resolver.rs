//! `${name}` template resolution for path variables.
//!
//! A variable map holds literal or templated strings. [`resolve`] turns it
//! into a map where every value is a plain path fragment:
//!
//! ```text
//! source  = "src"              ->  "src"
//! styles  = "${source}/styles" ->  "src/styles"
//! ```
//!
//! Names are visited in sorted order and each variable is resolved
//! depth-first, so the result (and the first error reported) is the same for
//! a given input map. An unterminated `${` is kept as literal text.
//!
//! Substituted values are never scanned again. A value whose substitution
//! splices together a new `${name}` is rejected, so resolving a resolved map
//! returns it unchanged.

use std::collections::BTreeMap;

use crate::error::ConfigError;

/// Symbolic name → literal or templated value.
pub type VarMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Literal(&'a str),
    Reference(&'a str),
}

fn parse_template(template: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else { break };
        if start > 0 {
            segments.push(Segment::Literal(&rest[..start]));
        }
        segments.push(Segment::Reference(after[..end].trim()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Literal(rest));
    }
    segments
}

/// Names referenced by `template`, in order of appearance.
pub fn references(template: &str) -> Vec<&str> {
    parse_template(template)
        .into_iter()
        .filter_map(|s| match s {
            Segment::Reference(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect()
}

/// Resolve every variable in `vars`.
///
/// Fails with [`ConfigError::UnresolvedReference`] when a template names an
/// undefined variable, with [`ConfigError::CyclicReference`] when
/// resolution would recurse forever, and with
/// [`ConfigError::SplicedReference`] when a resolved value contains a
/// reference.
pub fn resolve(vars: &VarMap) -> Result<VarMap, ConfigError> {
    let mut resolved = VarMap::new();
    for name in vars.keys() {
        let mut stack = Vec::new();
        resolve_var(name, vars, &mut resolved, &mut stack)?;
    }
    Ok(resolved)
}

fn resolve_var(
    name: &str,
    vars: &VarMap,
    resolved: &mut VarMap,
    stack: &mut Vec<String>,
) -> Result<String, ConfigError> {
    if let Some(value) = resolved.get(name) {
        return Ok(value.clone());
    }
    if let Some(pos) = stack.iter().position(|n| n == name) {
        let mut cycle = stack[pos..].to_vec();
        cycle.push(name.to_string());
        return Err(ConfigError::CyclicReference { cycle });
    }

    let template = vars
        .get(name)
        .ok_or_else(|| ConfigError::UnresolvedReference {
            variable: name.to_string(),
            referenced_by: stack.last().cloned().unwrap_or_default(),
        })?;

    stack.push(name.to_string());
    let mut out = String::with_capacity(template.len());
    for segment in parse_template(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference(reference) => {
                if !vars.contains_key(reference) {
                    return Err(ConfigError::UnresolvedReference {
                        variable: reference.to_string(),
                        referenced_by: name.to_string(),
                    });
                }
                out.push_str(&resolve_var(reference, vars, resolved, stack)?);
            }
        }
    }
    stack.pop();

    if !references(&out).is_empty() {
        return Err(ConfigError::SplicedReference {
            variable: name.to_string(),
            value: out,
        });
    }
    resolved.insert(name.to_string(), out.clone());
    Ok(out)
}

/// Substitute `${name}` references in `template` from an already resolved map.
///
/// Substituted values are not scanned again.
pub fn expand(template: &str, resolved: &VarMap) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(template.len());
    for segment in parse_template(template) {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Reference(name) => {
                let value = resolved
                    .get(name)
                    .ok_or_else(|| ConfigError::UnresolvedReference {
                        variable: name.to_string(),
                        referenced_by: template.to_string(),
                    })?;
                out.push_str(value);
            }
        }
    }
    Ok(out)
}
