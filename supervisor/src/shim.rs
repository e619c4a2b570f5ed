//! Compatibility shims applied to an exported graph before it is imported.
//!
//! The engine's exporter and importer disagree in two ways:
//!
//! 1. Edge programs are exported under `po.program` but read back from
//!    `po.label`.
//! 2. The pretty-printer emits `Type extension of <T>` lines that the parser
//!    cannot consume; importing them crashes the engine.
//!
//! [`EngineExportShim`] repairs both. [`PassthroughShim`] is for engine
//! builds where the round trip is already symmetric.

use std::mem;

use serde_json::{Map, Value};

const EXPORTED_PROGRAM_FIELD: &str = "program";
const IMPORTED_PROGRAM_FIELD: &str = "label";
const TYPE_EXTENSION_PREFIX: &str = "Type extension of ";

/// Rewrites an exported graph into the shape the importer accepts.
pub trait ImportShim: Send + Sync {
    fn name(&self) -> &'static str;

    fn transform(&self, graph: Value) -> Value;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineExportShim;

impl ImportShim for EngineExportShim {
    fn name(&self) -> &'static str {
        "engine-export"
    }

    fn transform(&self, mut graph: Value) -> Value {
        let Some(edges) = graph.get_mut("edges").and_then(Value::as_array_mut) else {
            return graph;
        };

        for edge in edges {
            if let Some(po) = edge.get_mut("po").and_then(Value::as_object_mut)
                && po.contains_key(EXPORTED_PROGRAM_FIELD)
            {
                *po = relabel_program(mem::take(po));
            }
        }
        graph
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughShim;

impl ImportShim for PassthroughShim {
    fn name(&self) -> &'static str {
        "passthrough"
    }

    fn transform(&self, graph: Value) -> Value {
        graph
    }
}

/// Rename `program` to `label` in place (keeping key order) and strip
/// type-extension lines from string programs.
///
/// A non-string `program` is carried over unchanged rather than blanked to
/// an empty label.
fn relabel_program(po: Map<String, Value>) -> Map<String, Value> {
    po.into_iter()
        .map(|(key, value)| {
            if key != EXPORTED_PROGRAM_FIELD {
                return (key, value);
            }
            let value = match value {
                Value::String(program) => Value::String(strip_type_extension_lines(&program)),
                other => other,
            };
            (IMPORTED_PROGRAM_FIELD.to_string(), value)
        })
        .collect()
}

/// Drop every line whose trimmed text starts with `Type extension of `.
#[must_use]
pub fn strip_type_extension_lines(program: &str) -> String {
    program
        .split('\n')
        .filter(|line| !line.trim().starts_with(TYPE_EXTENSION_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::load_export;

    fn transform_str(raw: &str) -> String {
        let graph: Value = serde_json::from_str(raw).unwrap();
        EngineExportShim.transform(graph).to_string()
    }

    #[test]
    fn test_relabels_and_strips_type_extension() {
        let out = transform_str(r#"{"edges":[{"po":{"program":"Type extension of Foo\n+bar()."}}]}"#);
        assert_eq!(out, r#"{"edges":[{"po":{"label":"+bar()."}}]}"#);
        assert!(!out.contains('\n'));
    }

    #[test]
    fn test_other_content_is_untouched() {
        let raw = r#"{"current":3,"edges":[{"source":1,"po":{"kind":"trigger","program":"+a().\n  Type extension of T\n+b().","extra":[1.5,null]},"target":2},{"source":2,"target":3}],"nodes":[{"id":1},{"id":2},{"id":3}]}"#;
        let expected = r#"{"current":3,"edges":[{"source":1,"po":{"kind":"trigger","label":"+a().\n+b().","extra":[1.5,null]},"target":2},{"source":2,"target":3}],"nodes":[{"id":1},{"id":2},{"id":3}]}"#;
        assert_eq!(transform_str(raw), expected);
    }

    #[test]
    fn test_number_text_survives_transform_and_load_export() {
        let raw = r#"{"current":7,"w":1e5,"big":123456789012345678901234,"f":0.10,"edges":[{"weight":-0.0,"po":{"program":"Type extension of T\n+a()."}}]}"#;
        let graph: Value = serde_json::from_str(raw).unwrap();
        let line = load_export(&EngineExportShim.transform(graph));

        for text in [
            r#""w":1e5"#,
            r#""big":123456789012345678901234"#,
            r#""f":0.10"#,
            r#""weight":-0.0"#,
        ] {
            assert!(line.contains(text), "{text} missing from {line}");
        }
        assert!(line.ends_with(
            r#""graph":{"current":7,"w":1e5,"big":123456789012345678901234,"f":0.10,"edges":[{"weight":-0.0,"po":{"label":"+a()."}}]}}"#
        ));
    }

    #[test]
    fn test_graph_without_edges_is_unchanged() {
        let raw = r#"{"current":0,"nodes":[]}"#;
        assert_eq!(transform_str(raw), raw);
        assert_eq!(transform_str("[1,2]"), "[1,2]");
    }

    #[test]
    fn test_existing_label_is_left_alone() {
        let raw = r#"{"edges":[{"po":{"label":"Type extension of X\n+a()."}}]}"#;
        assert_eq!(transform_str(raw), raw);
    }

    #[test]
    fn test_non_string_program_is_renamed_only() {
        let raw = r#"{"edges":[{"po":{"program":{"stmts":[]}}}]}"#;
        assert_eq!(
            transform_str(raw),
            r#"{"edges":[{"po":{"label":{"stmts":[]}}}]}"#
        );
    }

    #[test]
    fn test_passthrough_is_identity() {
        let graph: Value =
            serde_json::from_str(r#"{"edges":[{"po":{"program":"Type extension of Foo"}}]}"#)
                .unwrap();
        assert_eq!(PassthroughShim.transform(graph.clone()), graph);
        assert_eq!(PassthroughShim.name(), "passthrough");
        assert_eq!(EngineExportShim.name(), "engine-export");
    }

    #[test]
    fn test_strip_keeps_unrelated_lines_verbatim() {
        assert_eq!(
            strip_type_extension_lines("  +a().\nType extension of B\n\n-c()."),
            "  +a().\n\n-c()."
        );
        assert_eq!(strip_type_extension_lines(""), "");
    }
}
