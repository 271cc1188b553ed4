//! # Request Template
//!
//! Um step descreve sua requisição como uma árvore JSON arbitrária onde
//! certas folhas são marcadas como expressões compiladas (prefixo `#` na
//! chave). Em vez de recompilar essas expressões a cada invocação — o que
//! aconteceria centenas de vezes por segundo sob carga — o template é
//! compilado uma única vez na construção do framework e depois apenas
//! *materializado* (clonado + reavaliado) a cada step.
//!
//! Grounded on `internal/eval/eval.go`'s `NewEvaluable`/`Evaluate` split:
//! a compilação separa constantes de expressões; a materialização clona
//! as constantes e escreve cada expressão avaliada de volta no clone.

use crate::eval::{Binding, EvalError, Evaluable};
use crate::value::{Path, Value};
use serde_json::Value as Json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("expression-marked leaf at {0:?} is not a string")]
    NonStringExpressionLeaf(String),
    #[error("failed to compile expression at {path:?}: {source}")]
    CompileFailed {
        path: String,
        #[source]
        source: EvalError,
    },
    #[error("failed to evaluate expression at {path:?}: {source}")]
    EvaluateFailed {
        path: String,
        #[source]
        source: EvalError,
    },
}

/// The sigil marking an object key's value as a compiled expression
/// rather than a literal.
pub const EXPRESSION_SIGIL: char = '#';

/// A compiled template: an immutable constants skeleton plus a list of
/// (path, compiled expression) pairs. Safe to share across concurrent
/// workers — materialization never mutates it.
#[derive(Debug, Clone)]
pub struct Template {
    constants: Value,
    expressions: Vec<(Path, Evaluable)>,
}

impl Template {
    /// Walks `raw` depth-first, splitting expression-marked leaves from
    /// literal ones. Fails closed: any malformed expression leaf aborts
    /// compilation for the whole template (this happens at build time,
    /// before any worker starts, so a hard error here is the right
    /// behavior — see §7, "Build-time errors").
    pub fn compile(raw: &Json) -> Result<Self, TemplateError> {
        let mut constants = Value::map();
        let mut expressions = Vec::new();
        let mut path = Path::default();
        walk(raw, &mut path, &mut constants, &mut expressions)?;
        Ok(Template {
            constants,
            expressions,
        })
    }

    /// Deep-clones the constants skeleton, evaluates every registered
    /// expression against `binding`, and writes each result at its path
    /// in the clone. The clone is mandatory: workers run concurrently and
    /// must never alias the shared skeleton.
    pub fn materialize(&self, binding: &Binding) -> Result<Value, TemplateError> {
        let mut out = self.constants.clone();
        for (path, expr) in &self.expressions {
            let value = expr
                .evaluate(binding)
                .map_err(|source| TemplateError::EvaluateFailed {
                    path: path.to_string_form(),
                    source,
                })?;
            out.set_path(path, value);
        }
        Ok(out)
    }
}

fn walk(
    node: &Json,
    path: &mut Path,
    constants: &mut Value,
    expressions: &mut Vec<(Path, Evaluable)>,
) -> Result<(), TemplateError> {
    match node {
        Json::Object(map) => {
            for (key, value) in map {
                if let Some(cleaned) = key.strip_prefix(EXPRESSION_SIGIL) {
                    let expr_source = value.as_str().ok_or_else(|| {
                        TemplateError::NonStringExpressionLeaf({
                            let mut p = path.clone();
                            p.push_field(cleaned);
                            p.to_string_form()
                        })
                    })?;
                    let mut leaf_path = path.clone();
                    leaf_path.push_field(cleaned);
                    let compiled =
                        Evaluable::compile(expr_source).map_err(|source| TemplateError::CompileFailed {
                            path: leaf_path.to_string_form(),
                            source,
                        })?;
                    expressions.push((leaf_path, compiled));
                } else {
                    path.push_field(key);
                    walk(value, path, constants, expressions)?;
                    path.segments.pop();
                }
            }
        }
        Json::Array(items) => {
            for (idx, item) in items.iter().enumerate() {
                path.push_index(idx);
                walk(item, path, constants, expressions)?;
                path.segments.pop();
            }
        }
        leaf => {
            constants.set_path(path, crate::value::from_json(leaf));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Binding;
    use std::collections::BTreeMap;

    #[test]
    fn literal_leaves_survive_unchanged() {
        let raw: Json = serde_json::from_str(r#"{"method":"GET","url":"http://x"}"#).unwrap();
        let tpl = Template::compile(&raw).unwrap();
        let materialized = tpl.materialize(&Binding::new()).unwrap();
        assert_eq!(
            materialized.get_path(&Path::parse("method")),
            Some(&Value::Str("GET".to_string()))
        );
    }

    #[test]
    fn expression_leaf_is_stripped_and_evaluated() {
        let raw: Json = serde_json::from_str(r#"{"#V":"source.src.k"}"#).unwrap();
        let tpl = Template::compile(&raw).unwrap();
        let binding = Binding::new().with(
            "source",
            Value::Map(BTreeMap::from([(
                "src".to_string(),
                Value::Map(BTreeMap::from([("k".to_string(), Value::Str("a".into()))])),
            )])),
        );
        let materialized = tpl.materialize(&binding).unwrap();
        assert_eq!(
            materialized.get_path(&Path::parse("V")),
            Some(&Value::Str("a".to_string()))
        );
        // the sigil itself must not survive into the materialized value
        assert_eq!(materialized.get_path(&Path::parse("#V")), None);
    }

    #[test]
    fn two_materializations_do_not_alias() {
        let raw: Json = serde_json::from_str(r#"{"list":[1,2,3]}"#).unwrap();
        let tpl = Template::compile(&raw).unwrap();
        let mut a = tpl.materialize(&Binding::new()).unwrap();
        let b = tpl.materialize(&Binding::new()).unwrap();
        a.set_path(&Path::parse("list[0]"), Value::Int(99));
        assert_eq!(b.get_path(&Path::parse("list[0]")), Some(&Value::Int(1)));
    }

    #[test]
    fn non_string_expression_leaf_fails_compilation() {
        let raw: Json = serde_json::from_str(r#"{"#V": 5}"#).unwrap();
        assert!(Template::compile(&raw).is_err());
    }

    #[test]
    fn nested_arrays_and_objects_compile() {
        let raw: Json =
            serde_json::from_str(r#"{"items":[{"#id":"uuid()"},{"id":"fixed"}]}"#).unwrap();
        let tpl = Template::compile(&raw).unwrap();
        let materialized = tpl.materialize(&Binding::new()).unwrap();
        assert!(materialized
            .get_path(&Path::parse("items[0].id"))
            .unwrap()
            .as_str()
            .unwrap()
            .len()
            > 0);
        assert_eq!(
            materialized.get_path(&Path::parse("items[1].id")),
            Some(&Value::Str("fixed".to_string()))
        );
    }
}
