//! # Avaliador de Expressões
//!
//! Compila uma string de expressão (o lado direito de um campo marcado
//! com `#`, ou um predicado `success`/`errCode`) em uma árvore sintática
//! imutável que pode ser avaliada repetidamente contra diferentes
//! *bindings* de execução — uma por unidade, potencialmente milhares de
//! vezes por segundo sob carga.
//!
//! A gramática é deliberadamente pequena: aritmética, bitmask, lógica
//! proposicional, concatenação de texto, literais JSON, strings com aspas
//! simples, e um conjunto fixo de funções (`date`, `len`, `int`, `uuid`,
//! `random`, `randInt`). Não há suporte a definição de funções nem a
//! estruturas de controle — o objetivo é um avaliador de uma única
//! expressão, não uma linguagem de programação.
//!
//! ## Bindings suportados
//!
//! Uma expressão referencia variáveis por caminho pontilhado a partir de
//! uma raiz: `source.<nome>...`, `stat...`, `res...`. A raiz é resolvida
//! contra o [`Binding`] passado a [`Evaluable::evaluate`]; o restante do
//! caminho navega dentro do valor dinâmico resultante.

mod functions;
mod lexer;
mod parser;

use crate::value::{Path, Value};
use std::collections::BTreeMap;
use thiserror::Error;

pub use lexer::LexError;
pub use parser::{Expr, ParseError};

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("failed to parse expression {0:?}: {1}")]
    Parse(String, ParseError),
    #[error("failed to tokenize expression {0:?}: {1}")]
    Lex(String, LexError),
    #[error("unknown variable root {0:?}")]
    UnknownRoot(String),
    #[error("path {0:?} not found in binding")]
    PathNotFound(String),
    #[error("{0}() expected a value of a different type: {1}")]
    TypeMismatch(&'static str, String),
    #[error("{0}: {1}")]
    Function(&'static str, String),
    #[error("unsupported operator {0:?} for operand types")]
    BadOperator(String),
}

/// A expressão já compilada, pronta para ser reavaliada concorrentemente —
/// nenhuma mutação ocorre após [`Evaluable::compile`].
#[derive(Debug, Clone)]
pub struct Evaluable {
    expr: Expr,
    source: String,
}

/// O binding de execução disponibilizado a uma expressão: os três
/// namespaces descritos em §3 (`source`, `stat`, `res`), cada um como um
/// [`Value`] arbitrário.
#[derive(Debug, Default, Clone)]
pub struct Binding {
    roots: BTreeMap<String, Value>,
}

impl Binding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, root: impl Into<String>, value: Value) -> Self {
        self.roots.insert(root.into(), value);
        self
    }

    pub fn set(&mut self, root: impl Into<String>, value: Value) {
        self.roots.insert(root.into(), value);
    }

    pub fn get(&self, root: &str) -> Option<&Value> {
        self.roots.get(root)
    }
}

impl Evaluable {
    /// Compila `source` em uma árvore sintática. Falha em erro léxico ou
    /// sintático; nunca falha por causa do binding (isso só acontece em
    /// `evaluate`).
    pub fn compile(source: &str) -> Result<Self, EvalError> {
        let tokens =
            lexer::tokenize(source).map_err(|e| EvalError::Lex(source.to_string(), e))?;
        let expr = parser::parse(&tokens).map_err(|e| EvalError::Parse(source.to_string(), e))?;
        Ok(Evaluable {
            expr,
            source: source.to_string(),
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn evaluate(&self, binding: &Binding) -> Result<Value, EvalError> {
        eval_expr(&self.expr, binding)
    }
}

fn eval_expr(expr: &Expr, binding: &Binding) -> Result<Value, EvalError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Int(n) => Ok(Value::Int(*n)),
        Expr::Float(f) => Ok(Value::Float(*f)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_expr(item, binding)?);
            }
            Ok(Value::Seq(out))
        }
        Expr::Object(fields) => {
            let mut out = BTreeMap::new();
            for (k, v) in fields {
                out.insert(k.clone(), eval_expr(v, binding)?);
            }
            Ok(Value::Map(out))
        }
        Expr::Var(raw_path) => resolve_var(raw_path, binding),
        Expr::Not(inner) => {
            let v = eval_expr(inner, binding)?;
            Ok(Value::Bool(!truthy(&v)))
        }
        Expr::Neg(inner) => {
            let v = eval_expr(inner, binding)?;
            match v {
                Value::Int(n) => Ok(Value::Int(-n)),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(EvalError::TypeMismatch("-", format!("{other}"))),
            }
        }
        Expr::BitNot(inner) => {
            let v = eval_expr(inner, binding)?;
            match v.as_i64() {
                Some(n) => Ok(Value::Int(!n)),
                None => Err(EvalError::TypeMismatch("~", format!("{v}"))),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let l = eval_expr(lhs, binding)?;
            let r = eval_expr(rhs, binding)?;
            apply_binary(op, l, r)
        }
        Expr::Call(name, args) => {
            let mut values = Vec::with_capacity(args.len());
            for a in args {
                values.push(eval_expr(a, binding)?);
            }
            functions::call(name, values)
        }
    }
}

fn resolve_var(raw_path: &str, binding: &Binding) -> Result<Value, EvalError> {
    let path = Path::parse(raw_path);
    let root = match path.segments.first() {
        Some(crate::value::Segment::Field(name)) => name.clone(),
        _ => return Err(EvalError::UnknownRoot(raw_path.to_string())),
    };
    let root_value = binding
        .get(&root)
        .ok_or_else(|| EvalError::UnknownRoot(root.clone()))?;
    if path.segments.len() == 1 {
        return Ok(root_value.clone());
    }
    let rest = Path {
        segments: path.segments[1..].to_vec(),
    };
    root_value
        .get_path(&rest)
        .cloned()
        .ok_or_else(|| EvalError::PathNotFound(raw_path.to_string()))
}

pub(crate) fn truthy(v: &Value) -> bool {
    match v {
        Value::Bool(b) => *b,
        Value::Null => false,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Str(s) => !s.is_empty(),
        Value::Seq(items) => !items.is_empty(),
        Value::Map(m) => !m.is_empty(),
    }
}

fn apply_binary(op: &parser::BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
    use parser::BinOp::*;
    match op {
        Add => numeric_or_concat(l, r),
        Sub => numeric(l, r, |a, b| a - b, |a, b| a - b),
        Mul => numeric(l, r, |a, b| a * b, |a, b| a * b),
        Div => numeric(l, r, |a, b| a / b, |a, b| a / b),
        Mod => match (l, r) {
            (Value::Int(a), Value::Int(b)) if b != 0 => Ok(Value::Int(a % b)),
            (a, b) => Err(EvalError::BadOperator(format!("{a} % {b}"))),
        },
        And => int_op(l, r, |a, b| a & b),
        Or => int_op(l, r, |a, b| a | b),
        Xor => int_op(l, r, |a, b| a ^ b),
        Shl => int_op(l, r, |a, b| a << b),
        Shr => int_op(l, r, |a, b| a >> b),
        Eq => Ok(Value::Bool(values_eq(&l, &r))),
        Ne => Ok(Value::Bool(!values_eq(&l, &r))),
        Lt => compare(l, r, |o| o == std::cmp::Ordering::Less),
        Le => compare(l, r, |o| o != std::cmp::Ordering::Greater),
        Gt => compare(l, r, |o| o == std::cmp::Ordering::Greater),
        Ge => compare(l, r, |o| o != std::cmp::Ordering::Less),
        AndAnd => Ok(Value::Bool(truthy(&l) && truthy(&r))),
        OrOr => Ok(Value::Bool(truthy(&l) || truthy(&r))),
    }
}

fn numeric_or_concat(l: Value, r: Value) -> Result<Value, EvalError> {
    match (&l, &r) {
        (Value::Str(_), _) | (_, Value::Str(_)) => Ok(Value::Str(format!("{l}{r}"))),
        _ => numeric(l, r, |a, b| a + b, |a, b| a + b),
    }
}

fn numeric(
    l: Value,
    r: Value,
    int_op: impl Fn(i64, i64) -> i64,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            Ok(Value::Float(float_op(l.as_f64().unwrap(), r.as_f64().unwrap())))
        }
        _ => Err(EvalError::BadOperator(format!("{l} ? {r}"))),
    }
}

fn int_op(l: Value, r: Value, op: impl Fn(i64, i64) -> i64) -> Result<Value, EvalError> {
    match (l.as_i64(), r.as_i64()) {
        (Some(a), Some(b)) => Ok(Value::Int(op(a, b))),
        _ => Err(EvalError::BadOperator("bitmask on non-integer".to_string())),
    }
}

fn values_eq(l: &Value, r: &Value) -> bool {
    match (l, r) {
        (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => (*a as f64) == *b,
        _ => l == r,
    }
}

fn compare(l: Value, r: Value, pred: impl Fn(std::cmp::Ordering) -> bool) -> Result<Value, EvalError> {
    let ordering = match (&l, &r) {
        (Value::Str(a), Value::Str(b)) => a.partial_cmp(b),
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            l.as_f64().unwrap().partial_cmp(&r.as_f64().unwrap())
        }
        _ => None,
    };
    match ordering {
        Some(o) => Ok(Value::Bool(pred(o))),
        None => Err(EvalError::BadOperator(format!("{l} <> {r}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(src: &str, binding: &Binding) -> Value {
        Evaluable::compile(src).unwrap().evaluate(binding).unwrap()
    }

    #[test]
    fn arithmetic_prefers_integer() {
        assert_eq!(eval("1 + 2", &Binding::new()), Value::Int(3));
        assert_eq!(eval("1 + 2.5", &Binding::new()), Value::Float(3.5));
    }

    #[test]
    fn string_concat_via_plus() {
        assert_eq!(
            eval("'a' + 'b'", &Binding::new()),
            Value::Str("ab".to_string())
        );
    }

    #[test]
    fn variable_path_resolution() {
        let binding = Binding::new().with(
            "source",
            Value::Map(BTreeMap::from([(
                "src".to_string(),
                Value::Map(BTreeMap::from([("k".to_string(), Value::Str("a".into()))])),
            )])),
        );
        assert_eq!(eval("source.src.k", &binding), Value::Str("a".to_string()));
    }

    #[test]
    fn equality_across_int_and_float() {
        let binding = Binding::new().with("res", Value::Map(BTreeMap::from([(
            "exit_code".into(),
            Value::Int(0),
        )])));
        assert_eq!(eval("res.exit_code == 0", &binding), Value::Bool(true));
    }

    #[test]
    fn logical_and_comparison() {
        assert_eq!(eval("1 < 2 && 3 > 2", &Binding::new()), Value::Bool(true));
    }

    #[test]
    fn bitmask_operators() {
        assert_eq!(eval("6 & 3", &Binding::new()), Value::Int(2));
        assert_eq!(eval("6 | 1", &Binding::new()), Value::Int(7));
        assert_eq!(eval("1 << 4", &Binding::new()), Value::Int(16));
    }

    #[test]
    fn unknown_root_is_an_error() {
        let err = Evaluable::compile("missing.field")
            .unwrap()
            .evaluate(&Binding::new())
            .unwrap_err();
        assert!(matches!(err, EvalError::UnknownRoot(_)));
    }
}
