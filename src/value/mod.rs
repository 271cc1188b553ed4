//! # Valor Dinâmico e Endereçamento por Caminho
//!
//! O mecanismo de templates e o avaliador de expressões trabalham sobre uma
//! árvore de valores cujo formato não é conhecido em tempo de compilação:
//! o corpo de uma requisição, a resposta de um driver, o registro vindo de
//! uma fonte. Em vez de carregar `serde_json::Value` para todo lado e
//! reimplementar a política de decodificação numérica em cada ponto de
//! ingestão, este módulo concentra os dois em um único lugar.
//!
//! ## Política de decodificação numérica
//!
//! Um número JSON sem parte fracionária ou expoente, que caiba em um
//! `i64`, é decodificado como inteiro; qualquer outro número vira `f64`.
//! Isso precisa valer de forma uniforme para tudo que entra no motor:
//! resultado de driver, registro de fonte, round-trip do recorder. Sem essa
//! regra, `res.exit_code == 0` falharia sempre que o driver produzisse um
//! `0` que fosse decodificado como `0.0` e comparado contra um inteiro.

use serde_json::{Map, Number, Value as Json};
use std::collections::BTreeMap;
use std::fmt;

/// Valor dinâmico com oito variantes: nulo, inteiro de 64 bits, ponto
/// flutuante de 64 bits, texto, booleano, sequência e mapeamento.
///
/// `Mapping` usa `BTreeMap` (não `HashMap`) porque o Reporter (§4.I) exige
/// saída determinística sob chaves ordenadas — ordenar na borda de saída
/// é mais simples quando a estrutura já é ordenada por construção.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Seq(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Navega um `Map`/`Seq` por uma lista de segmentos já tokenizados
    /// (ver [`Path`]). Retorna `None` se algum segmento não existir ou o
    /// tipo não casar com o segmento (índice contra mapa, campo contra
    /// sequência).
    pub fn get_path(&self, path: &Path) -> Option<&Value> {
        let mut cur = self;
        for seg in &path.segments {
            cur = match (cur, seg) {
                (Value::Map(m), Segment::Field(name)) => m.get(name)?,
                (Value::Seq(items), Segment::Index(i)) => items.get(*i)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    /// Escreve `value` no caminho indicado, criando mapas/sequências
    /// intermediários conforme necessário. Usado pela materialização de
    /// templates (§4.B) para gravar o resultado de uma expressão compilada
    /// de volta no esqueleto clonado.
    pub fn set_path(&mut self, path: &Path, value: Value) {
        fn go(cur: &mut Value, segs: &[Segment], value: Value) {
            match segs.split_first() {
                None => *cur = value,
                Some((Segment::Field(name), rest)) => {
                    if !matches!(cur, Value::Map(_)) {
                        *cur = Value::map();
                    }
                    if let Value::Map(m) = cur {
                        let entry = m.entry(name.clone()).or_insert(Value::Null);
                        go(entry, rest, value);
                    }
                }
                Some((Segment::Index(idx), rest)) => {
                    if !matches!(cur, Value::Seq(_)) {
                        *cur = Value::Seq(Vec::new());
                    }
                    if let Value::Seq(items) = cur {
                        while items.len() <= *idx {
                            items.push(Value::Null);
                        }
                        go(&mut items[*idx], rest, value);
                    }
                }
            }
        }
        go(self, &path.segments, value);
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Seq(_) | Value::Map(_) => write!(f, "{}", to_json(self)),
        }
    }
}

/// Converte um `serde_json::Value` em `Value`, aplicando a política de
/// decodificação numérica de §4.A a todo número encontrado.
pub fn from_json(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => from_json_number(n),
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::Seq(items.iter().map(from_json).collect()),
        Json::Object(map) => {
            Value::Map(map.iter().map(|(k, v)| (k.clone(), from_json(v))).collect())
        }
    }
}

fn from_json_number(n: &Number) -> Value {
    if n.is_i64() {
        // serde_json only reports is_i64() for numbers with no
        // fractional/exponent part that fit in an i64 — exactly the rule
        // this engine wants.
        Value::Int(n.as_i64().expect("is_i64 implies as_i64"))
    } else if n.is_u64() {
        // fits a u64 but not an i64 (i.e. > i64::MAX): falls back to float
        // per the "otherwise 64-bit float" clause.
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    } else {
        Value::Float(n.as_f64().unwrap_or(f64::NAN))
    }
}

/// Converte de volta para `serde_json::Value`, por exemplo para gravar um
/// `UnitStat` no Recorder ou serializar um corpo de requisição HTTP.
pub fn to_json(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Int(n) => Json::Number((*n).into()),
        Value::Float(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::Str(s) => Json::String(s.clone()),
        Value::Bool(b) => Json::Bool(*b),
        Value::Seq(items) => Json::Array(items.iter().map(to_json).collect()),
        Value::Map(map) => {
            let mut obj = Map::new();
            for (k, v) in map {
                obj.insert(k.clone(), to_json(v));
            }
            Json::Object(obj)
        }
    }
}

/// Um segmento de caminho: nome de campo (`.foo`) ou índice de sequência
/// (`[3]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// Caminho compilado, ex.: `stat.step[0].res.stdout` vira
/// `[Field("stat"), Field("step"), Index(0), Field("res"), Field("stdout")]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Path {
    pub segments: Vec<Segment>,
}

impl Path {
    pub fn parse(raw: &str) -> Self {
        let mut segments = Vec::new();
        let mut field = String::new();
        let mut chars = raw.chars().peekable();

        fn flush(field: &mut String, segments: &mut Vec<Segment>) {
            if !field.is_empty() {
                segments.push(Segment::Field(std::mem::take(field)));
            }
        }

        while let Some(c) = chars.next() {
            match c {
                '.' => flush(&mut field, &mut segments),
                '[' => {
                    flush(&mut field, &mut segments);
                    let mut idx = String::new();
                    for c2 in chars.by_ref() {
                        if c2 == ']' {
                            break;
                        }
                        idx.push(c2);
                    }
                    if let Ok(n) = idx.trim().parse::<usize>() {
                        segments.push(Segment::Index(n));
                    }
                }
                _ => field.push(c),
            }
        }
        flush(&mut field, &mut segments);

        Path { segments }
    }

    pub fn push_field(&mut self, name: impl Into<String>) {
        self.segments.push(Segment::Field(name.into()));
    }

    pub fn push_index(&mut self, idx: usize) {
        self.segments.push(Segment::Index(idx));
    }

    pub fn to_string_form(&self) -> String {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Field(name) => {
                    if !out.is_empty() {
                        out.push('.');
                    }
                    out.push_str(name);
                }
                Segment::Index(i) => {
                    out.push_str(&format!("[{i}]"));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_preferred_over_float() {
        let json: Json = serde_json::from_str(r#"{"a": 0, "b": 0.5, "c": 9223372036854775807}"#).unwrap();
        let v = from_json(&json);
        assert_eq!(v.get_path(&Path::parse("a")), Some(&Value::Int(0)));
        assert_eq!(v.get_path(&Path::parse("b")), Some(&Value::Float(0.5)));
        assert_eq!(
            v.get_path(&Path::parse("c")),
            Some(&Value::Int(9223372036854775807))
        );
    }

    #[test]
    fn path_parses_field_and_index() {
        let path = Path::parse("stat.step[0].res.stdout");
        assert_eq!(
            path.segments,
            vec![
                Segment::Field("stat".into()),
                Segment::Field("step".into()),
                Segment::Index(0),
                Segment::Field("res".into()),
                Segment::Field("stdout".into()),
            ]
        );
    }

    #[test]
    fn set_path_creates_intermediate_containers() {
        let mut v = Value::map();
        v.set_path(&Path::parse("a.b[1].c"), Value::Str("x".into()));
        let expected: Json = serde_json::from_str(r#"{"a":{"b":[null,{"c":"x"}]}}"#).unwrap();
        assert_eq!(to_json(&v), expected);
    }

    #[test]
    fn round_trip_through_json_preserves_shape() {
        let json: Json =
            serde_json::from_str(r#"{"k":"a","n":1,"nested":{"x":[1,2,3]}}"#).unwrap();
        let v = from_json(&json);
        assert_eq!(to_json(&v), json);
    }

    #[test]
    fn get_path_on_wrong_container_kind_is_none() {
        let v = Value::Seq(vec![Value::Int(1)]);
        assert_eq!(v.get_path(&Path::parse("field")), None);
    }
}
