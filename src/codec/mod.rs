//! # Ledger Key Codec
//!
//! Bucket signatures are persisted as node property keys:
//!
//! ```text
//! <prefix><type>#<DIRECTION>#<key><token>&<key><token>...[#*]
//! ```
//!
//! Pairs are sorted by key. A trailing `#*` marks a wildcard signature.
//!
//! | Predicate | Token |
//! |-----------|-------|
//! | `Any` | `=*` |
//! | `Undefined` | `=UNDEF` |
//! | `EqualTo(v)` | `=v` |
//! | `GreaterThan(v)` | `>v` |
//! | `LessThan(v)` | `<v` |
//! | `Or(a, b)` | `a\|\|b` (left operand parenthesised when it is itself an `Or`) |
//!
//! Values carry a one-letter type tag: `b:` bool, `i:` int, `f:` float,
//! `c:` char, `s:` string, `x:` hex bytes, `l:[v,v,...]` list.
//! Structural characters inside names and values are escaped with `\`.

use crate::model::{Direction, Value};
use crate::predicate::ValuePredicate;
use crate::signature::RelationshipSignature;
use crate::{Error, Result};

const SPECIAL: &[char] = &['\\', '#', '&', '|', ',', '[', ']', '(', ')', '=', '<', '>'];

// ============================================================================
// Encoding
// ============================================================================

/// Full ledger key for a bucket signature.
pub fn encode_key(prefix: &str, signature: &RelationshipSignature) -> String {
    let mut out = String::from(prefix);
    write_signature(&mut out, signature);
    out
}

/// Ledger key without a prefix.
pub fn encode_signature(signature: &RelationshipSignature) -> String {
    let mut out = String::new();
    write_signature(&mut out, signature);
    out
}

pub fn encode_predicate(predicate: &ValuePredicate) -> String {
    let mut out = String::new();
    write_predicate(&mut out, predicate);
    out
}

fn write_signature(out: &mut String, signature: &RelationshipSignature) {
    escape(out, signature.rel_type());
    out.push('#');
    out.push_str(signature.direction().as_str());
    out.push('#');
    for (i, (key, predicate)) in signature.properties().enumerate() {
        if i > 0 {
            out.push('&');
        }
        escape(out, key);
        write_predicate(out, predicate);
    }
    if !signature.is_literal() {
        out.push_str("#*");
    }
}

fn write_predicate(out: &mut String, predicate: &ValuePredicate) {
    match predicate {
        ValuePredicate::Any => out.push_str("=*"),
        ValuePredicate::Undefined => out.push_str("=UNDEF"),
        ValuePredicate::EqualTo(v) => {
            out.push('=');
            write_value(out, v);
        }
        ValuePredicate::GreaterThan(v) => {
            out.push('>');
            write_value(out, v);
        }
        ValuePredicate::LessThan(v) => {
            out.push('<');
            write_value(out, v);
        }
        ValuePredicate::Or(first, second) => {
            if matches!(**first, ValuePredicate::Or(..)) {
                out.push('(');
                write_predicate(out, first);
                out.push(')');
            } else {
                write_predicate(out, first);
            }
            out.push_str("||");
            write_predicate(out, second);
        }
    }
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Bool(b) => out.push_str(if *b { "b:true" } else { "b:false" }),
        Value::Int(i) => out.push_str(&format!("i:{i}")),
        Value::Float(f) => out.push_str(&format!("f:{f:?}")),
        Value::Char(c) => {
            out.push_str("c:");
            escape(out, c.encode_utf8(&mut [0; 4]));
        }
        Value::String(s) => {
            out.push_str("s:");
            escape(out, s);
        }
        Value::Bytes(bytes) => {
            out.push_str("x:");
            for b in bytes {
                out.push_str(&format!("{b:02x}"));
            }
        }
        Value::List(items) => {
            out.push_str("l:[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(out, item);
            }
            out.push(']');
        }
        // never part of a predicate
        Value::Null | Value::Map(_) => out.push_str("n:"),
    }
}

fn escape(out: &mut String, text: &str) {
    for c in text.chars() {
        if SPECIAL.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode a ledger key written by [`encode_key`] with the same prefix.
pub fn decode_key(prefix: &str, key: &str) -> Result<RelationshipSignature> {
    let body = key.strip_prefix(prefix).ok_or_else(|| Error::InvalidLedgerKey {
        key: key.to_owned(),
        message: format!("missing prefix '{prefix}'"),
    })?;
    let mut cursor = Cursor { key, input: body, pos: 0 };
    cursor.signature()
}

struct Cursor<'a> {
    key: &'a str,
    input: &'a str,
    pos: usize,
}

impl Cursor<'_> {
    fn error(&self, message: impl Into<String>) -> Error {
        Error::InvalidLedgerKey {
            key: self.key.to_owned(),
            message: format!("{} at offset {}", message.into(), self.pos),
        }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += c.len_utf8();
            true
        } else {
            false
        }
    }

    fn eat_str(&mut self, s: &str) -> bool {
        if self.input[self.pos..].starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) { Ok(()) } else { Err(self.error(format!("expected '{c}'"))) }
    }

    /// Unescaped text up to the next structural character.
    fn text(&mut self) -> Result<String> {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if c == '\\' {
                self.bump();
                let escaped = self.bump().ok_or_else(|| self.error("dangling escape"))?;
                out.push(escaped);
            } else if SPECIAL.contains(&c) {
                break;
            } else {
                out.push(c);
                self.bump();
            }
        }
        Ok(out)
    }

    fn signature(&mut self) -> Result<RelationshipSignature> {
        let rel_type = self.text()?;
        self.expect('#')?;
        let direction: Direction = self.text()?.parse().map_err(|_| self.error("unknown direction"))?;
        self.expect('#')?;

        let mut pairs = Vec::new();
        if self.peek().is_some_and(|c| c != '#') {
            loop {
                let key = self.text()?;
                let predicate = self.predicate()?;
                pairs.push((key, predicate));
                if !self.eat('&') {
                    break;
                }
            }
        }

        let literal = if self.eat('#') {
            self.expect('*')?;
            false
        } else {
            true
        };
        if self.peek().is_some() {
            return Err(self.error("trailing characters"));
        }

        let empty = if literal {
            RelationshipSignature::literal(rel_type, direction)
        } else {
            RelationshipSignature::wildcard(rel_type, direction)
        };
        Ok(pairs.into_iter().fold(empty, |sig, (key, predicate)| sig.with(key, predicate)))
    }

    fn predicate(&mut self) -> Result<ValuePredicate> {
        let first = self.operand()?;
        if self.eat_str("||") {
            let second = self.predicate()?;
            Ok(ValuePredicate::or(first, second))
        } else {
            Ok(first)
        }
    }

    fn operand(&mut self) -> Result<ValuePredicate> {
        if self.eat('(') {
            let inner = self.predicate()?;
            self.expect(')')?;
            return Ok(inner);
        }
        let built = match self.bump() {
            Some('=') => {
                if self.eat('*') {
                    return Ok(ValuePredicate::Any);
                }
                if self.eat_str("UNDEF") {
                    return Ok(ValuePredicate::Undefined);
                }
                ValuePredicate::equal_to(self.value()?)
            }
            Some('>') => ValuePredicate::greater_than(self.value()?),
            Some('<') => ValuePredicate::less_than(self.value()?),
            _ => return Err(self.error("expected predicate token")),
        };
        built.map_err(|e| self.error(e.to_string()))
    }

    fn value(&mut self) -> Result<Value> {
        let tag = self.bump().ok_or_else(|| self.error("missing value"))?;
        self.expect(':')?;
        match tag {
            'b' => match self.text()?.as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(self.error("bad boolean")),
            },
            'i' => self.text()?.parse().map(Value::Int).map_err(|_| self.error("bad integer")),
            'f' => self.text()?.parse().map(Value::Float).map_err(|_| self.error("bad float")),
            'c' => {
                let text = self.text()?;
                let mut chars = text.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => Ok(Value::Char(c)),
                    _ => Err(self.error("bad char")),
                }
            }
            's' => self.text().map(Value::String),
            'x' => {
                let text = self.text()?;
                if text.len() % 2 != 0 {
                    return Err(self.error("odd hex length"));
                }
                (0..text.len())
                    .step_by(2)
                    .map(|i| {
                        text.get(i..i + 2)
                            .and_then(|h| u8::from_str_radix(h, 16).ok())
                            .ok_or_else(|| self.error("bad hex"))
                    })
                    .collect::<Result<Vec<u8>>>()
                    .map(Value::Bytes)
            }
            'l' => {
                self.expect('[')?;
                let mut items = Vec::new();
                if !self.eat(']') {
                    loop {
                        items.push(self.value()?);
                        if self.eat(']') {
                            break;
                        }
                        self.expect(',')?;
                    }
                }
                Ok(Value::List(items))
            }
            other => Err(self.error(format!("unknown value tag '{other}'"))),
        }
    }
}
