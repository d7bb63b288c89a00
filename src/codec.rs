//! Wire (de)serialization for shared variables
//!
//! A [`LineCodec`] turns values into protocol lines and back, and decides
//! which inbound lines belong to its variable. Scheme implementations
//! compose codecs: a framing codec (e.g. the Yamaha `@ZONE:FUNCTION=` frame
//! or a Denon command prefix) wraps a payload codec via [`ChildCodec`].

use crate::error::{AvrError, Result};
use crate::value::Value;
use std::sync::Arc;

/// Wire format of one shared variable
pub trait LineCodec: Send + Sync {
    /// Whether `line` shall be parsed with this codec
    fn matches(&self, line: &str) -> bool;

    /// The command that polls this variable, if it can be polled
    fn poll_cmd(&self) -> Option<String> {
        None
    }

    /// Transform a value into protocol lines
    fn serialize(&self, value: &Value) -> Vec<String>;

    /// Transform accumulated protocol data back into a value
    fn unserialize(&self, data: &[String]) -> Result<Value>;

    /// Whether `buf` contains all parts and can be unserialized
    fn is_complete(&self, buf: &[String]) -> bool {
        !buf.is_empty()
    }
}

fn decode_err(payload: &[String]) -> AvrError {
    AvrError::Decode {
        id: String::new(),
        payload: payload.join("|"),
    }
}

/// Plain integer payload
pub struct IntCodec;

impl LineCodec for IntCodec {
    fn matches(&self, line: &str) -> bool {
        line.trim().parse::<i64>().is_ok()
    }

    fn serialize(&self, value: &Value) -> Vec<String> {
        match value {
            Value::Int(i) => vec![i.to_string()],
            v => vec![v.to_string()],
        }
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        let s = data.first().ok_or_else(|| decode_err(data))?;
        s.trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| decode_err(data))
    }
}

/// Decimal payload rendered with a fixed number of fraction digits
pub struct DecimalCodec {
    pub decimals: usize,
}

impl LineCodec for DecimalCodec {
    fn matches(&self, line: &str) -> bool {
        line.trim().parse::<f64>().is_ok()
    }

    fn serialize(&self, value: &Value) -> Vec<String> {
        match value {
            Value::Decimal(d) => vec![format!("{:.*}", self.decimals, d)],
            Value::Int(i) => vec![format!("{:.*}", self.decimals, *i as f64)],
            v => vec![v.to_string()],
        }
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        let s = data.first().ok_or_else(|| decode_err(data))?;
        s.trim()
            .parse::<f64>()
            .map(Value::Decimal)
            .map_err(|_| decode_err(data))
    }
}

/// Payload translated through a wire-token table
///
/// `translation` maps wire tokens to the values presented upstream, e.g.
/// `("On", true)` for a boolean or `("HDMI1", "HDMI 1")` for a select.
pub struct TranslationCodec {
    translation: Vec<(String, Value)>,
}

impl TranslationCodec {
    pub fn new<W, V>(pairs: impl IntoIterator<Item = (W, V)>) -> Self
    where
        W: Into<String>,
        V: Into<Value>,
    {
        Self {
            translation: pairs
                .into_iter()
                .map(|(w, v)| (w.into(), v.into()))
                .collect(),
        }
    }

    /// The upstream-facing option list, for `VarKind::Select`
    pub fn options(&self) -> Vec<String> {
        self.translation
            .iter()
            .filter_map(|(_, v)| v.as_str().map(str::to_string))
            .collect()
    }
}

impl LineCodec for TranslationCodec {
    fn matches(&self, line: &str) -> bool {
        self.translation.iter().any(|(w, _)| w == line)
    }

    fn serialize(&self, value: &Value) -> Vec<String> {
        self.translation
            .iter()
            .find(|(_, v)| v == value)
            .map(|(w, _)| vec![w.clone()])
            .unwrap_or_else(|| vec![value.to_string()])
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        let s = data.first().ok_or_else(|| decode_err(data))?;
        self.translation
            .iter()
            .find(|(w, _)| w == s)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| decode_err(data))
    }
}

/// Framing codec: `<prefix><payload>` on one line, polled with `<prefix>?`
///
/// `exclude` lists longer commands sharing the prefix that must not be
/// claimed, e.g. `MVMAX` under the Denon `MV` prefix.
pub struct PrefixCodec {
    pub prefix: String,
    pub exclude: Vec<String>,
}

impl PrefixCodec {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            exclude: Vec::new(),
        }
    }

    pub fn exclude(mut self, prefix: impl Into<String>) -> Self {
        self.exclude.push(prefix.into());
        self
    }
}

impl LineCodec for PrefixCodec {
    fn matches(&self, line: &str) -> bool {
        line.starts_with(&self.prefix)
            && line != self.poll_cmd().as_deref().unwrap_or_default()
            && !self.exclude.iter().any(|e| line.starts_with(e.as_str()))
    }

    fn poll_cmd(&self) -> Option<String> {
        Some(format!("{}?", self.prefix))
    }

    fn serialize(&self, value: &Value) -> Vec<String> {
        vec![format!("{}{}", self.prefix, value)]
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        let s = data.first().ok_or_else(|| decode_err(data))?;
        s.strip_prefix(&self.prefix)
            .map(|p| Value::Str(p.trim_start().to_string()))
            .ok_or_else(|| decode_err(data))
    }
}

/// Codec for block parents: pollable, but carries no value of its own
pub struct PollCodec {
    pub poll: String,
}

impl LineCodec for PollCodec {
    fn matches(&self, _line: &str) -> bool {
        false
    }

    fn poll_cmd(&self) -> Option<String> {
        Some(self.poll.clone())
    }

    fn serialize(&self, _value: &Value) -> Vec<String> {
        Vec::new()
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        Err(decode_err(data))
    }
}

/// Composite codec: child encoding nested inside parent framing
///
/// The parent frames a field out of a line (or run of lines); the child
/// picks its value out of the parent-decoded payload.
pub struct ChildCodec {
    parent: Arc<dyn LineCodec>,
    inner: Arc<dyn LineCodec>,
}

impl ChildCodec {
    pub fn new(parent: Arc<dyn LineCodec>, inner: Arc<dyn LineCodec>) -> Self {
        Self { parent, inner }
    }

    fn payload(&self, line: &str) -> Option<String> {
        let decoded = self.parent.unserialize(&[line.to_string()]).ok()?;
        decoded.as_str().map(str::to_string)
    }
}

impl LineCodec for ChildCodec {
    fn matches(&self, line: &str) -> bool {
        self.parent.matches(line)
            && self
                .payload(line)
                .is_some_and(|p| self.inner.matches(&p))
    }

    fn poll_cmd(&self) -> Option<String> {
        self.parent.poll_cmd()
    }

    fn serialize(&self, value: &Value) -> Vec<String> {
        self.inner
            .serialize(value)
            .into_iter()
            .flat_map(|piece| self.parent.serialize(&Value::Str(piece)))
            .collect()
    }

    fn unserialize(&self, data: &[String]) -> Result<Value> {
        // Group data into the smallest chunks the parent calls complete,
        // decode each chunk through the parent, then hand the payload list
        // to the inner codec. A leftover tail is a decode failure.
        let mut buf: Vec<String> = Vec::new();
        let mut payloads: Vec<String> = Vec::new();
        for item in data {
            buf.push(item.clone());
            if self.parent.is_complete(&buf) {
                let decoded = self.parent.unserialize(&buf)?;
                payloads.push(decoded.as_str().unwrap_or_default().to_string());
                buf.clear();
            }
        }
        if !buf.is_empty() {
            return Err(decode_err(&buf));
        }
        self.inner.unserialize(&payloads)
    }

    fn is_complete(&self, buf: &[String]) -> bool {
        self.parent.is_complete(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yamaha_power() -> ChildCodec {
        let frame = Arc::new(crate::schemes::yamaha::FunctionFrame::new("MAIN", "PWR"));
        let inner = Arc::new(TranslationCodec::new([("On", true), ("Standby", false)]));
        ChildCodec::new(frame, inner)
    }

    #[test]
    fn translation_round_trip() {
        let c = TranslationCodec::new([("ON", true), ("STANDBY", false)]);
        for v in [true, false] {
            let wire = c.serialize(&Value::Bool(v));
            assert_eq!(c.unserialize(&wire).unwrap(), Value::Bool(v));
        }
    }

    #[test]
    fn prefix_round_trip_and_poll() {
        let c = PrefixCodec::new("MV").exclude("MVMAX");
        assert_eq!(c.poll_cmd().as_deref(), Some("MV?"));
        assert!(c.matches("MV50"));
        assert!(!c.matches("MV?"));
        assert!(!c.matches("MVMAX 86"));
        assert_eq!(
            c.unserialize(&["MV50".to_string()]).unwrap(),
            Value::Str("50".into())
        );
    }

    #[test]
    fn child_serializes_through_parent() {
        let c = yamaha_power();
        assert_eq!(c.serialize(&Value::Bool(true)), vec!["@MAIN:PWR=On"]);
        assert_eq!(c.poll_cmd().as_deref(), Some("@MAIN:PWR=?"));
    }

    #[test]
    fn child_matches_requires_both_layers() {
        let c = yamaha_power();
        assert!(c.matches("@MAIN:PWR=On"));
        // Frame matches but payload is not a known token
        assert!(!c.matches("@MAIN:PWR=?"));
        assert!(!c.matches("@MAIN:VOL=-20.0"));
    }

    #[test]
    fn child_unserialize_rejects_incomplete_tail() {
        let c = yamaha_power();
        assert_eq!(
            c.unserialize(&["@MAIN:PWR=Standby".to_string()]).unwrap(),
            Value::Bool(false)
        );
        assert!(c.unserialize(&["no frame here".to_string()]).is_err());
    }

    #[test]
    fn decimal_fixed_width() {
        let c = DecimalCodec { decimals: 1 };
        assert_eq!(c.serialize(&Value::Decimal(-20.5)), vec!["-20.5"]);
        assert_eq!(c.serialize(&Value::Decimal(3.0)), vec!["3.0"]);
        assert_eq!(
            c.unserialize(&["-20.5".to_string()]).unwrap(),
            Value::Decimal(-20.5)
        );
    }
}
