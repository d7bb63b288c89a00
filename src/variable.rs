//! The shared variable model
//!
//! A [`SharedVar`] is one typed, named unit of receiver state: it owns the
//! cached value and its set/unset lifecycle, the receive buffer for
//! multi-line composites, and the send debounce. Wire knowledge lives in
//! the attached [`LineCodec`](crate::codec::LineCodec).

use crate::codec::LineCodec;
use crate::error::{AvrError, Result};
use crate::value::{Value, VarKind};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Identical payloads sent within this window are suppressed
pub const DEBOUNCE: Duration = Duration::from_secs(1);

/// Who may write the variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Polled and settable from the client
    ReadWrite,
    /// Server-to-client only; `remote_set` always errors
    ReadOnly,
    /// Client-to-server only; carries no cached value on the client
    WriteOnly,
    /// Fixed value, never transmitted
    Constant,
}

/// Static declaration of a shared variable
pub struct VarDef {
    pub id: String,
    pub name: String,
    pub category: String,
    pub kind: VarKind,
    pub access: Access,
    pub codec: Arc<dyn LineCodec>,
    /// Applied on the client when a poll goes unanswered
    pub default_value: Option<Value>,
    /// Fabricated by the dummy server; falls back to the kind's midpoint
    pub dummy_value: Option<Value>,
    /// Block this variable belongs to, if any
    pub parent: Option<String>,
    /// Marks a block parent: the line terminating the multi-line burst
    pub sentinel: Option<String>,
    /// Children of a block parent, in emission order
    pub children: Vec<String>,
}

impl VarDef {
    pub fn new(id: impl Into<String>, kind: VarKind, codec: Arc<dyn LineCodec>) -> Self {
        let id = id.into();
        let name = display_name(&id);
        Self {
            id,
            name,
            category: "Misc".to_string(),
            kind,
            access: Access::ReadWrite,
            codec,
            default_value: None,
            dummy_value: None,
            parent: None,
            sentinel: None,
            children: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn access(mut self, access: Access) -> Self {
        self.access = access;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn dummy_value(mut self, value: impl Into<Value>) -> Self {
        self.dummy_value = Some(value.into());
        self
    }

    pub fn parent(mut self, id: impl Into<String>) -> Self {
        self.parent = Some(id.into());
        self
    }

    /// Declare this variable a block parent terminated by `sentinel`,
    /// grouping `children`.
    pub fn block(
        mut self,
        sentinel: impl Into<String>,
        children: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        self.sentinel = Some(sentinel.into());
        self.children = children.into_iter().map(str::to_string).collect();
        self
    }

    pub fn is_block(&self) -> bool {
        self.sentinel.is_some()
    }
}

/// Derive a display label from a variable id: `main_power` -> `Main Power`
fn display_name(id: &str) -> String {
    id.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// What a `set()` did, for event emission
pub struct SetOutcome {
    pub value: Value,
    /// Value differs from the previous one
    pub changed: bool,
    /// Transitioned from unset to set
    pub first_set: bool,
}

/// A shared variable and its runtime state
pub struct SharedVar {
    pub def: VarDef,
    value: Option<Value>,
    buffer: Vec<String>,
    last_sent: Option<(Vec<String>, Instant)>,
    debounce: Duration,
    /// Deadline after which `default_value` is applied if still unset
    pub default_deadline: Option<Instant>,
    /// Reentrancy guard for block resend
    pub resending: bool,
}

impl SharedVar {
    pub fn new(def: VarDef) -> Self {
        // Constants are born set and never change
        let value = match def.access {
            Access::Constant => def.default_value.clone(),
            _ => None,
        };
        Self {
            def,
            value,
            buffer: Vec::new(),
            last_sent: None,
            debounce: DEBOUNCE,
            default_deadline: None,
            resending: false,
        }
    }

    #[cfg(test)]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Whether the variable counts as available for pending calls.
    ///
    /// Write-only variables and block parents hold no independent value and
    /// are always available.
    pub fn is_set(&self) -> bool {
        if self.def.is_block() || self.def.access == Access::WriteOnly {
            return true;
        }
        self.value.is_some()
    }

    /// Validate and store a value
    ///
    /// Constants ignore writes. The type check always applies; the stored
    /// value is never a None-equivalent.
    pub fn set(&mut self, value: Value) -> Result<Option<SetOutcome>> {
        if self.def.access == Access::Constant {
            return Ok(None);
        }
        let value = self.def.kind.coerce(&self.def.id, value)?;
        let previous = self.value.replace(value.clone());
        self.default_deadline = None;
        Ok(Some(SetOutcome {
            changed: previous.as_ref() != Some(&value),
            first_set: previous.is_none(),
            value,
        }))
    }

    /// Clear the cached value; stale state is never presented as live
    pub fn unset(&mut self) -> bool {
        self.buffer.clear();
        self.default_deadline = None;
        self.last_sent = None;
        if self.def.access == Access::Constant {
            return false;
        }
        self.value.take().is_some()
    }

    /// Append inbound data and decode once complete.
    ///
    /// Returns the decoded value, or `None` while the buffer is incomplete
    /// or when decoding fails (logged, never propagated — decode errors
    /// must not crash the dispatch loop). Servers require complete commands
    /// per line, so `discard_partial` drops an incomplete buffer instead of
    /// accumulating it.
    pub fn consume(&mut self, line: &str, discard_partial: bool) -> Option<Value> {
        self.buffer.push(line.to_string());
        if !self.def.codec.is_complete(&self.buffer) {
            if discard_partial {
                self.buffer.clear();
            }
            return None;
        }
        let data = std::mem::take(&mut self.buffer);
        // An inbound confirmation re-arms the send debounce
        self.last_sent = None;
        match self.def.codec.unserialize(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(id = %self.def.id, payload = ?data, "decode error: {}", e);
                None
            }
        }
    }

    /// Validate a value for transmission and serialize it.
    ///
    /// Type errors always raise; domain errors (range/options) raise unless
    /// `force`; read-only and constant variables always refuse. Returns
    /// `None` when the identical payload was sent within the debounce
    /// window.
    pub fn encode_remote_set(&mut self, value: Value, force: bool) -> Result<Option<Vec<String>>> {
        match self.def.access {
            Access::ReadOnly | Access::Constant => {
                return Err(AvrError::ReadOnly(self.def.id.clone()))
            }
            _ => {}
        }
        let value = self.def.kind.coerce(&self.def.id, value)?;
        if !force {
            self.def.kind.check_domain(&self.def.id, &value)?;
        }
        let serialized = self.def.codec.serialize(&value);
        if self.debounce_blocked(&serialized) {
            return Ok(None);
        }
        Ok(Some(serialized))
    }

    /// Re-emit the last known value's wire representation
    pub fn encode_resend(&self) -> Option<Vec<String>> {
        if self.def.access == Access::WriteOnly {
            return None;
        }
        self.value.as_ref().map(|v| self.def.codec.serialize(v))
    }

    fn debounce_blocked(&mut self, serialized: &[String]) -> bool {
        if let Some((last, at)) = &self.last_sent {
            if last == serialized && at.elapsed() < self.debounce {
                return true;
            }
        }
        self.last_sent = Some((serialized.to_vec(), Instant::now()));
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PrefixCodec, TranslationCodec};

    fn power_var() -> SharedVar {
        let codec = Arc::new(TranslationCodec::new([("PWON", true), ("PWSTANDBY", false)]));
        SharedVar::new(VarDef::new("power", VarKind::Bool, codec))
    }

    #[test]
    fn set_outcome_semantics() {
        let mut var = power_var();
        assert!(!var.is_set());

        let o = var.set(Value::Bool(true)).unwrap().unwrap();
        assert!(o.first_set && o.changed);
        assert_eq!(var.value(), Some(&Value::Bool(true)));

        // Second identical set: neither a change nor a first set
        let o = var.set(Value::Bool(true)).unwrap().unwrap();
        assert!(!o.first_set && !o.changed);

        let o = var.set(Value::Bool(false)).unwrap().unwrap();
        assert!(!o.first_set && o.changed);
    }

    #[test]
    fn set_rejects_wrong_type() {
        let mut var = power_var();
        assert!(matches!(
            var.set(Value::Int(1)),
            Err(AvrError::TypeMismatch { .. })
        ));
        assert!(!var.is_set());
    }

    #[test]
    fn unset_then_set_is_first_set_again() {
        let mut var = power_var();
        var.set(Value::Bool(true)).unwrap();
        assert!(var.unset());
        assert!(!var.is_set());
        let o = var.set(Value::Bool(true)).unwrap().unwrap();
        assert!(o.first_set);
    }

    #[test]
    fn consume_decodes_and_swallows_errors() {
        let mut var = power_var();
        assert_eq!(var.consume("PWON", false), Some(Value::Bool(true)));
        // Garbage is logged and swallowed
        assert_eq!(var.consume("PWGARBAGE", false), None);
    }

    #[test]
    fn remote_set_debounces_identical_payloads() {
        let mut var = power_var().with_debounce(Duration::from_millis(50));
        let first = var.encode_remote_set(Value::Bool(true), false).unwrap();
        assert_eq!(first, Some(vec!["PWON".to_string()]));
        // Identical payload inside the window is suppressed
        assert_eq!(var.encode_remote_set(Value::Bool(true), false).unwrap(), None);
        // A different payload goes out
        assert!(var
            .encode_remote_set(Value::Bool(false), false)
            .unwrap()
            .is_some());

        std::thread::sleep(Duration::from_millis(60));
        assert!(var
            .encode_remote_set(Value::Bool(false), false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn inbound_consume_resets_debounce() {
        let mut var = power_var();
        var.encode_remote_set(Value::Bool(true), false).unwrap();
        assert_eq!(var.encode_remote_set(Value::Bool(true), false).unwrap(), None);
        var.consume("PWON", false);
        assert!(var
            .encode_remote_set(Value::Bool(true), false)
            .unwrap()
            .is_some());
    }

    #[test]
    fn domain_error_bypassed_by_force_only() {
        let codec = Arc::new(PrefixCodec::new("MV"));
        let mut var = SharedVar::new(VarDef::new(
            "volume",
            VarKind::Select {
                options: vec!["a".into()],
            },
            codec,
        ));
        assert!(matches!(
            var.encode_remote_set(Value::Str("b".into()), false),
            Err(AvrError::Domain { .. })
        ));
        assert!(var
            .encode_remote_set(Value::Str("b".into()), true)
            .unwrap()
            .is_some());
        // Type check is never bypassed
        assert!(matches!(
            var.encode_remote_set(Value::Int(1), true),
            Err(AvrError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn read_only_refuses_remote_set() {
        let codec = Arc::new(TranslationCodec::new([("X", true)]));
        let mut var = SharedVar::new(
            VarDef::new("model", VarKind::Bool, codec).access(Access::ReadOnly),
        );
        assert!(matches!(
            var.encode_remote_set(Value::Bool(true), false),
            Err(AvrError::ReadOnly(_))
        ));
    }

    #[test]
    fn display_name_from_id() {
        assert_eq!(display_name("main_power"), "Main Power");
        assert_eq!(display_name("volume"), "Volume");
    }
}
