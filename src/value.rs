use crate::error::{AvrError, Result};
use std::fmt;

/// A shared variable value
///
/// `None`/unset is not a value; an absent value is represented by
/// `Option<Value>` on the variable itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Decimal(f64),
    Str(String),
}

impl Value {
    /// Name of the value's type, for diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Decimal(_) => "decimal",
            Value::Str(_) => "str",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            Value::Decimal(d) => Some(*d),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Decimal(d) => write!(f, "{}", d),
            Value::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Decimal(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

/// Declared type and bounds of a shared variable
#[derive(Debug, Clone, PartialEq)]
pub enum VarKind {
    Bool,
    Int { min: i64, max: i64 },
    Decimal { min: f64, max: f64, step: f64 },
    Select { options: Vec<String> },
}

impl VarKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            VarKind::Bool => "bool",
            VarKind::Int { .. } => "int",
            VarKind::Decimal { .. } => "decimal",
            VarKind::Select { .. } => "str",
        }
    }

    /// Type-check a value against the kind, coercing `Int` into `Decimal`
    /// where a decimal is declared.
    pub fn coerce(&self, id: &str, value: Value) -> Result<Value> {
        let value = match (self, value) {
            (VarKind::Decimal { .. }, Value::Int(i)) => Value::Decimal(i as f64),
            (_, v) => v,
        };
        let ok = matches!(
            (self, &value),
            (VarKind::Bool, Value::Bool(_))
                | (VarKind::Int { .. }, Value::Int(_))
                | (VarKind::Decimal { .. }, Value::Decimal(_))
                | (VarKind::Select { .. }, Value::Str(_))
        );
        if ok {
            Ok(value)
        } else {
            Err(AvrError::TypeMismatch {
                id: id.to_string(),
                expected: self.type_name(),
                got: format!("{:?}", value),
            })
        }
    }

    /// Domain-check a (type-correct) value against range or options.
    pub fn check_domain(&self, id: &str, value: &Value) -> Result<()> {
        let violation = match (self, value) {
            (VarKind::Int { min, max }, Value::Int(i)) if i < min || i > max => {
                Some(format!("{} not in [{}, {}]", i, min, max))
            }
            (VarKind::Decimal { min, max, .. }, Value::Decimal(d)) if d < min || d > max => {
                Some(format!("{} not in [{}, {}]", d, min, max))
            }
            (VarKind::Select { options }, Value::Str(s)) if !options.iter().any(|o| o == s) => {
                Some(format!("{:?} not one of {:?}", s, options))
            }
            _ => None,
        };
        match violation {
            Some(detail) => Err(AvrError::Domain {
                id: id.to_string(),
                detail,
            }),
            None => Ok(()),
        }
    }

    /// Fabricate a plausible value for the dummy server: numeric midpoint,
    /// first option, false.
    pub fn dummy_value(&self) -> Value {
        match self {
            VarKind::Bool => Value::Bool(false),
            VarKind::Int { min, max } => Value::Int((min + max).div_euclid(2) + (min + max).rem_euclid(2).signum()),
            VarKind::Decimal { min, max, .. } => Value::Decimal((min + max) / 2.0),
            VarKind::Select { options } => {
                Value::Str(options.first().cloned().unwrap_or_else(|| "?".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coerce_accepts_matching_types() {
        let kind = VarKind::Int { min: 0, max: 99 };
        assert_eq!(kind.coerce("v", Value::Int(5)).unwrap(), Value::Int(5));
        assert!(kind.coerce("v", Value::Str("5".into())).is_err());
    }

    #[test]
    fn coerce_widens_int_to_decimal() {
        let kind = VarKind::Decimal {
            min: -80.5,
            max: 16.5,
            step: 0.5,
        };
        assert_eq!(kind.coerce("v", Value::Int(3)).unwrap(), Value::Decimal(3.0));
    }

    #[test]
    fn domain_check_range_and_options() {
        let kind = VarKind::Int { min: 0, max: 99 };
        assert!(kind.check_domain("v", &Value::Int(50)).is_ok());
        assert!(kind.check_domain("v", &Value::Int(100)).is_err());

        let sel = VarKind::Select {
            options: vec!["HDMI 1".into(), "Tuner".into()],
        };
        assert!(sel.check_domain("v", &Value::Str("Tuner".into())).is_ok());
        assert!(matches!(
            sel.check_domain("v", &Value::Str("Tape".into())),
            Err(AvrError::Domain { .. })
        ));
    }

    #[test]
    fn dummy_values() {
        assert_eq!(VarKind::Bool.dummy_value(), Value::Bool(false));
        assert_eq!(
            VarKind::Int { min: 0, max: 99 }.dummy_value(),
            Value::Int(50)
        );
        assert_eq!(
            VarKind::Decimal {
                min: -80.0,
                max: 16.0,
                step: 0.5
            }
            .dummy_value(),
            Value::Decimal(-32.0)
        );
        assert_eq!(
            VarKind::Select {
                options: vec!["a".into(), "b".into()]
            }
            .dummy_value(),
            Value::Str("a".into())
        );
    }
}
