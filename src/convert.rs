//! Marshaling between script values and Rust types.
//!
//! Every bridge operation that takes arguments goes through [`FromValue`];
//! a failed conversion surfaces as a marshaling error before any platform
//! or runtime primitive is touched.

use std::collections::HashMap;
use thiserror::Error;

use crate::value::{Value, ValueType};

/// Error that occurs during value conversion.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValueConversionError {
    /// Type mismatch during conversion.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// The expected type.
        expected: ValueType,
        /// The actual type.
        actual: ValueType,
    },

    /// Numeric value not representable in the target type.
    #[error("value out of range: {0}")]
    OutOfRange(String),

    /// Custom conversion error.
    #[error("{0}")]
    Custom(String),
}

impl ValueConversionError {
    /// Create a type mismatch error.
    pub fn type_mismatch(expected: ValueType, actual: ValueType) -> Self {
        Self::TypeMismatch { expected, actual }
    }

    /// Create an out of range error.
    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Self::OutOfRange(msg.into())
    }

    /// Create a custom error.
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

/// Trait for types that can be created from a [`Value`].
pub trait FromValue: Sized {
    /// Convert from a Value, returning an error if conversion fails.
    fn from_value(value: Value) -> Result<Self, ValueConversionError>;
}

/// Trait for types that can be converted into a [`Value`].
pub trait IntoValue {
    /// Convert into a Value.
    fn into_value(self) -> Value;
}

impl<T: Into<Value>> IntoValue for T {
    fn into_value(self) -> Value {
        self.into()
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValueConversionError> {
        Ok(value)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValueConversionError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(ValueConversionError::type_mismatch(
                ValueType::Bool,
                other.value_type(),
            )),
        }
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValueConversionError> {
        match value {
            Value::String(s) => Ok(s),
            other => Err(ValueConversionError::type_mismatch(
                ValueType::String,
                other.value_type(),
            )),
        }
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValueConversionError> {
        match value {
            Value::Float(f) => Ok(f),
            Value::Int(i) => Ok(i as f64),
            other => Err(ValueConversionError::type_mismatch(
                ValueType::Float,
                other.value_type(),
            )),
        }
    }
}

/// Read a script number as an exact integer.
///
/// Floats are accepted only when finite and integral; scripts routinely hand
/// `1024.0` where `1024` is meant, but `1.5` or `NaN` has no integer reading.
fn exact_integer(value: Value, target: &str) -> Result<i128, ValueConversionError> {
    match value {
        Value::Int(i) => Ok(i128::from(i)),
        Value::Float(f) if f.is_finite() && f.fract() == 0.0 => {
            // Beyond i128 there is nothing in range for any target we convert to.
            if f.abs() < 1.7e38 {
                Ok(f as i128)
            } else {
                Err(ValueConversionError::out_of_range(format!(
                    "{} is out of range for {}",
                    f, target
                )))
            }
        }
        Value::Float(f) => Err(ValueConversionError::out_of_range(format!(
            "{} is not an integer",
            f
        ))),
        other => Err(ValueConversionError::type_mismatch(
            ValueType::Int,
            other.value_type(),
        )),
    }
}

macro_rules! impl_from_value_int {
    ($($ty:ty),*) => {
        $(
            impl FromValue for $ty {
                fn from_value(value: Value) -> Result<Self, ValueConversionError> {
                    let n = exact_integer(value, stringify!($ty))?;
                    <$ty>::try_from(n).map_err(|_| {
                        ValueConversionError::out_of_range(format!(
                            "{} is out of range for {}",
                            n,
                            stringify!($ty)
                        ))
                    })
                }
            }
        )*
    };
}

impl_from_value_int!(i64, u32, u64, usize);

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ValueConversionError> {
        match value {
            Value::List(list) => list.into_iter().map(T::from_value).collect(),
            other => Err(ValueConversionError::type_mismatch(
                ValueType::List,
                other.value_type(),
            )),
        }
    }
}

impl<T: FromValue> FromValue for HashMap<String, T> {
    fn from_value(value: Value) -> Result<Self, ValueConversionError> {
        match value {
            Value::Map(map) => map
                .into_iter()
                .map(|(k, v)| T::from_value(v).map(|v| (k, v)))
                .collect(),
            other => Err(ValueConversionError::type_mismatch(
                ValueType::Map,
                other.value_type(),
            )),
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValueConversionError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

#[cfg(feature = "serde-support")]
mod serde_support {
    use super::*;
    use serde::{de::DeserializeOwned, Serialize};

    /// Convert a Value to a JSON value.
    pub fn value_to_json(value: &Value) -> serde_json::Value {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::List(l) => serde_json::Value::Array(l.iter().map(value_to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), value_to_json(v)))
                    .collect(),
            ),
        }
    }

    /// Convert a JSON value to a Value.
    pub fn json_to_value(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => n.as_f64().map(Value::Float).unwrap_or(Value::Null),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(arr) => {
                Value::List(arr.into_iter().map(json_to_value).collect())
            }
            serde_json::Value::Object(obj) => Value::Map(
                obj.into_iter()
                    .map(|(k, v)| (k, json_to_value(v)))
                    .collect(),
            ),
        }
    }

    /// Deserialize a Value into a type implementing DeserializeOwned.
    pub fn from_value_serde<T: DeserializeOwned>(value: Value) -> Result<T, ValueConversionError> {
        serde_json::from_value(value_to_json(&value))
            .map_err(|e| ValueConversionError::custom(e.to_string()))
    }

    /// Serialize a type implementing Serialize into a Value.
    pub fn to_value_serde<T: Serialize>(value: &T) -> Result<Value, ValueConversionError> {
        let json =
            serde_json::to_value(value).map_err(|e| ValueConversionError::custom(e.to_string()))?;
        Ok(json_to_value(json))
    }

    impl Value {
        /// Convert to JSON string.
        pub fn to_json_string(&self) -> String {
            serde_json::to_string(&value_to_json(self)).unwrap_or_else(|_| "null".to_string())
        }
    }
}

#[cfg(feature = "serde-support")]
pub use serde_support::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u32_accepts_integral_numbers() {
        assert_eq!(u32::from_value(Value::Int(0)).unwrap(), 0);
        assert_eq!(u32::from_value(Value::Int(65536)).unwrap(), 65536);
        assert_eq!(u32::from_value(Value::Float(1024.0)).unwrap(), 1024);
        assert_eq!(
            u32::from_value(Value::Int(i64::from(u32::MAX))).unwrap(),
            u32::MAX
        );
    }

    #[test]
    fn test_u32_rejects_unrepresentable() {
        for bad in [
            Value::Int(-1),
            Value::Int(i64::from(u32::MAX) + 1),
            Value::Float(1.5),
            Value::Float(f64::NAN),
            Value::Float(f64::INFINITY),
            Value::Float(-0.5),
            Value::Float(1e300),
        ] {
            let err = u32::from_value(bad.clone()).unwrap_err();
            assert!(
                matches!(err, ValueConversionError::OutOfRange(_)),
                "{:?} gave {:?}",
                bad,
                err
            );
        }

        let err = u32::from_value(Value::String("12".into())).unwrap_err();
        assert!(matches!(err, ValueConversionError::TypeMismatch { .. }));
    }

    #[test]
    fn test_string_and_collections() {
        assert_eq!(
            String::from_value(Value::String("main.fsx".into())).unwrap(),
            "main.fsx"
        );
        let err = String::from_value(Value::Int(1)).unwrap_err();
        assert_eq!(err.to_string(), "type mismatch: expected string, got int");

        let list = Value::List(vec![Value::Int(1), Value::Float(2.0)]);
        assert_eq!(Vec::<u64>::from_value(list).unwrap(), vec![1, 2]);

        let opt: Option<u32> = Option::from_value(Value::Null).unwrap();
        assert_eq!(opt, None);
    }

    #[cfg(feature = "serde-support")]
    mod serde_tests {
        use super::*;
        use serde::{Deserialize, Serialize};

        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Limits {
            heap: u32,
            stack: Option<u32>,
        }

        #[test]
        fn test_serde_struct_to_map() {
            let value = to_value_serde(&Limits {
                heap: 1024,
                stack: None,
            })
            .unwrap();
            let map = value.as_map().unwrap();
            assert_eq!(map.get("heap"), Some(&Value::Int(1024)));
            assert_eq!(map.get("stack"), Some(&Value::Null));

            let back: Limits = from_value_serde(value).unwrap();
            assert_eq!(back.heap, 1024);
        }

        #[test]
        fn test_byte_fields_become_integer_lists() {
            #[derive(Serialize)]
            struct Digest {
                sum: Vec<u8>,
            }

            let value = to_value_serde(&Digest {
                sum: vec![0xde, 0xad],
            })
            .unwrap();
            assert_eq!(
                value.as_map().and_then(|m| m.get("sum")),
                Some(&Value::List(vec![Value::Int(222), Value::Int(173)]))
            );
            assert_eq!(value.to_json_string(), r#"{"sum":[222,173]}"#);
        }
    }
}
