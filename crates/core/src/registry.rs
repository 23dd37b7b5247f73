use std::collections::HashMap;
use std::time::Duration;

use crate::error::ValidationError;
use crate::value::Value;

/// Structural constraint on attribute values.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Any,
    Text { max_len: usize },
    Integer { min: i64, max: i64 },
    Float { min: f64, max: f64 },
    Boolean,
    /// `#rrggbb` hex colour.
    Color,
    Bytes { max_len: usize },
    /// Every listed field must be present and valid; extra fields are allowed.
    Record(Vec<(String, Shape)>),
}

impl Shape {
    fn expected(&self) -> &'static str {
        match self {
            Shape::Any => "any",
            Shape::Text { .. } | Shape::Color => "text",
            Shape::Integer { .. } => "integer",
            Shape::Float { .. } => "float",
            Shape::Boolean => "boolean",
            Shape::Bytes { .. } => "bytes",
            Shape::Record(_) => "record",
        }
    }

    pub fn check(&self, attribute: &str, value: &Value) -> Result<(), ValidationError> {
        let wrong_type = || ValidationError::WrongType {
            attribute: attribute.to_string(),
            expected: self.expected(),
            actual: value.type_name(),
        };

        match (self, value) {
            (Shape::Any, _) => Ok(()),
            (Shape::Text { max_len }, Value::Text(s)) => {
                let len = s.chars().count();
                if len > *max_len {
                    return Err(ValidationError::TooLong {
                        attribute: attribute.to_string(),
                        len,
                        max: *max_len,
                    });
                }
                Ok(())
            }
            (Shape::Integer { min, max }, Value::Integer(n)) => {
                if n < min || n > max {
                    return Err(ValidationError::OutOfRange {
                        attribute: attribute.to_string(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                Ok(())
            }
            (Shape::Float { min, max }, Value::Float(_) | Value::Integer(_)) => {
                let n = value.as_float().ok_or_else(wrong_type)?;
                // NaN fails both comparisons, so test for inclusion.
                if !(n >= *min && n <= *max) {
                    return Err(ValidationError::OutOfRange {
                        attribute: attribute.to_string(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                }
                Ok(())
            }
            (Shape::Boolean, Value::Boolean(_)) => Ok(()),
            (Shape::Color, Value::Text(s)) => {
                let hex = s.strip_prefix('#').unwrap_or("");
                if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ValidationError::BadColor {
                        attribute: attribute.to_string(),
                        value: s.clone(),
                    });
                }
                Ok(())
            }
            (Shape::Bytes { max_len }, Value::Bytes(b)) => {
                if b.len() > *max_len {
                    return Err(ValidationError::TooLong {
                        attribute: attribute.to_string(),
                        len: b.len(),
                        max: *max_len,
                    });
                }
                Ok(())
            }
            (Shape::Record(fields), Value::Record(actual)) => {
                for (name, shape) in fields {
                    let field = actual.get(name).ok_or_else(|| ValidationError::MissingField {
                        attribute: attribute.to_string(),
                        field: name.clone(),
                    })?;
                    shape.check(&format!("{attribute}.{name}"), field)?;
                }
                Ok(())
            }
            _ => Err(wrong_type()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttributeDescriptor {
    pub name: String,
    pub shape: Shape,
    pub nullable: bool,
    /// Shown by the resolver when neither memory nor cache holds a value.
    pub default: Value,
    /// Quiet period before an auto-save commit. `None` uses the engine default.
    pub debounce: Option<Duration>,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, shape: Shape, default: Value) -> Self {
        Self {
            name: name.into(),
            shape,
            nullable: false,
            default,
            debounce: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = Some(debounce);
        self
    }

    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if value.is_null() && self.nullable {
            return Ok(());
        }
        self.shape.check(&self.name, value)
    }
}

/// Every synchronizable attribute, registered once. Values are validated
/// before they may enter a draft.
#[derive(Debug, Clone, Default)]
pub struct AttributeRegistry {
    descriptors: HashMap<String, AttributeDescriptor>,
}

impl AttributeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, replacing any previous one with the same name.
    pub fn register(&mut self, descriptor: AttributeDescriptor) -> &mut Self {
        self.descriptors.insert(descriptor.name.clone(), descriptor);
        self
    }

    pub fn with(mut self, descriptor: AttributeDescriptor) -> Self {
        self.register(descriptor);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.descriptors.get(name)
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cover_position() -> AttributeDescriptor {
        AttributeDescriptor::new(
            "coverPosition",
            Shape::Record(vec![
                ("x".into(), Shape::Float { min: 0.0, max: 100.0 }),
                ("y".into(), Shape::Float { min: 0.0, max: 100.0 }),
            ]),
            Value::point(50.0, 50.0),
        )
    }

    #[test]
    fn record_fields_are_checked_recursively() {
        let desc = cover_position();
        assert!(desc.validate(&Value::point(30.0, 70.0)).is_ok());

        let err = desc.validate(&Value::point(30.0, 130.0)).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutOfRange { ref attribute, .. } if attribute == "coverPosition.y"
        ));
    }

    #[test]
    fn missing_record_field_is_reported() {
        let desc = cover_position();
        let mut fields = std::collections::BTreeMap::new();
        fields.insert("x".to_string(), Value::Float(10.0));
        let err = desc.validate(&Value::Record(fields)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::MissingField {
                attribute: "coverPosition".into(),
                field: "y".into()
            }
        );
    }

    #[test]
    fn nan_is_out_of_range() {
        let shape = Shape::Float { min: 0.0, max: 1.0 };
        assert!(shape.check("opacity", &Value::Float(f64::NAN)).is_err());
    }

    #[test]
    fn color_requires_six_hex_digits() {
        let shape = Shape::Color;
        assert!(shape.check("accent", &Value::from("#1a2B3c")).is_ok());
        assert!(shape.check("accent", &Value::from("1a2b3c")).is_err());
        assert!(shape.check("accent", &Value::from("#1a2b3")).is_err());
        assert!(shape.check("accent", &Value::from("#zzzzzz")).is_err());
    }

    #[test]
    fn text_length_counts_chars() {
        let shape = Shape::Text { max_len: 3 };
        assert!(shape.check("bio", &Value::from("héé")).is_ok());
        assert!(matches!(
            shape.check("bio", &Value::from("four")),
            Err(ValidationError::TooLong { len: 4, max: 3, .. })
        ));
    }

    #[test]
    fn null_only_when_nullable() {
        let desc = AttributeDescriptor::new("avatar", Shape::Bytes { max_len: 16 }, Value::Null);
        assert!(desc.validate(&Value::Null).is_err());
        assert!(desc.nullable().validate(&Value::Null).is_ok());
    }

    #[test]
    fn wrong_type_names_both_sides() {
        let err = Shape::Boolean.check("public", &Value::Integer(1)).unwrap_err();
        assert_eq!(
            err,
            ValidationError::WrongType {
                attribute: "public".into(),
                expected: "boolean",
                actual: "integer"
            }
        );
    }
}
