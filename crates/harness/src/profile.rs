use std::time::Duration;

use attrsync_core::{AttributeDescriptor, AttributeRegistry, Shape, Value};

pub const COVER_POSITION: &str = "coverPosition";
pub const ACCENT_COLOR: &str = "accentColor";
pub const BIO: &str = "bio";
pub const AVATAR: &str = "avatar";
pub const DISPLAY_NAME: &str = "displayName";

/// The attributes a profile page synchronizes.
pub fn profile_registry() -> AttributeRegistry {
    AttributeRegistry::new()
        .with(AttributeDescriptor::new(
            COVER_POSITION,
            Shape::Record(vec![
                ("x".into(), Shape::Float { min: 0.0, max: 100.0 }),
                ("y".into(), Shape::Float { min: 0.0, max: 100.0 }),
            ]),
            Value::point(50.0, 50.0),
        ))
        .with(AttributeDescriptor::new(ACCENT_COLOR, Shape::Color, Value::from("#3b82f6")))
        .with(
            AttributeDescriptor::new(BIO, Shape::Text { max_len: 160 }, Value::from(""))
                .with_debounce(Duration::from_millis(800)),
        )
        .with(
            AttributeDescriptor::new(AVATAR, Shape::Bytes { max_len: 5 * 1024 * 1024 }, Value::Null)
                .nullable(),
        )
        .with(AttributeDescriptor::new(
            DISPLAY_NAME,
            Shape::Text { max_len: 50 },
            Value::from(""),
        ))
}
