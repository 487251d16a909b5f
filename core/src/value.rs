//! Argument values and their wire-text form.
//!
//! # Design
//! `Value` is the closed set of argument kinds the proxy knows how to put on
//! the wire. `marshal` turns a single-token value into text; lists and
//! attachments are not tokens and are handled by the encoder, which is why
//! `marshal` returns `Option`.

use std::time::SystemTime;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

use crate::attachment::Attachment;

/// A single named argument value.
#[derive(Debug, Clone)]
pub enum Value {
    /// An undefined value. Skipped when encoding.
    Null,
    String(String),
    Int(i64),
    UInt(u64),
    Float(f64),
    Bool(bool),
    /// An absolute instant, sent as milliseconds since the Unix epoch.
    Timestamp(DateTime<Utc>),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    List(Vec<Value>),
    Attachment(Attachment),
}

impl Value {
    /// Render a single-token value as wire text.
    ///
    /// Returns `None` for `Null`, `List`, and `Attachment`, which have no
    /// single-token form.
    pub fn marshal(&self) -> Option<String> {
        match self {
            Value::String(s) => Some(s.clone()),
            Value::Int(n) => Some(n.to_string()),
            Value::UInt(n) => Some(n.to_string()),
            Value::Float(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Timestamp(t) => Some(t.timestamp_millis().to_string()),
            Value::Date(d) => Some(d.to_string()),
            Value::Time(t) => Some(t.to_string()),
            Value::DateTime(dt) => Some(format!("{}T{}", dt.date(), dt.time())),
            Value::Null | Value::List(_) | Value::Attachment(_) => None,
        }
    }

    pub fn is_attachment(&self) -> bool {
        matches!(self, Value::Attachment(_))
    }

    /// True when this value is an attachment or a list containing one.
    pub fn contains_attachment(&self) -> bool {
        match self {
            Value::Attachment(_) => true,
            Value::List(items) => items.iter().any(Value::is_attachment),
            _ => false,
        }
    }

    /// The elements this value expands to on the wire, in order.
    ///
    /// A scalar expands to itself; a list to its elements.
    pub fn elements(&self) -> &[Value] {
        match self {
            Value::List(items) => items,
            other => std::slice::from_ref(other),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<&String> for Value {
    fn from(value: &String) -> Self {
        Value::String(value.clone())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

macro_rules! signed_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::Int(i64::from(value))
            }
        })*
    };
}

macro_rules! unsigned_value {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::UInt(u64::from(value))
            }
        })*
    };
}

signed_value!(i8, i16, i32, i64);
unsigned_value!(u8, u16, u32, u64);

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::UInt(value as u64)
    }
}

impl From<f32> for Value {
    fn from(value: f32) -> Self {
        Value::Float(f64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(value: DateTime<Utc>) -> Self {
        Value::Timestamp(value)
    }
}

impl From<SystemTime> for Value {
    fn from(value: SystemTime) -> Self {
        Value::Timestamp(DateTime::<Utc>::from(value))
    }
}

impl From<NaiveDate> for Value {
    fn from(value: NaiveDate) -> Self {
        Value::Date(value)
    }
}

impl From<NaiveTime> for Value {
    fn from(value: NaiveTime) -> Self {
        Value::Time(value)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(value: NaiveDateTime) -> Self {
        Value::DateTime(value)
    }
}

impl From<Attachment> for Value {
    fn from(value: Attachment) -> Self {
        Value::Attachment(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(values: Vec<T>) -> Self {
        Value::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}
