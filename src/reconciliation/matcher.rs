//! Teaching-date sets and the comparison used to match documents to payments
//!
//! Dates arrive either as a JSON list or as a JSON list encoded inside a
//! string, sometimes with a time-of-day suffix. [`FechasEnsenanza`] decodes
//! all of those once, at the boundary, into a sorted list of calendar dates.
//! Anything that does not decode as a date list becomes the empty set.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Sorted multiset of teaching dates
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FechasEnsenanza(Vec<NaiveDate>);

impl FechasEnsenanza {
    pub fn new(mut fechas: Vec<NaiveDate>) -> Self {
        fechas.sort_unstable();
        Self(fechas)
    }

    /// Decode a loosely typed value; undecodable input yields the empty set
    pub fn from_value(value: &Value) -> Self {
        match decode_value(value) {
            Some(fechas) => Self::new(fechas),
            None => {
                tracing::debug!(raw = %value, "discarding undecodable teaching dates");
                Self::default()
            }
        }
    }

    /// Decode serialized text, e.g. `["2025-03-05","2025-03-12"]`
    pub fn from_raw(raw: &str) -> Self {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(&value),
            Err(_) => Self::from_value(&Value::String(raw.to_string())),
        }
    }

    /// Parse a list of date strings, failing the whole set on any bad entry
    pub fn parse<I, T>(fechas: I) -> Option<Self>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        fechas
            .into_iter()
            .map(|fecha| parse_fecha(fecha.as_ref()))
            .collect::<Option<Vec<_>>>()
            .map(Self::new)
    }

    pub fn as_slice(&self) -> &[NaiveDate] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.0
                .iter()
                .map(|fecha| Value::String(fecha.format("%Y-%m-%d").to_string()))
                .collect(),
        )
    }
}

impl From<Vec<NaiveDate>> for FechasEnsenanza {
    fn from(fechas: Vec<NaiveDate>) -> Self {
        Self::new(fechas)
    }
}

impl Serialize for FechasEnsenanza {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FechasEnsenanza {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(&value))
    }
}

/// Same teaching schedule: equal sorted date sequences
///
/// Two empty sets are the same schedule here; use [`schedules_match`] when
/// deciding whether a document can be reconciled to a payment.
pub fn same_schedule(a: &FechasEnsenanza, b: &FechasEnsenanza) -> bool {
    a.0 == b.0
}

/// Reconciliation match: same schedule and neither side empty
pub fn schedules_match(a: &FechasEnsenanza, b: &FechasEnsenanza) -> bool {
    !a.is_empty() && !b.is_empty() && same_schedule(a, b)
}

fn decode_value(value: &Value) -> Option<Vec<NaiveDate>> {
    match value {
        Value::Null => Some(Vec::new()),
        Value::Array(items) => items
            .iter()
            .map(|item| item.as_str().and_then(parse_fecha))
            .collect(),
        Value::String(text) => {
            let text = text.trim();
            if text.is_empty() {
                return Some(Vec::new());
            }
            // Doubly encoded list
            match serde_json::from_str::<Value>(text) {
                Ok(inner @ Value::Array(_)) => decode_value(&inner),
                _ => None,
            }
        }
        _ => None,
    }
}

fn parse_fecha(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(fecha) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(fecha);
    }
    if let Ok(instante) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(instante.date_naive());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|instante| instante.date())
}
