// Device JSON → Snapshot. The only place loosely-typed readings are accepted.

use serde_json::Value;

use crate::error::DeviceError;
use crate::models::{Field, FieldKind, Snapshot};

fn invalid(msg: String) -> DeviceError {
    DeviceError::InvalidPayload(msg)
}

fn integral(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| {
        v.as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn reading(field: Field, v: &Value) -> Result<Option<f64>, DeviceError> {
    if v.is_null() {
        return Ok(None);
    }
    match field.kind() {
        FieldKind::Flag => match v {
            Value::Bool(b) => Ok(Some(if *b { 1.0 } else { 0.0 })),
            _ => match integral(v) {
                Some(0) => Ok(Some(0.0)),
                Some(1) => Ok(Some(1.0)),
                _ => Err(invalid(format!("{}: expected flag, got {v}", field.name()))),
            },
        },
        FieldKind::Counter => integral(v)
            .map(|n| Some(n as f64))
            .ok_or_else(|| invalid(format!("{}: expected integer, got {v}", field.name()))),
        FieldKind::Float => v
            .as_f64()
            .filter(|f| f.is_finite())
            .map(Some)
            .ok_or_else(|| invalid(format!("{}: expected number, got {v}", field.name()))),
    }
}

/// Validate one reading object. Missing keys and nulls become unknown readings;
/// unknown keys are ignored; a missing `timestamp` is stamped with `acquired_at`.
pub fn snapshot_from_json(value: &Value, acquired_at: i64) -> Result<Snapshot, DeviceError> {
    let Some(obj) = value.as_object() else {
        return Err(invalid(format!("expected JSON object, got {value}")));
    };

    let timestamp = match obj.get("timestamp") {
        None | Some(Value::Null) => acquired_at,
        Some(v) => integral(v).ok_or_else(|| invalid(format!("timestamp: expected integer, got {v}")))?,
    };

    let mut snapshot = Snapshot::empty(timestamp);
    for field in Field::ALL {
        if let Some(v) = obj.get(field.name()) {
            snapshot.set_value(field, reading(field, v)?);
        }
    }
    Ok(snapshot)
}
