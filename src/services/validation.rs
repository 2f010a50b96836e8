use crate::constants::limits::{MAX_PORT, MIN_PORT};
use crate::errors::ToolError;
use serde_json::Value;

#[derive(Clone, Default)]
pub struct Validation;

impl Validation {
    pub fn new() -> Self {
        Self
    }

    pub fn ensure_string(
        &self,
        value: &Value,
        label: &str,
        trim: bool,
    ) -> Result<String, ToolError> {
        let text = value.as_str().ok_or_else(|| {
            ToolError::invalid_params(format!("{} must be a non-empty string", label))
        })?;
        let normalized = text.trim();
        if normalized.is_empty() {
            return Err(ToolError::invalid_params(format!(
                "{} must be a non-empty string",
                label
            )));
        }
        Ok(if trim {
            normalized.to_string()
        } else {
            text.to_string()
        })
    }

    pub fn ensure_optional_string(
        &self,
        value: Option<&Value>,
        label: &str,
        trim: bool,
    ) -> Result<Option<String>, ToolError> {
        match value {
            None => Ok(None),
            Some(val) if val.is_null() => Ok(None),
            Some(val) => self.ensure_string(val, label, trim).map(Some),
        }
    }

    pub fn ensure_port(
        &self,
        value: Option<&Value>,
        fallback: Option<u16>,
    ) -> Result<u16, ToolError> {
        let Some(value) = value else {
            return Ok(fallback.unwrap_or(MIN_PORT));
        };
        if value.is_null() {
            return Ok(fallback.unwrap_or(MIN_PORT));
        }
        let numeric = value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
            .ok_or_else(|| {
                ToolError::invalid_params(format!(
                    "Port must be an integer between {} and {}",
                    MIN_PORT, MAX_PORT
                ))
            })?;
        if numeric < MIN_PORT as i64 || numeric > MAX_PORT as i64 {
            return Err(ToolError::invalid_params(format!(
                "Port must be an integer between {} and {}",
                MIN_PORT, MAX_PORT
            )));
        }
        Ok(numeric as u16)
    }

    pub fn ensure_object<'a>(
        &self,
        value: Option<&'a Value>,
        label: &str,
    ) -> Result<&'a serde_json::Map<String, Value>, ToolError> {
        value
            .and_then(|v| v.as_object())
            .ok_or_else(|| ToolError::invalid_params(format!("{} must be an object", label)))
    }

    /// Flattens a parameter object into strings. Numbers and booleans are
    /// accepted so `{"user_id": 42}` works the same as `{"user_id": "42"}`;
    /// nulls are dropped.
    pub fn ensure_string_map(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<std::collections::BTreeMap<String, String>, ToolError> {
        let mut out = std::collections::BTreeMap::new();
        let Some(value) = value else {
            return Ok(out);
        };
        if value.is_null() {
            return Ok(out);
        }
        let map = self.ensure_object(Some(value), label)?;
        for (key, entry) in map {
            let text = match entry {
                Value::Null => continue,
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(ToolError::invalid_params(format!(
                        "{}.{} must be a string",
                        label, key
                    )))
                }
            };
            out.insert(key.clone(), text);
        }
        Ok(out)
    }

    pub fn optional_bool(&self, value: Option<&Value>, label: &str) -> Result<Option<bool>, ToolError> {
        match value {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Some(true)),
                "false" | "0" | "no" => Ok(Some(false)),
                _ => Err(ToolError::invalid_params(format!("{} must be a boolean", label))),
            },
            Some(_) => Err(ToolError::invalid_params(format!("{} must be a boolean", label))),
        }
    }

    pub fn optional_positive_u64(
        &self,
        value: Option<&Value>,
        label: &str,
    ) -> Result<Option<u64>, ToolError> {
        let value = match value {
            None | Some(Value::Null) => return Ok(None),
            Some(value) => value,
        };
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse::<u64>().ok()))
            .filter(|v| *v > 0)
            .map(Some)
            .ok_or_else(|| ToolError::invalid_params(format!("{} must be a positive integer", label)))
    }
}
