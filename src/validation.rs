//! Argument schemas for tokens.
//!
//! A token may carry an [`ArgumentSchema`]. Before an instance name is computed,
//! the raw arguments supplied by the caller are passed through the schema, which
//! either returns the validated (possibly normalized) arguments or rejects them.
//! The locator never inspects arguments beyond that call.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{DiError, DiResult};

/// A rejected argument payload.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("Validation failed for {token}: {message}")]
pub struct ValidationError {
    /// Token whose schema rejected the input.
    pub token: String,
    /// Reason given by the schema.
    pub message: String,
}

impl ValidationError {
    pub fn new(token: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            message: message.into(),
        }
    }
}

/// External validator attached to a token.
///
/// # Examples
///
/// ```
/// use ferrous_locator::{ArgumentSchema, Token};
/// use serde_json::{json, Value};
///
/// struct RequiresPort;
///
/// impl ArgumentSchema for RequiresPort {
///     fn validate(&self, input: Value) -> Result<Value, String> {
///         match input.get("port").and_then(Value::as_u64) {
///             Some(_) => Ok(input),
///             None => Err("port is required".to_string()),
///         }
///     }
/// }
///
/// let token = Token::<String>::new("Endpoint").with_schema(RequiresPort);
/// assert!(token.validate(Some(json!({ "port": 80 }))).is_ok());
/// assert!(token.validate(Some(json!({}))).is_err());
/// ```
pub trait ArgumentSchema: Send + Sync + 'static {
    /// Returns validated output or a human-readable rejection reason.
    fn validate(&self, input: Value) -> Result<Value, String>;
}

impl<F> ArgumentSchema for F
where
    F: Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
{
    fn validate(&self, input: Value) -> Result<Value, String> {
        self(input)
    }
}

/// Schema that deserializes the input into `T` and rejects anything that does not fit.
pub struct TypedSchema<T> {
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T> TypedSchema<T> {
    pub fn new() -> Self {
        Self {
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ArgumentSchema for TypedSchema<T>
where
    T: DeserializeOwned + 'static,
{
    fn validate(&self, input: Value) -> Result<Value, String> {
        serde_json::from_value::<T>(input.clone())
            .map(|_| input)
            .map_err(|e| e.to_string())
    }
}

pub(crate) type SharedSchema = Arc<dyn ArgumentSchema>;

/// Validated arguments handed to constructors and factories.
#[derive(Clone, Default, PartialEq)]
pub struct ServiceArgs(Option<Value>);

impl ServiceArgs {
    pub(crate) fn new(value: Option<Value>) -> Self {
        Self(value)
    }

    /// No arguments were supplied.
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Raw JSON arguments.
    pub fn value(&self) -> Option<&Value> {
        self.0.as_ref()
    }

    /// Deserializes the arguments into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> DiResult<T> {
        let value = self.0.clone().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(DiError::unknown)
    }

    /// Looks up a single top-level field.
    pub fn field<T: DeserializeOwned>(&self, key: &str) -> DiResult<Option<T>> {
        match self.0.as_ref().and_then(|v| v.get(key)) {
            Some(v) => serde_json::from_value(v.clone())
                .map(Some)
                .map_err(DiError::unknown),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for ServiceArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(v) => write!(f, "ServiceArgs({})", v),
            None => f.write_str("ServiceArgs(None)"),
        }
    }
}
