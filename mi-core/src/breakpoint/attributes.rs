//! Caller-facing breakpoint attributes.
//!
//! Callers describe breakpoints with a loosely typed attribute map. The map is
//! validated once at the service boundary into a [`BreakpointSpec`] (insert)
//! or an [`AttributeDelta`] (update), and nothing downstream looks at the raw
//! map again.

use crate::command::WatchAccess;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const BREAKPOINT_TYPE: &str = "type";
pub const FILE_NAME: &str = "file_name";
pub const LINE_NUMBER: &str = "line_number";
pub const FUNCTION: &str = "function";
pub const ADDRESS: &str = "address";
pub const CONDITION: &str = "condition";
pub const IGNORE_COUNT: &str = "ignore_count";
pub const IS_ENABLED: &str = "is_enabled";
pub const IS_TEMPORARY: &str = "is_temporary";
pub const IS_HARDWARE: &str = "is_hardware";
pub const THREAD_ID: &str = "thread_id";
pub const EXPRESSION: &str = "expression";
pub const READ: &str = "read";
pub const WRITE: &str = "write";

/// Values of [`BREAKPOINT_TYPE`].
pub const BREAKPOINT: &str = "breakpoint";
pub const WATCHPOINT: &str = "watchpoint";
pub const CATCHPOINT: &str = "catchpoint";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

/// Attribute map as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attributes(BTreeMap<String, AttributeValue>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a map for a code breakpoint.
    pub fn breakpoint() -> Self {
        Self::new().with(BREAKPOINT_TYPE, BREAKPOINT)
    }

    /// Start a map for a watchpoint.
    pub fn watchpoint() -> Self {
        Self::new().with(BREAKPOINT_TYPE, WATCHPOINT)
    }

    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<AttributeValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn insert(&mut self, name: &str, value: impl Into<AttributeValue>) {
        self.0.insert(name.to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn string(&self, name: &str) -> Result<Option<&str>> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Str(value)) => Ok(Some(value)),
            Some(_) => Err(invalid(name, "string")),
        }
    }

    fn flag(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Bool(value)) => Ok(Some(*value)),
            Some(_) => Err(invalid(name, "boolean")),
        }
    }

    fn count(&self, name: &str) -> Result<Option<u32>> {
        match self.get(name) {
            None => Ok(None),
            Some(AttributeValue::Int(value)) => {
                u32::try_from(*value).map(Some).map_err(|_| invalid(name, "non-negative integer"))
            }
            Some(_) => Err(invalid(name, "non-negative integer")),
        }
    }

    /// Thread ids travel as strings in most front ends, so both forms are
    /// accepted.
    fn thread_id(&self) -> Result<u32> {
        match self.get(THREAD_ID) {
            None => Ok(0),
            Some(AttributeValue::Int(value)) => {
                u32::try_from(*value).map_err(|_| invalid(THREAD_ID, "thread id"))
            }
            Some(AttributeValue::Str(value)) => {
                value.trim().parse().map_err(|_| invalid(THREAD_ID, "thread id"))
            }
            Some(AttributeValue::Bool(_)) => Err(invalid(THREAD_ID, "thread id")),
        }
    }
}

impl<K: Into<String>, V: Into<AttributeValue>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

fn invalid(name: &str, expected: &'static str) -> Error {
    Error::InvalidAttribute { name: name.to_string(), expected }
}

/// Changes requested for the three mutable slots of an installed breakpoint.
/// `None` leaves a slot alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributeDelta {
    pub condition: Option<String>,
    pub ignore_count: Option<u32>,
    pub enabled: Option<bool>,
}

impl AttributeDelta {
    pub fn is_empty(&self) -> bool {
        self.condition.is_none() && self.ignore_count.is_none() && self.enabled.is_none()
    }
}

impl TryFrom<&Attributes> for AttributeDelta {
    type Error = Error;

    fn try_from(attributes: &Attributes) -> Result<Self> {
        Ok(Self {
            condition: attributes.string(CONDITION)?.map(str::to_string),
            ignore_count: attributes.count(IGNORE_COUNT)?,
            enabled: attributes.flag(IS_ENABLED)?,
        })
    }
}

/// A validated code breakpoint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineBreakpoint {
    pub location: String,
    pub temporary: bool,
    pub hardware: bool,
    pub condition: String,
    pub ignore_count: u32,
    /// 0 for every thread.
    pub thread_id: u32,
    pub enabled: bool,
}

impl LineBreakpoint {
    /// The backend always creates breakpoints enabled.
    pub fn follow_up(&self) -> AttributeDelta {
        AttributeDelta { enabled: Some(self.enabled), ..AttributeDelta::default() }
    }
}

/// A validated watchpoint request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watchpoint {
    pub expression: String,
    pub access: WatchAccess,
    pub condition: String,
    pub ignore_count: u32,
    pub enabled: bool,
}

impl Watchpoint {
    /// `-break-watch` cannot carry these, so they are applied after creation.
    pub fn follow_up(&self) -> AttributeDelta {
        AttributeDelta {
            condition: Some(self.condition.clone()),
            ignore_count: Some(self.ignore_count),
            enabled: Some(self.enabled),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointSpec {
    Breakpoint(LineBreakpoint),
    Watchpoint(Watchpoint),
}

impl BreakpointSpec {
    /// Validate an insert request. With `strict_access`, a watchpoint that is
    /// neither read nor write is rejected instead of defaulting to write.
    pub fn from_attributes(attributes: &Attributes, strict_access: bool) -> Result<Self> {
        let kind = match attributes.get(BREAKPOINT_TYPE) {
            Some(AttributeValue::Str(kind)) => kind.as_str(),
            _ => return Err(Error::UnknownBreakpointType),
        };
        match kind {
            BREAKPOINT => Self::breakpoint(attributes).map(Self::Breakpoint),
            WATCHPOINT => Self::watchpoint(attributes, strict_access).map(Self::Watchpoint),
            _ => Err(Error::UnknownBreakpointType),
        }
    }

    fn breakpoint(attributes: &Attributes) -> Result<LineBreakpoint> {
        let location = format_location(attributes)?;
        if location.is_empty() {
            return Err(Error::InvalidLocation);
        }
        Ok(LineBreakpoint {
            location,
            temporary: attributes.flag(IS_TEMPORARY)?.unwrap_or(false),
            hardware: attributes.flag(IS_HARDWARE)?.unwrap_or(false),
            condition: attributes.string(CONDITION)?.unwrap_or_default().to_string(),
            ignore_count: attributes.count(IGNORE_COUNT)?.unwrap_or(0),
            thread_id: attributes.thread_id()?,
            enabled: attributes.flag(IS_ENABLED)?.unwrap_or(true),
        })
    }

    fn watchpoint(attributes: &Attributes, strict_access: bool) -> Result<Watchpoint> {
        let expression = attributes.string(EXPRESSION)?.unwrap_or_default().trim();
        if expression.is_empty() {
            return Err(Error::InvalidLocation);
        }
        let read = attributes.flag(READ)?.unwrap_or(false);
        let write = attributes.flag(WRITE)?.unwrap_or(false);
        let access = match WatchAccess::from_flags(read, write) {
            Some(access) => access,
            None if strict_access => return Err(Error::InvalidWatchpointAccess),
            None => WatchAccess::Write,
        };
        Ok(Watchpoint {
            expression: expression.to_string(),
            access,
            condition: attributes.string(CONDITION)?.unwrap_or_default().to_string(),
            ignore_count: attributes.count(IGNORE_COUNT)?.unwrap_or(0),
            enabled: attributes.flag(IS_ENABLED)?.unwrap_or(true),
        })
    }
}

/// Build a linespec: `file:line`, then `file:function`, then `function`,
/// then the raw address. Returns an empty string when nothing usable is set.
pub fn format_location(attributes: &Attributes) -> Result<String> {
    let file = attributes.string(FILE_NAME)?.unwrap_or_default().trim();
    let line = attributes.count(LINE_NUMBER)?.filter(|line| *line > 0);
    // GDB does not accept a parameter list in a function linespec.
    let function = attributes.string(FUNCTION)?.unwrap_or_default();
    let function = function.split('(').next().unwrap_or_default().trim();
    let address = attributes.string(ADDRESS)?.unwrap_or_default().trim();

    let file = if file.contains(' ') { format!("\"{file}\"") } else { file.to_string() };

    let location = match (file.is_empty(), line) {
        (false, Some(line)) => format!("{file}:{line}"),
        (false, None) if !function.is_empty() => format!("{file}:{function}"),
        _ if !function.is_empty() => function.to_string(),
        _ if address.starts_with(|c: char| c.is_ascii_digit()) => format!("*{address}"),
        _ => address.to_string(),
    };
    Ok(location)
}
