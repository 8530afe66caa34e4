//! Field values supplied by the form layer, and their coercion into typed
//! content according to the template's field declarations.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt::Write;

use crate::templates::{FieldDecl, FieldType};

pub const DEFAULT_DATE_FORMAT: &str = "%-d %b %Y";
pub const CHECKED_MARK: &str = "\u{2713}";

/// A raw value as received from the form layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Text(String),
    /// Raw image bytes handed over in-process. Serialized as base64.
    #[serde(serialize_with = "encode_bytes", skip_deserializing)]
    Bytes(Vec<u8>),
}

fn encode_bytes<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&STANDARD.encode(bytes))
}

pub type FieldValues = HashMap<String, FieldValue>;

impl FieldValue {
    pub fn text(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }

    /// Blank strings count as "not provided".
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Bytes(b) => b.is_empty(),
            FieldValue::Bool(_) => false,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            FieldValue::Text(s) => match s.trim() {
                "true" | "on" | "yes" => Some(true),
                "false" | "off" | "no" => Some(false),
                _ => None,
            },
            FieldValue::Bytes(_) => None,
        }
    }
}

/// Where the bytes of an image value live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    Uri(String),
}

/// A field value coerced to its declared type.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Text(String),
    Image(ImageSource),
    Date(NaiveDate),
    Select(String),
    Checkbox(bool),
}

impl BoundValue {
    /// Coerce a raw value. The error is a human-readable decode failure;
    /// kind mismatches are caught earlier by validation.
    pub fn coerce(decl: &FieldDecl, value: &FieldValue) -> Result<Self, String> {
        match (decl.field_type, value) {
            (FieldType::Text, FieldValue::Text(s)) => Ok(BoundValue::Text(s.clone())),
            (FieldType::Select, FieldValue::Text(s)) => Ok(BoundValue::Select(s.clone())),
            (FieldType::Date, FieldValue::Text(s)) => parse_date(s).map(BoundValue::Date),
            (FieldType::Checkbox, v) => v
                .as_bool()
                .map(BoundValue::Checkbox)
                .ok_or_else(|| format!("'{}' expects a boolean", decl.name)),
            (FieldType::Image, FieldValue::Bytes(b)) => Ok(BoundValue::Image(ImageSource::Bytes(b.clone()))),
            (FieldType::Image, FieldValue::Text(s)) => image_source(s).map(BoundValue::Image),
            (field_type, _) => Err(format!("'{}' cannot hold a {:?} value", decl.name, field_type)),
        }
    }

    /// Text rendered for this value, or `None` for images.
    pub fn display(&self, decl: &FieldDecl) -> Result<Option<String>, String> {
        Ok(match self {
            BoundValue::Text(s) | BoundValue::Select(s) => Some(s.clone()),
            BoundValue::Date(date) => Some(format_date(
                *date,
                decl.date_format.as_deref().unwrap_or(DEFAULT_DATE_FORMAT),
            )?),
            BoundValue::Checkbox(true) => Some(CHECKED_MARK.to_string()),
            BoundValue::Checkbox(false) => Some(String::new()),
            BoundValue::Image(_) => None,
        })
    }
}

/// Accepts `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map_err(|_| format!("'{}' is not an ISO date", value))
}

/// Locale-independent strftime formatting. Invalid patterns are an error,
/// never a panic.
pub fn format_date(date: NaiveDate, pattern: &str) -> Result<String, String> {
    let items: Vec<Item<'_>> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid date format '{}'", pattern));
    }
    let mut out = String::new();
    write!(out, "{}", date.format_with_items(items.iter()))
        .map_err(|_| format!("cannot format date with '{}'", pattern))?;
    Ok(out)
}

fn image_source(value: &str) -> Result<ImageSource, String> {
    match value.strip_prefix("data:") {
        Some(rest) => {
            let (_, payload) = rest
                .split_once(";base64,")
                .ok_or_else(|| "data URI is not base64 encoded".to_string())?;
            STANDARD
                .decode(payload.trim())
                .map(ImageSource::Bytes)
                .map_err(|e| format!("invalid base64 image: {}", e))
        }
        None => Ok(ImageSource::Uri(value.to_string())),
    }
}
