//! Content negotiation for the admin surface (spec §6): request bodies
//! are decoded per `Content-Type` (absent ⇒ YAML); responses are
//! encoded per `Accept` (`application/x-yaml` ⇒ YAML, else pretty JSON).
//! Kept alongside the wire types it serializes, following the teacher's
//! `standalone.rs`, which reads/writes the same YAML shape it exposes
//! over HTTP.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
}

pub fn request_format(content_type: Option<&str>) -> Result<Format, Error> {
    match content_type.map(|s| s.to_ascii_lowercase()) {
        None => Ok(Format::Yaml),
        Some(ct) if ct.contains("yaml") => Ok(Format::Yaml),
        Some(ct) if ct.contains("json") => Ok(Format::Json),
        Some(ct) => Err(Error::UnsupportedMediaType(ct)),
    }
}

pub fn response_format(accept: Option<&str>) -> Format {
    match accept.map(|s| s.to_ascii_lowercase()) {
        Some(a) if a.contains("x-yaml") || a.contains("application/yaml") => Format::Yaml,
        _ => Format::Json,
    }
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8], format: Format) -> Result<T, Error> {
    match format {
        Format::Json => serde_json::from_slice(bytes).map_err(|e| Error::Validation(e.to_string())),
        Format::Yaml => serde_yaml::from_slice(bytes).map_err(|e| Error::Validation(e.to_string())),
    }
}

pub fn encode<T: Serialize>(value: &T, format: Format) -> (Vec<u8>, &'static str) {
    match format {
        Format::Json => (
            serde_json::to_vec_pretty(value).unwrap_or_default(),
            "application/json",
        ),
        Format::Yaml => (
            serde_yaml::to_string(value).unwrap_or_default().into_bytes(),
            "application/x-yaml",
        ),
    }
}
