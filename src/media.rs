use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use mime::Mime;
use regex::Regex;

use crate::errors::AppError;

fn data_uri_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^data:([\w.+-]+/[\w.+-]+)((?:;[\w.-]+=[\w.-]+)*);base64,([A-Za-z0-9+/=\s]*)$")
            .expect("data URI pattern is valid")
    })
}

/// A base64 data URI: `data:<mime>[;params];base64,<payload>`.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUri {
    mime: Mime,
    raw: String,
    decoded_len: usize,
}

impl DataUri {
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        let caps = data_uri_pattern()
            .captures(raw)
            .ok_or_else(|| AppError::Validation("Image must be a base64 data URI".to_string()))?;

        let mime: Mime = caps[1]
            .parse()
            .map_err(|_| AppError::Validation(format!("Unrecognised MIME type: {}", &caps[1])))?;

        let payload: String = caps[3].chars().filter(|c| !c.is_whitespace()).collect();
        if payload.is_empty() {
            return Err(AppError::Validation("Image payload is empty".to_string()));
        }
        let bytes = STANDARD
            .decode(payload.as_bytes())
            .map_err(|e| AppError::Validation(format!("Invalid base64 payload: {}", e)))?;

        Ok(Self {
            mime,
            raw: raw.to_string(),
            decoded_len: bytes.len(),
        })
    }

    /// Parses and additionally requires an `image/*` type under `max_bytes`.
    pub fn parse_image(raw: &str, max_bytes: usize) -> Result<Self, AppError> {
        let uri = Self::parse(raw)?;
        if uri.mime.type_() != mime::IMAGE {
            return Err(AppError::Validation(format!(
                "Expected an image, got {}",
                uri.mime
            )));
        }
        if uri.decoded_len > max_bytes {
            return Err(AppError::Validation(format!(
                "Image is {} bytes, limit is {} bytes",
                uri.decoded_len, max_bytes
            )));
        }
        Ok(uri)
    }

    pub fn from_bytes(content_type: &Mime, bytes: &[u8]) -> Self {
        let essence = content_type.essence_str().to_string();
        Self {
            mime: essence.parse().unwrap_or(mime::APPLICATION_OCTET_STREAM),
            raw: format!("data:{};base64,{}", essence, STANDARD.encode(bytes)),
            decoded_len: bytes.len(),
        }
    }

    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    pub fn decoded_len(&self) -> usize {
        self.decoded_len
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn into_string(self) -> String {
        self.raw
    }
}
