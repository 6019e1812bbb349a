use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;
use rand::{rng, Rng};

use crate::models::{IncidentCategory, NewIncident};

pub const MAX_MESSAGE_LEN: usize = 4_000;
pub const MAX_SESSION_ID_LEN: usize = 128;
pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_EMAIL_LEN: usize = 254;
pub const PUBLIC_ID_LEN: usize = 8;

const PUBLIC_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
// largest multiple of the alphabet size below 256
const PUBLIC_ID_BYTE_LIMIT: usize = 256 / PUBLIC_ID_ALPHABET.len() * PUBLIC_ID_ALPHABET.len();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("message must not be empty")]
    EmptyMessage,
    #[error("message exceeds {max} characters")]
    MessageTooLong { max: usize },
    #[error("session id is malformed")]
    MalformedSessionId,
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },
    #[error("{field} exceeds {max} characters")]
    FieldTooLong { field: &'static str, max: usize },
    #[error("unknown incident category `{0}`")]
    UnknownCategory(String),
    #[error("contact email is malformed")]
    MalformedEmail,
    #[error("unknown incident status `{0}`")]
    UnknownStatus(String),
    #[error("{field} must be between {min} and {max}")]
    OutOfRange {
        field: &'static str,
        min: usize,
        max: usize,
    },
}

/// Incident fields as submitted through the direct (non-chat) path.
#[derive(Debug, Clone)]
pub struct IncidentSubmission {
    pub title: String,
    pub description: String,
    pub category: String,
    pub location_text: Option<String>,
    pub contact_email: Option<String>,
}

pub fn validate_message(text: &str) -> Result<&str, ValidationError> {
    if text.trim().is_empty() {
        return Err(ValidationError::EmptyMessage);
    }
    if text.chars().count() > MAX_MESSAGE_LEN {
        return Err(ValidationError::MessageTooLong {
            max: MAX_MESSAGE_LEN,
        });
    }
    Ok(text)
}

/// Session ids are opaque but restricted to `[A-Za-z0-9_-]{1,128}`.
pub fn validate_session_id(session_id: &str) -> Result<&str, ValidationError> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');

    if valid {
        Ok(session_id)
    } else {
        Err(ValidationError::MalformedSessionId)
    }
}

pub fn validate_submission(input: IncidentSubmission) -> Result<NewIncident, ValidationError> {
    let title = input.title.trim().to_string();
    if title.is_empty() {
        return Err(ValidationError::EmptyField { field: "title" });
    }
    if title.graphemes(true).count() > MAX_TITLE_LEN {
        return Err(ValidationError::FieldTooLong {
            field: "title",
            max: MAX_TITLE_LEN,
        });
    }

    let description = input.description.trim().to_string();
    if description.is_empty() {
        return Err(ValidationError::EmptyField {
            field: "description",
        });
    }

    let category = IncidentCategory::parse(&input.category)
        .ok_or_else(|| ValidationError::UnknownCategory(input.category.clone()))?;

    let contact_email = match input.contact_email.map(|email| email.trim().to_string()) {
        Some(email) if email.is_empty() => None,
        Some(email) if looks_like_email(&email) => Some(email),
        Some(_) => return Err(ValidationError::MalformedEmail),
        None => None,
    };

    Ok(NewIncident {
        title,
        category: category.as_str().to_string(),
        location_text: input
            .location_text
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty()),
        contact_email,
        description,
    })
}

/// Pages are 1-based; `page_size` must fall in `1..=max_page_size`.
pub fn validate_page(page: usize, page_size: usize, max_page_size: usize) -> Result<(), ValidationError> {
    if page == 0 {
        return Err(ValidationError::OutOfRange {
            field: "page",
            min: 1,
            max: usize::MAX,
        });
    }
    if page_size == 0 || page_size > max_page_size {
        return Err(ValidationError::OutOfRange {
            field: "page_size",
            min: 1,
            max: max_page_size,
        });
    }
    Ok(())
}

/// Short, human-shareable incident identifier, uniform over the alphabet.
pub fn generate_public_id() -> String {
    let mut id = String::with_capacity(PUBLIC_ID_LEN);
    let mut buffer = [0u8; 16];

    while id.len() < PUBLIC_ID_LEN {
        rng().fill_bytes(&mut buffer);
        for symbol in buffer.iter().filter_map(|byte| public_id_symbol(*byte)) {
            if id.len() == PUBLIC_ID_LEN {
                break;
            }
            id.push(symbol);
        }
    }

    id
}

/// Bytes at or above the limit are rejected, so every symbol maps from the
/// same number of byte values.
fn public_id_symbol(byte: u8) -> Option<char> {
    let byte = usize::from(byte);
    (byte < PUBLIC_ID_BYTE_LIMIT)
        .then(|| PUBLIC_ID_ALPHABET[byte % PUBLIC_ID_ALPHABET.len()] as char)
}

fn looks_like_email(value: &str) -> bool {
    if value.len() > MAX_EMAIL_LEN || value.chars().any(char::is_whitespace) {
        return false;
    }
    match value.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
