use axum::body::Bytes;
use serde::{Deserialize, Deserializer};

use crate::error::AppError;

#[derive(Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClickSubmission {
    #[serde(deserialize_with = "telegram_id")]
    pub telegram_id: String,
    pub name: String,
    pub clicks: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserQuery {
    pub telegram_id: Option<String>,
}

/// Telegram clients send ids as numbers, stored ids are strings.
fn telegram_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(id) => id,
        Id::Number(id) => id.to_string(),
    })
}

/// Sign and magnitude of `clicks` are not checked.
pub fn get_submission(bytes: Bytes) -> Result<ClickSubmission, AppError> {
    serde_json::from_slice(&bytes).map_err(|e| AppError::MalformedPayload(e.to_string()))
}
