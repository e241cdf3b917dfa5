//! Wire protocol: the `{action, data}` envelope, typed inbound payloads, and
//! the request error surface.
//!
//! Every message in either direction is one JSON object per line:
//! `{"action": "<NAME>", "data": { … }}`. Outbound messages are built as
//! [`Envelope`]s and serialized compactly by the session send path. Inbound
//! lines go through [`parse_line`], which separates "not JSON at all" from
//! "JSON without a usable action".

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Largest accepted request line, in bytes. Longer lines are rejected as
/// invalid JSON.
pub const MAX_LINE_BYTES: usize = 4096;

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One wire message in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    pub data: Value,
}

impl Envelope {
    pub fn new(action: &str, data: Value) -> Self {
        Self {
            action: action.to_string(),
            data,
        }
    }

    /// The uniform `ERROR {reason}` reply.
    pub fn error(reason: &str) -> Self {
        Self::new("ERROR", serde_json::json!({ "reason": reason }))
    }
}

// ---------------------------------------------------------------------------
// Inbound parsing
// ---------------------------------------------------------------------------

/// Splits a request line into its action name and data payload.
///
/// Absent `data` becomes `Value::Null`; individual handlers decide whether
/// they need one.
pub fn parse_line(line: &str) -> Result<(String, Value), RequestError> {
    let value: Value = serde_json::from_str(line).map_err(|_| RequestError::InvalidJson)?;

    let action = value
        .get("action")
        .and_then(Value::as_str)
        .ok_or(RequestError::MissingAction)?
        .to_string();
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    Ok((action, data))
}

/// Deserializes an action's data payload into its typed form.
///
/// `what` names the expected fields for the error reason, e.g.
/// `"username or password"`.
pub fn payload<T: DeserializeOwned>(data: &Value, what: &'static str) -> Result<T, RequestError> {
    if data.is_null() {
        return Err(RequestError::MissingData);
    }
    serde_json::from_value(data.clone()).map_err(|_| RequestError::MissingField(what))
}

// ---------------------------------------------------------------------------
// Typed payloads
// ---------------------------------------------------------------------------

/// `REGISTER` / `LOGIN` payload.
#[derive(Debug, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// `CHALLENGE` / `ACCEPT` / `DECLINE` payload.
#[derive(Debug, Deserialize)]
pub struct ChallengeRef {
    pub from: String,
    pub to: String,
}

/// `MOVE` payload.
#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub promotion: Option<String>,
}

/// `GET_VALID_MOVES` payload.
#[derive(Debug, Deserialize)]
pub struct ValidMovesRequest {
    #[serde(rename = "matchId")]
    pub match_id: String,
    pub position: String,
}

/// Payload of every game-control action that names a match.
#[derive(Debug, Deserialize)]
pub struct MatchRef {
    #[serde(rename = "matchId")]
    pub match_id: String,
}

/// `GET_PROFILE` payload.
#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub username: String,
}

/// `GET_MATCH_HISTORY` payload; the username defaults to the requester.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub username: Option<String>,
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

/// Everything that can go wrong with a request before (or instead of) a
/// domain-specific reply. The display string is exactly what goes on the
/// wire as `ERROR {reason}`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid JSON")]
    InvalidJson,
    #[error("Missing action field")]
    MissingAction,
    #[error("Missing data")]
    MissingData,
    #[error("Missing {0}")]
    MissingField(&'static str),
    #[error("Unknown action")]
    UnknownAction,
    #[error("Not logged in")]
    NotLoggedIn,
    #[error("Username mismatch")]
    UsernameMismatch,
    #[error("Server full")]
    ServerFull,
    #[error("Opponent not found or offline")]
    OpponentOffline,
    #[error("Opponent is not available")]
    OpponentBusy,
    #[error("Challenger not found")]
    ChallengerNotFound,
    #[error("Match not found")]
    MatchNotFound,
    #[error("You are not in this match")]
    NotInMatch,
    #[error("Not your piece")]
    NotYourPiece,
    #[error("Invalid position notation")]
    InvalidPosition,
    #[error("No available match slots")]
    NoMatchSlot,
    #[error("Already in a match")]
    AlreadyInMatch,
    #[error("Already in matchmaking queue")]
    AlreadyQueued,
    #[error("Matchmaking queue is full")]
    QueueFull,
    #[error("Not in matchmaking queue")]
    NotQueued,
    #[error("Opponent is no longer online")]
    RematchOpponentGone,
    #[error("Rematch not available")]
    RematchUnavailable,
    #[error("Abort negotiation is not supported")]
    AbortNegotiation,
    #[error("Storage error")]
    Storage,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_line_happy_path() {
        let (action, data) =
            parse_line(r#"{"action":"LOGIN","data":{"username":"a","password":"b"}}"#).unwrap();
        assert_eq!(action, "LOGIN");
        let creds: Credentials = payload(&data, "username or password").unwrap();
        assert_eq!(creds.username, "a");
        assert_eq!(creds.password, "b");
    }

    #[test]
    fn test_parse_line_rejects_bad_json() {
        assert_eq!(parse_line("{oops"), Err(RequestError::InvalidJson));
        assert_eq!(parse_line(""), Err(RequestError::InvalidJson));
    }

    #[test]
    fn test_parse_line_requires_string_action() {
        assert_eq!(
            parse_line(r#"{"data":{}}"#),
            Err(RequestError::MissingAction)
        );
        assert_eq!(
            parse_line(r#"{"action":42,"data":{}}"#),
            Err(RequestError::MissingAction)
        );
    }

    #[test]
    fn test_absent_data_becomes_null() {
        let (_, data) = parse_line(r#"{"action":"PING"}"#).unwrap();
        assert!(data.is_null());
        let err = payload::<Credentials>(&data, "username or password").unwrap_err();
        assert_eq!(err, RequestError::MissingData);
    }

    #[test]
    fn test_payload_reports_missing_fields() {
        let (_, data) = parse_line(r#"{"action":"LOGIN","data":{"username":"a"}}"#).unwrap();
        let err = payload::<Credentials>(&data, "username or password").unwrap_err();
        assert_eq!(err.to_string(), "Missing username or password");
    }

    #[test]
    fn test_move_request_promotion_is_optional() {
        let (_, data) =
            parse_line(r#"{"action":"MOVE","data":{"matchId":"M1","from":"E2","to":"E4"}}"#)
                .unwrap();
        let mv: MoveRequest = payload(&data, "matchId, from, or to field").unwrap();
        assert_eq!(mv.match_id, "M1");
        assert_eq!(mv.promotion, None);
    }

    #[test]
    fn test_error_envelope_shape() {
        let env = Envelope::error("Unknown action");
        let line = serde_json::to_string(&env).unwrap();
        assert_eq!(
            line,
            r#"{"action":"ERROR","data":{"reason":"Unknown action"}}"#
        );
    }
}
