use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_SEARCH_LEN;
use crate::model::{NewReservation, ReservationFilter};

/// One request line. `op` selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Login {
        user: String,
        password: String,
    },
    CreateReservation {
        reservation: NewReservation,
    },
    CancelReservation {
        id: Ulid,
    },
    ApproveReservation {
        id: Ulid,
    },
    RejectReservation {
        id: Ulid,
        reason: String,
    },
    GetReservation {
        id: Ulid,
    },
    ListReservations {
        #[serde(default)]
        filter: ReservationFilter,
    },
    PendingCount,
    ListResources,
    Notifications,
    MarkNotificationRead {
        id: Ulid,
    },
    MarkAllNotificationsRead,
}

impl Command {
    /// Metric label.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Login { .. } => "login",
            Command::CreateReservation { .. } => "create_reservation",
            Command::CancelReservation { .. } => "cancel_reservation",
            Command::ApproveReservation { .. } => "approve_reservation",
            Command::RejectReservation { .. } => "reject_reservation",
            Command::GetReservation { .. } => "get_reservation",
            Command::ListReservations { .. } => "list_reservations",
            Command::PendingCount => "pending_count",
            Command::ListResources => "list_resources",
            Command::Notifications => "notifications",
            Command::MarkNotificationRead { .. } => "mark_notification_read",
            Command::MarkAllNotificationsRead => "mark_all_notifications_read",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed request: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("request line exceeds {0} bytes")]
    LineTooLong(usize),
    #[error("search text exceeds {0} characters")]
    SearchTooLong(usize),
    #[error("already logged in")]
    AlreadyLoggedIn,
}

pub fn parse_command(line: &str) -> Result<Command, ProtocolError> {
    let cmd: Command = serde_json::from_str(line)?;
    if let Command::ListReservations { filter } = &cmd {
        if filter.text.as_ref().is_some_and(|text| text.chars().count() > MAX_SEARCH_LEN) {
            return Err(ProtocolError::SearchTooLong(MAX_SEARCH_LEN));
        }
    }
    Ok(cmd)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// One response line: `{"ok":true,"data":…}` or `{"ok":false,"error":{…}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn ok(data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self { ok: true, data: Some(data), error: None },
            Err(e) => {
                tracing::error!("response encoding failed: {e}");
                Self::error("internal", "internal error".into())
            }
        }
    }

    pub fn error(kind: &str, message: String) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody { kind: kind.to_string(), message }),
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.kind.as_str())
    }

    pub fn to_line(&self) -> String {
        // Only plain data; serializing cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"ok":false}"#.to_string())
    }
}

impl From<&EngineError> for Response {
    fn from(err: &EngineError) -> Self {
        Response::error(err.kind(), err.to_string())
    }
}

impl From<&ProtocolError> for Response {
    fn from(err: &ProtocolError) -> Self {
        Response::error("protocol", err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Status};

    #[test]
    fn parse_login_and_unit_ops() {
        let cmd = parse_command(r#"{"op":"login","user":"kim","password":"pw"}"#).unwrap();
        assert_eq!(cmd, Command::Login { user: "kim".into(), password: "pw".into() });
        assert_eq!(parse_command(r#"{"op":"pending_count"}"#).unwrap(), Command::PendingCount);
        assert_eq!(
            parse_command(r#"{"op":"mark_all_notifications_read"}"#).unwrap().name(),
            "mark_all_notifications_read"
        );
    }

    #[test]
    fn parse_create_with_defaults() {
        let line = r#"{"op":"create_reservation","reservation":{
            "resource_id":"01ARZ3NDEKTSV4RRFFQ69G5FAV","date":"2030-05-10",
            "start_time":"10:00","end_time":"11:00","category":"external","purpose":"Demo"}}"#;
        let Command::CreateReservation { reservation } = parse_command(line).unwrap() else {
            panic!("expected create_reservation");
        };
        assert_eq!(reservation.category, Category::External);
        assert_eq!(reservation.attendees, None);
        assert!(!reservation.food);
        assert_eq!(reservation.remarks, "");
    }

    #[test]
    fn parse_list_with_and_without_filter() {
        let Command::ListReservations { filter } = parse_command(r#"{"op":"list_reservations"}"#).unwrap() else {
            panic!("expected list_reservations");
        };
        assert_eq!(filter, ReservationFilter::default());

        let line = r#"{"op":"list_reservations","filter":{"status":"pending","date":"2030-05-10","text":"demo"}}"#;
        let Command::ListReservations { filter } = parse_command(line).unwrap() else {
            panic!("expected list_reservations");
        };
        assert_eq!(filter.status, Some(Status::Pending));
        assert_eq!(filter.text.as_deref(), Some("demo"));
    }

    #[test]
    fn parse_rejects_bad_input() {
        assert!(matches!(parse_command("not json"), Err(ProtocolError::Malformed(_))));
        assert!(matches!(parse_command(r#"{"op":"drop_tables"}"#), Err(ProtocolError::Malformed(_))));
        assert!(matches!(parse_command(r#"{"op":"cancel_reservation","id":"nope"}"#), Err(ProtocolError::Malformed(_))));
        let long = format!(r#"{{"op":"list_reservations","filter":{{"text":"{}"}}}}"#, "x".repeat(500));
        assert!(matches!(parse_command(&long), Err(ProtocolError::SearchTooLong(_))));
    }

    #[test]
    fn response_shapes() {
        assert_eq!(Response::ok(serde_json::json!({"count": 2})).to_line(), r#"{"ok":true,"data":{"count":2}}"#);
        let err = Response::error("conflict", "taken".into());
        assert_eq!(err.to_line(), r#"{"ok":false,"error":{"kind":"conflict","message":"taken"}}"#);
        assert_eq!(err.kind(), Some("conflict"));

        let storage = EngineError::Storage("disk full at /var/data".into());
        let line = Response::from(&storage).to_line();
        assert!(line.contains("internal storage error"));
        assert!(!line.contains("/var/data"));
    }
}
