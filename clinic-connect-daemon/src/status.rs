//! Terminal rendering of conversation state for `watch` and `inbox`

use chrono::{DateTime, Local, TimeZone};
use clinic_connect_sync::{ConversationSummary, Message, SyncEvent};

/// Local wall-clock time of a millisecond timestamp
pub fn format_timestamp(millis: i64) -> String {
    match Local.timestamp_millis_opt(millis).single() {
        Some(time) => {
            let time: DateTime<Local> = time;
            time.format("%Y-%m-%d %H:%M:%S").to_string()
        }
        None => millis.to_string(),
    }
}

pub fn format_message(message: &Message, current_user: &str) -> String {
    let direction = if message.sender_id() == current_user {
        "->"
    } else {
        "<-"
    };
    format!(
        "[{}] {} {}: {}",
        format_timestamp(message.created_at()),
        direction,
        message.sender_id(),
        message.body()
    )
}

pub fn format_summary(summary: &ConversationSummary) -> String {
    let badge = if summary.unread_count > 0 {
        format!(" ({} unread)", summary.unread_count)
    } else {
        String::new()
    };
    format!(
        "{:<24} {}  {}{}",
        summary.counterpart,
        format_timestamp(summary.last_timestamp),
        summary.preview,
        badge
    )
}

/// Status line for an event, if it changes what the user should see
///
/// Merged messages are printed separately from the snapshot, so they have
/// no status line.
pub fn status_line(event: &SyncEvent) -> Option<String> {
    match event {
        SyncEvent::PollingStarted { mode, .. } => Some(format!("* polling ({} mode)", mode)),
        SyncEvent::ModeChanged { mode, .. } => Some(format!("* switched to {} mode", mode)),
        SyncEvent::Disconnected { reason, .. } => Some(format!(
            "! disconnected: {} (type or send to reconnect)",
            reason
        )),
        SyncEvent::Reconnected { .. } => Some("* reconnected".to_string()),
        SyncEvent::PollingStopped { .. } => Some("* polling stopped".to_string()),
        SyncEvent::PollFailed {
            consecutive_failures,
            ..
        } => Some(format!("* fetch failed ({} in a row)", consecutive_failures)),
        SyncEvent::MessagesMerged { .. } | SyncEvent::UnreadChanged { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_connect_sync::PollingMode;

    #[test]
    fn test_format_message_direction() {
        let incoming = Message::new("1", "patient-1", "doctor-1", "Hello", 0);
        let outgoing = Message::new("2", "doctor-1", "patient-1", "Hi", 0);
        assert!(format_message(&incoming, "doctor-1").contains("<- patient-1: Hello"));
        assert!(format_message(&outgoing, "doctor-1").contains("-> doctor-1: Hi"));
    }

    #[test]
    fn test_summary_badge() {
        let mut summary = ConversationSummary {
            counterpart: "patient-1".to_string(),
            preview: "Hello".to_string(),
            last_timestamp: 0,
            unread_count: 2,
        };
        assert!(format_summary(&summary).ends_with("Hello (2 unread)"));

        summary.unread_count = 0;
        assert!(format_summary(&summary).ends_with("Hello"));
    }

    #[test]
    fn test_status_lines() {
        let event = SyncEvent::Disconnected {
            counterpart: "patient-1".to_string(),
            reason: "Connection lost.".to_string(),
        };
        assert!(status_line(&event).unwrap().starts_with("! disconnected"));

        let event = SyncEvent::ModeChanged {
            counterpart: "patient-1".to_string(),
            mode: PollingMode::Normal,
        };
        assert!(status_line(&event).is_some());

        let event = SyncEvent::UnreadChanged {
            counterpart: "patient-1".to_string(),
            unread: 0,
        };
        assert!(status_line(&event).is_none());
    }
}
