use chrono::Utc;

use crate::database::{DatabaseResult, EventLog, EventLogType, LibraryDatabase};

/// Appends an audit entry. Entries are never edited or pruned by the engine.
pub async fn log_event(
    db: &LibraryDatabase,
    game_id: Option<&str>,
    event_type: EventLogType,
    message: impl Into<String>,
) -> DatabaseResult<()> {
    let event = EventLog {
        id: uuid::Uuid::new_v4().to_string(),
        game_id: game_id.map(str::to_string),
        event_type,
        message: message.into(),
        created_at: Utc::now(),
    };
    db.append_event(event).await
}
