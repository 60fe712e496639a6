use serde::Serialize;
use time::{Duration, OffsetDateTime, format_description::well_known::Rfc3339};
use uuid::Uuid;

use crate::state::room::{ParticipantRole, ParticipantStatus, RoomSnapshot};

/// Event name carried by every room-state broadcast.
pub const EVENT_ROOM_STATE_UPDATE: &str = "room_state_update";

/// Dispatched payload carried across room channels.
#[derive(Clone, Debug)]
pub struct ServerEvent {
    /// Optional event name; clients dispatch on it.
    pub event: Option<String>,
    /// Serialized JSON payload.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

/// Participant record as it appears on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRecord {
    /// Stable participant identifier.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Queue position state.
    pub status: ParticipantStatus,
    /// Organizer or guest.
    pub role: ParticipantRole,
    /// RFC 3339 join time.
    pub joined_at: String,
    /// RFC 3339 last-mutation time.
    pub last_updated_at: String,
    /// RFC 3339 time of the last selection, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_selected_at: Option<String>,
}

/// Wheel portion of the broadcast payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WheelState {
    /// Whether the wheel is currently spinning.
    pub is_spinning: bool,
    /// Participant the wheel settled on, once a spin has completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_participant: Option<Uuid>,
    /// Duration of the completed spin in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spin_duration: Option<u64>,
    /// RFC 3339 time the spin started, while spinning.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spin_start_time: Option<String>,
}

/// Countdown portion of the broadcast payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimerState {
    /// Whether the presentation countdown is running.
    pub is_active: bool,
    /// Elapsed presentation time in milliseconds, clamped to `max_time`.
    pub current_time: u64,
    /// Full presentation duration in milliseconds.
    pub max_time: u64,
    /// Presenter the countdown applies to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<Uuid>,
    /// RFC 3339 countdown start time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// RFC 3339 countdown end time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
}

/// Full `room_state_update` payload; the bit-exact contract clients parse.
///
/// Optional fields are omitted (not nulled) when absent.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomStateUpdate {
    /// Room identifier.
    pub room_id: Uuid,
    /// RFC 3339 emission time.
    pub timestamp: String,
    /// Every participant in room order.
    pub participants: Vec<ParticipantRecord>,
    /// Presenter currently on stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_presenter: Option<Uuid>,
    /// Wheel state derived from the snapshot.
    pub wheel_state: WheelState,
    /// Countdown state derived from the snapshot.
    pub timer_state: TimerState,
    /// Whether a session is live (active or paused).
    pub session_active: bool,
}

impl RoomStateUpdate {
    /// Derive the wire payload from a snapshot.
    ///
    /// `presentation_time` supplies `timerState.maxTime`; `now` stamps the
    /// payload and anchors the elapsed countdown computation.
    pub fn from_snapshot(
        snapshot: &RoomSnapshot,
        presentation_time: std::time::Duration,
        now: OffsetDateTime,
    ) -> Self {
        let participants = snapshot
            .participants
            .iter()
            .map(|(id, participant)| ParticipantRecord {
                id: *id,
                name: participant.name.clone(),
                status: participant.status,
                role: participant.role,
                joined_at: rfc3339(participant.joined_at),
                last_updated_at: rfc3339(participant.last_updated_at),
                last_selected_at: participant.last_selected_at.map(rfc3339),
            })
            .collect();

        Self {
            room_id: snapshot.id,
            timestamp: rfc3339(now),
            participants,
            current_presenter: snapshot.current_presenter_id,
            wheel_state: wheel_state(snapshot),
            timer_state: timer_state(snapshot, presentation_time, now),
            session_active: snapshot.session_active(),
        }
    }
}

fn wheel_state(snapshot: &RoomSnapshot) -> WheelState {
    if snapshot.is_spinning() {
        return WheelState {
            is_spinning: true,
            selected_participant: None,
            spin_duration: None,
            spin_start_time: Some(rfc3339(snapshot.last_updated_at)),
        };
    }

    // A settled wheel reports the presenter and the spin that produced it.
    let selection = snapshot
        .current_presenter_id
        .and_then(|presenter| {
            snapshot
                .latest_selection()
                .filter(|entry| entry.participant_id == presenter)
        });
    WheelState {
        is_spinning: false,
        selected_participant: snapshot.current_presenter_id,
        spin_duration: selection.map(|entry| entry.spin_duration_ms),
        spin_start_time: None,
    }
}

fn timer_state(
    snapshot: &RoomSnapshot,
    presentation_time: std::time::Duration,
    now: OffsetDateTime,
) -> TimerState {
    let max_time = presentation_time.as_millis() as u64;
    if !snapshot.timer_active() {
        return TimerState {
            is_active: false,
            current_time: 0,
            max_time,
            participant_id: None,
            start_time: None,
            end_time: None,
        };
    }

    let presenter = snapshot.current_presenter_id;
    let started_at = presenter
        .and_then(|id| {
            snapshot
                .latest_selection()
                .filter(|entry| entry.participant_id == id)
                .map(|entry| entry.selected_at)
        })
        .unwrap_or(snapshot.last_updated_at);
    let elapsed_ms = (now - started_at)
        .max(Duration::ZERO)
        .whole_milliseconds()
        .min(max_time as i128) as u64;

    TimerState {
        is_active: true,
        current_time: elapsed_ms,
        max_time,
        participant_id: presenter,
        start_time: Some(rfc3339(started_at)),
        end_time: Some(rfc3339(started_at + Duration::milliseconds(max_time as i64))),
    }
}

fn rfc3339(timestamp: OffsetDateTime) -> String {
    timestamp
        .format(&Rfc3339)
        .unwrap_or_else(|_| timestamp.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::room::test_fixtures::snapshot_with;
    use crate::state::room::{RoomStatus, SelectionEntry};

    #[test]
    fn idle_room_serializes_without_optional_fields() {
        let (_, snapshot) = snapshot_with(RoomStatus::Waiting, &[]);
        let payload = RoomStateUpdate::from_snapshot(
            &snapshot,
            std::time::Duration::from_secs(300),
            OffsetDateTime::now_utc(),
        );
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["roomId"], snapshot.id.to_string());
        assert_eq!(json["sessionActive"], false);
        assert_eq!(json["wheelState"]["isSpinning"], false);
        assert!(json["wheelState"].get("selectedParticipant").is_none());
        assert!(json.get("currentPresenter").is_none());
        assert_eq!(json["timerState"]["isActive"], false);
        assert_eq!(json["timerState"]["maxTime"], 300_000);
        assert!(json["timerState"].get("startTime").is_none());
    }

    #[test]
    fn presenting_room_reports_wheel_and_timer() {
        let (organizer, mut snapshot) = snapshot_with(RoomStatus::Active, &["guest"]);
        let presenter = *snapshot.participants.keys().nth(1).unwrap();
        let selected_at = snapshot.last_updated_at;
        snapshot.current_presenter_id = Some(presenter);
        snapshot.selection_history.push(SelectionEntry {
            id: Uuid::new_v4(),
            participant_id: presenter,
            participant_name: "guest".into(),
            initiated_by: organizer,
            selected_at,
            spin_duration_ms: 4200,
        });

        let now = selected_at + Duration::seconds(10);
        let payload =
            RoomStateUpdate::from_snapshot(&snapshot, std::time::Duration::from_secs(300), now);
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["currentPresenter"], presenter.to_string());
        assert_eq!(json["wheelState"]["isSpinning"], false);
        assert_eq!(json["wheelState"]["selectedParticipant"], presenter.to_string());
        assert_eq!(json["wheelState"]["spinDuration"], 4200);
        assert_eq!(json["timerState"]["isActive"], true);
        assert_eq!(json["timerState"]["currentTime"], 10_000);
        assert_eq!(json["timerState"]["participantId"], presenter.to_string());
        assert_eq!(json["sessionActive"], true);
    }

    #[test]
    fn spinning_room_reports_spin_start() {
        let (_, mut snapshot) = snapshot_with(RoomStatus::Active, &["guest"]);
        snapshot.current_presenter_id = None;

        let payload = RoomStateUpdate::from_snapshot(
            &snapshot,
            std::time::Duration::from_secs(300),
            OffsetDateTime::now_utc(),
        );
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["wheelState"]["isSpinning"], true);
        assert!(json["wheelState"].get("selectedParticipant").is_none());
        assert!(json["wheelState"].get("spinStartTime").is_some());
        assert_eq!(json["timerState"]["isActive"], false);
    }
}
