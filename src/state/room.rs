use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle status of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    /// Room exists, no presentation session has started yet.
    Waiting,
    /// A session is running (spinning or presenting).
    Active,
    /// The session is paused by the organizer.
    Paused,
    /// Every planned presentation has finished.
    Completed,
    /// The room outlived its TTL and is pending cleanup.
    Expired,
}

/// Where a participant stands in the presentation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// Eligible for selection, has not presented yet.
    Queued,
    /// Currently presenting.
    Active,
    /// Already presented.
    Finished,
    /// Temporarily excluded from selection.
    Disabled,
}

/// Role flag distinguishing the room owner from everyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    /// The single room owner; its id equals [`RoomSnapshot::organizer_id`].
    Organizer,
    /// Any other participant.
    Guest,
}

/// Wheel behaviour knobs configured per room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelConfig {
    /// Lower bound for the spin animation duration.
    pub min_spin_duration_ms: u64,
    /// Upper bound for the spin animation duration (strictly above the min).
    pub max_spin_duration_ms: u64,
    /// Skip participants that already presented.
    pub exclude_finished: bool,
    /// Allow the same participant to be selected twice in a row.
    pub allow_repeat: bool,
}

/// Participant data tracked inside a room, keyed by its id in
/// [`RoomSnapshot::participants`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Display name chosen when joining.
    pub name: String,
    /// Queue position state.
    pub status: ParticipantStatus,
    /// Organizer or guest.
    pub role: ParticipantRole,
    /// When the participant joined the room.
    #[serde(with = "time::serde::rfc3339")]
    pub joined_at: OffsetDateTime,
    /// Last mutation affecting this participant.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_at: OffsetDateTime,
    /// Last time the wheel landed on this participant, if ever.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_selected_at: Option<OffsetDateTime>,
}

/// Immutable historical record of a single wheel selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionEntry {
    /// Identifier of this history entry.
    pub id: Uuid,
    /// Participant the wheel landed on.
    pub participant_id: Uuid,
    /// Name denormalized at selection time so history survives renames.
    pub participant_name: String,
    /// Participant who triggered the spin.
    pub initiated_by: Uuid,
    /// When the selection happened.
    #[serde(with = "time::serde::rfc3339")]
    pub selected_at: OffsetDateTime,
    /// How long the spin animation ran.
    pub spin_duration_ms: u64,
}

/// Complete, self-contained view of a room at one instant.
///
/// Snapshots are produced by the domain layer after every mutation and handed
/// to the broadcaster; the durable store keeps the serialized form under a
/// TTL-bound key and is the only system of record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    /// Stable room identifier, also the channel and store key suffix.
    pub id: Uuid,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Id of the single organizer participant.
    pub organizer_id: Uuid,
    /// Presenter currently on stage, absent while idle or spinning.
    pub current_presenter_id: Option<Uuid>,
    /// Ordered, id-unique participant list.
    pub participants: IndexMap<Uuid, Participant>,
    /// Wheel behaviour for this room.
    pub wheel_config: WheelConfig,
    /// Append-only record of past selections.
    pub selection_history: Vec<SelectionEntry>,
    /// Room creation time.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last mutation time.
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated_at: OffsetDateTime,
    /// Always `created_at + room TTL`; refreshed by re-setting the store key
    /// on every write, never extended independently.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,
}

impl RoomSnapshot {
    /// Whether the wheel is considered spinning: the session is active but no
    /// presenter has been settled on yet.
    pub fn is_spinning(&self) -> bool {
        self.status == RoomStatus::Active && self.current_presenter_id.is_none()
    }

    /// Whether the countdown timer is considered running: the session is
    /// active and a presenter is on stage.
    pub fn timer_active(&self) -> bool {
        self.status == RoomStatus::Active && self.current_presenter_id.is_some()
    }

    /// Whether the room has a live session from a client's point of view.
    /// A paused session still counts as active.
    pub fn session_active(&self) -> bool {
        matches!(self.status, RoomStatus::Active | RoomStatus::Paused)
    }

    /// Most recent selection, if any spin has completed.
    pub fn latest_selection(&self) -> Option<&SelectionEntry> {
        self.selection_history.last()
    }
}
