//! Pure diffing of successive room snapshots.
//!
//! The differ decides whether a broadcast carries information at all, so its
//! output drives the skip-unchanged optimization in the broadcaster. It is
//! side-effect free and O(participant count).

use uuid::Uuid;

use crate::state::room::{Participant, RoomSnapshot, SelectionEntry};

/// How one participant differs between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantChange {
    /// Present only in the current snapshot.
    Added {
        /// Participant id.
        id: Uuid,
        /// Current participant data.
        participant: Participant,
    },
    /// Present only in the previous snapshot.
    Removed {
        /// Participant id.
        id: Uuid,
    },
    /// Present in both with a differing name, status, role, or update stamp.
    Updated {
        /// Participant id.
        id: Uuid,
        /// Current participant data.
        participant: Participant,
    },
}

impl ParticipantChange {
    /// Participant id the change refers to.
    pub fn id(&self) -> Uuid {
        match self {
            Self::Added { id, .. } | Self::Removed { id } | Self::Updated { id, .. } => *id,
        }
    }
}

/// Wheel-state transition derived from status/presenter/history movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelTransition {
    /// Spinning flag before.
    pub was_spinning: bool,
    /// Spinning flag now.
    pub is_spinning: bool,
    /// Presenter before.
    pub previous_selected: Option<Uuid>,
    /// Presenter now.
    pub selected: Option<Uuid>,
    /// Whether the derived selection target changed.
    pub selected_participant_changed: bool,
    /// Selection entry appended since the previous snapshot, if any.
    pub new_selection: Option<SelectionEntry>,
}

/// Timer-state transition derived from status and presenter movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerTransition {
    /// Countdown running before.
    pub was_active: bool,
    /// Countdown running now.
    pub is_active: bool,
    /// Whether elapsed time resets to zero (a fresh selection landed on the
    /// current presenter).
    pub reset: bool,
    /// Presenter the countdown applies to now.
    pub participant_id: Option<Uuid>,
}

/// Before/after pair for a boolean room property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlagTransition {
    /// Value before.
    pub was: bool,
    /// Value now.
    pub now: bool,
}

/// Before/after pair for the presenter id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenterChange {
    /// Presenter before.
    pub previous: Option<Uuid>,
    /// Presenter now.
    pub current: Option<Uuid>,
}

/// Structured, minimal difference between two snapshots of one room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StateDiff {
    /// Whether anything below changed at all.
    pub has_changes: bool,
    /// Per-participant adds/removes/updates.
    pub participant_changes: Vec<ParticipantChange>,
    /// Wheel transition, when the derived wheel state moved.
    pub wheel: Option<WheelTransition>,
    /// Timer transition, when the derived timer state moved.
    pub timer: Option<TimerTransition>,
    /// Session-active flip, when it flipped.
    pub session_active: Option<FlagTransition>,
    /// Presenter change, when the presenter id moved.
    pub presenter: Option<PresenterChange>,
}

/// Compute the structured diff between `previous` and `current`.
///
/// A `None` previous snapshot is the first-ever observation: every
/// participant is reported as added, non-default derived states are reported
/// as set, and `has_changes` is true unconditionally.
pub fn diff(previous: Option<&RoomSnapshot>, current: &RoomSnapshot) -> StateDiff {
    let Some(previous) = previous else {
        return first_observation(current);
    };

    let participant_changes = diff_participants(previous, current);
    let wheel = wheel_transition(previous, current);
    let timer = timer_transition(previous, current);
    let session_active = (previous.session_active() != current.session_active()).then(|| {
        FlagTransition {
            was: previous.session_active(),
            now: current.session_active(),
        }
    });
    let presenter = (previous.current_presenter_id != current.current_presenter_id).then(|| {
        PresenterChange {
            previous: previous.current_presenter_id,
            current: current.current_presenter_id,
        }
    });

    let has_changes = !participant_changes.is_empty()
        || wheel.is_some()
        || timer.is_some()
        || session_active.is_some()
        || presenter.is_some();

    StateDiff {
        has_changes,
        participant_changes,
        wheel,
        timer,
        session_active,
        presenter,
    }
}

fn first_observation(current: &RoomSnapshot) -> StateDiff {
    let participant_changes = current
        .participants
        .iter()
        .map(|(id, participant)| ParticipantChange::Added {
            id: *id,
            participant: participant.clone(),
        })
        .collect();

    let wheel = (current.is_spinning() || current.current_presenter_id.is_some()).then(|| {
        WheelTransition {
            was_spinning: false,
            is_spinning: current.is_spinning(),
            previous_selected: None,
            selected: current.current_presenter_id,
            selected_participant_changed: current.current_presenter_id.is_some(),
            new_selection: current.latest_selection().cloned(),
        }
    });
    let timer = current.timer_active().then(|| TimerTransition {
        was_active: false,
        is_active: true,
        reset: true,
        participant_id: current.current_presenter_id,
    });
    let session_active = current.session_active().then(|| FlagTransition {
        was: false,
        now: true,
    });
    let presenter = current.current_presenter_id.map(|id| PresenterChange {
        previous: None,
        current: Some(id),
    });

    StateDiff {
        has_changes: true,
        participant_changes,
        wheel,
        timer,
        session_active,
        presenter,
    }
}

/// Id-matched participant comparison. Equality is field-wise over
/// `(name, status, role, last_updated_at)` so the per-participant check stays
/// O(1) instead of deep-structural.
fn diff_participants(previous: &RoomSnapshot, current: &RoomSnapshot) -> Vec<ParticipantChange> {
    let mut changes = Vec::new();

    for (id, participant) in &current.participants {
        match previous.participants.get(id) {
            None => changes.push(ParticipantChange::Added {
                id: *id,
                participant: participant.clone(),
            }),
            Some(before) => {
                let updated = before.name != participant.name
                    || before.status != participant.status
                    || before.role != participant.role
                    || before.last_updated_at != participant.last_updated_at;
                if updated {
                    changes.push(ParticipantChange::Updated {
                        id: *id,
                        participant: participant.clone(),
                    });
                }
            }
        }
    }

    for id in previous.participants.keys() {
        if !current.participants.contains_key(id) {
            changes.push(ParticipantChange::Removed { id: *id });
        }
    }

    changes
}

fn wheel_transition(previous: &RoomSnapshot, current: &RoomSnapshot) -> Option<WheelTransition> {
    let was_spinning = previous.is_spinning();
    let is_spinning = current.is_spinning();
    let selection_grew = current.selection_history.len() > previous.selection_history.len();
    let presenter_moved = previous.current_presenter_id != current.current_presenter_id;

    if was_spinning == is_spinning && !selection_grew && !presenter_moved {
        return None;
    }

    Some(WheelTransition {
        was_spinning,
        is_spinning,
        previous_selected: previous.current_presenter_id,
        selected: current.current_presenter_id,
        selected_participant_changed: presenter_moved,
        new_selection: selection_grew.then(|| current.latest_selection().cloned()).flatten(),
    })
}

fn timer_transition(previous: &RoomSnapshot, current: &RoomSnapshot) -> Option<TimerTransition> {
    let was_active = previous.timer_active();
    let is_active = current.timer_active();

    // A fresh selection landing on the current presenter restarts the
    // countdown even when the timer was already running.
    let selection_grew = current.selection_history.len() > previous.selection_history.len();
    let selection_for_presenter = selection_grew
        && current
            .latest_selection()
            .is_some_and(|entry| Some(entry.participant_id) == current.current_presenter_id);
    let reset = is_active && (selection_for_presenter || !was_active);

    if was_active == is_active && !reset {
        return None;
    }

    Some(TimerTransition {
        was_active,
        is_active,
        reset,
        participant_id: current.current_presenter_id,
    })
}
