//! Structural validation run before any broadcast side effect.

use validator::{ValidationError, ValidationErrors};

use crate::state::room::{ParticipantRole, RoomSnapshot};

/// Check a snapshot for structural soundness: required identity fields,
/// wheel-config bounds, well-formed participants, and exactly one organizer
/// matching `organizer_id`.
///
/// Business rules beyond structure (queue fairness, selection eligibility)
/// belong to the domain layer and are not checked here.
pub fn validate_snapshot(snapshot: &RoomSnapshot) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if snapshot.id.is_nil() {
        errors.add("id", code("room_id_nil", "room id must not be nil"));
    }

    let wheel = &snapshot.wheel_config;
    if wheel.min_spin_duration_ms >= wheel.max_spin_duration_ms {
        errors.add(
            "wheel_config",
            code(
                "spin_bounds",
                "min spin duration must be strictly below the max",
            ),
        );
    }

    let mut organizers = 0;
    for (id, participant) in &snapshot.participants {
        if participant.name.trim().is_empty() {
            errors.add(
                "participants",
                code("participant_name_empty", "participant name must not be empty"),
            );
        }
        if participant.role == ParticipantRole::Organizer {
            organizers += 1;
            if *id != snapshot.organizer_id {
                errors.add(
                    "organizer_id",
                    code(
                        "organizer_mismatch",
                        "organizer participant id must equal the room organizer id",
                    ),
                );
            }
        }
    }
    if organizers != 1 {
        errors.add(
            "participants",
            code(
                "organizer_count",
                "a room must have exactly one organizer participant",
            ),
        );
    }

    for entry in &snapshot.selection_history {
        if entry.participant_name.trim().is_empty() {
            errors.add(
                "selection_history",
                code(
                    "selection_name_empty",
                    "selection entries must carry the denormalized participant name",
                ),
            );
        }
    }

    if snapshot.expires_at <= snapshot.created_at {
        errors.add(
            "expires_at",
            code("expiry_ordering", "expiry must fall after creation"),
        );
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn code(name: &'static str, message: &'static str) -> ValidationError {
    let mut err = ValidationError::new(name);
    err.message = Some(message.into());
    err
}
