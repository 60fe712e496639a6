/// Wire-format event payloads pushed to room subscribers.
pub mod events;
