//! Tracking which events echo this participant's own commands.

use crate::messages::{CommandId, Event, ParticipationId};
use std::collections::HashSet;
use ulid::Ulid;

/// Issues command ids and recognizes events caused by them.
///
/// An event is "own" when every command it originated from was sent through
/// this tracker under the current participation. Its effects are already in
/// the local forest and must not be applied a second time.
#[derive(Clone, Debug)]
pub struct ParticipationTracker {
    participation_id: Option<ParticipationId>,
    prefix: String,
    issued: u64,
    in_flight: HashSet<CommandId>,
}

impl Default for ParticipationTracker {
    fn default() -> Self {
        Self::new(Ulid::new().to_string())
    }
}

impl ParticipationTracker {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            participation_id: None,
            prefix: prefix.into(),
            issued: 0,
            in_flight: HashSet::new(),
        }
    }

    pub fn participation_id(&self) -> Option<&str> {
        self.participation_id.as_deref()
    }

    /// Record the participation granted by the authority on sign-on.
    pub fn set_participation(&mut self, participation_id: impl Into<ParticipationId>) {
        self.participation_id = Some(participation_id.into());
    }

    pub fn next_command_id(&mut self) -> CommandId {
        self.issued += 1;
        format!("{}-{}", self.prefix, self.issued)
    }

    /// Remember a command as sent and not yet confirmed.
    pub fn register(&mut self, command_id: impl Into<CommandId>) {
        self.in_flight.insert(command_id.into());
    }

    pub fn is_own(&self, event: &Event) -> bool {
        let Some(me) = &self.participation_id else {
            return false;
        };
        !event.originating_commands.is_empty()
            && event
                .originating_commands
                .iter()
                .all(|source| &source.participation_id == me && self.in_flight.contains(&source.command_id))
    }

    /// Forget the in-flight commands an event confirms. Returns how many.
    pub fn acknowledge(&mut self, event: &Event) -> usize {
        let Some(me) = &self.participation_id else {
            return 0;
        };
        event
            .originating_commands
            .iter()
            .filter(|source| &source.participation_id == me)
            .filter(|source| self.in_flight.remove(&source.command_id))
            .count()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}
