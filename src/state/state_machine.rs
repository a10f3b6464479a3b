use thiserror::Error;

/// Lifecycle phases of a room, derived from its `started`/`finished` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomPhase {
    /// Lobby: players can join, nothing is scored yet.
    Waiting,
    /// Quiz running on the given question index.
    Live { question: usize },
    /// Terminal.
    Finished,
}

/// Host-issued events that move a room through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomEvent {
    /// Leave the lobby and open the first question.
    Start,
    /// Open the next question, or finish when the current one is the last.
    Advance { question_count: usize },
    /// End the quiz.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The phase the room was in when the invalid event was received.
    pub from: RoomPhase,
    /// The event that cannot be applied from this phase.
    pub event: RoomEvent,
}

impl RoomPhase {
    /// Derive the phase from the persisted flags.
    ///
    /// A started room whose question index is negative (never expected) is read as being on
    /// the first question rather than rejected, so it can still be advanced or finished.
    pub fn from_flags(started: bool, finished: bool, current_question: i32) -> Self {
        match (started, finished) {
            (_, true) => RoomPhase::Finished,
            (false, false) => RoomPhase::Waiting,
            (true, false) => RoomPhase::Live {
                question: usize::try_from(current_question).unwrap_or(0),
            },
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, RoomPhase::Live { .. })
    }

    /// Compute the phase reached by applying `event`.
    pub fn apply(self, event: RoomEvent) -> Result<RoomPhase, InvalidTransition> {
        let next = match (self, event) {
            (RoomPhase::Waiting, RoomEvent::Start) => RoomPhase::Live { question: 0 },
            (RoomPhase::Live { question }, RoomEvent::Advance { question_count })
                if question + 1 < question_count =>
            {
                RoomPhase::Live {
                    question: question + 1,
                }
            }
            (RoomPhase::Live { .. }, RoomEvent::Advance { .. }) => RoomPhase::Finished,
            (RoomPhase::Waiting | RoomPhase::Live { .. }, RoomEvent::Finish) => RoomPhase::Finished,
            // Finishing twice is benign.
            (RoomPhase::Finished, RoomEvent::Finish) => RoomPhase::Finished,
            (from, event) => return Err(InvalidTransition { from, event }),
        };

        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_happy_path_through_quiz() {
        let advance = RoomEvent::Advance { question_count: 2 };
        let phase = RoomPhase::Waiting;

        let phase = phase.apply(RoomEvent::Start).unwrap();
        assert_eq!(phase, RoomPhase::Live { question: 0 });
        let phase = phase.apply(advance).unwrap();
        assert_eq!(phase, RoomPhase::Live { question: 1 });
        let phase = phase.apply(advance).unwrap();
        assert_eq!(phase, RoomPhase::Finished);
    }

    #[test]
    fn flags_map_to_phases() {
        assert_eq!(RoomPhase::from_flags(false, false, -1), RoomPhase::Waiting);
        assert_eq!(
            RoomPhase::from_flags(true, false, 3),
            RoomPhase::Live { question: 3 }
        );
        assert_eq!(RoomPhase::from_flags(true, true, 3), RoomPhase::Finished);
    }

    #[test]
    fn starting_twice_is_rejected() {
        let live = RoomPhase::Live { question: 0 };
        let err = live.apply(RoomEvent::Start).unwrap_err();
        assert_eq!(err.from, live);
        assert_eq!(err.event, RoomEvent::Start);
    }

    #[test]
    fn waiting_rooms_cannot_advance() {
        let err = RoomPhase::Waiting
            .apply(RoomEvent::Advance { question_count: 3 })
            .unwrap_err();
        assert_eq!(err.from, RoomPhase::Waiting);
    }

    #[test]
    fn finished_is_terminal() {
        assert_eq!(
            RoomPhase::Finished.apply(RoomEvent::Finish),
            Ok(RoomPhase::Finished)
        );
        assert!(RoomPhase::Finished.apply(RoomEvent::Start).is_err());
        assert!(
            RoomPhase::Finished
                .apply(RoomEvent::Advance { question_count: 5 })
                .is_err()
        );
    }
}
