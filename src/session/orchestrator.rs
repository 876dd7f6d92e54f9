use serde::Serialize;

use crate::models::{Participant, Roster};
use crate::ws::{RoomEvent, RoomIntent};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum SessionPhase {
    #[default]
    NotJoined,
    Joining,
    Joined,
}

/// What the orchestrator wants done after a transition.
///
/// `Send` goes back out on the channel; everything else is for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEffect {
    Send(RoomIntent),
    /// Open the room page; it calls `enter_room` once mounted.
    Navigate { room_id: String },
    ShowError { reason: String },
    RosterUpdated(Vec<Participant>),
    RoomAvailable { room_id: String },
    RoomUnavailable { room_id: Option<String>, reason: String },
}

/// Room lifecycle of one client: NotJoined -> Joining -> Joined.
///
/// Pure state machine. Callers feed it user actions and inbound events and
/// carry out the returned effects.
#[derive(Debug)]
pub struct SessionOrchestrator {
    user_id: String,
    phase: SessionPhase,
    /// Room we sent `Join` for, or are in.
    room_id: Option<String>,
    awaiting_create: bool,
    /// `Create` or `Join` that has not reached the current socket yet.
    unsent: Option<RoomIntent>,
    navigated_to: Option<String>,
    verifying: Option<String>,
    roster: Roster,
    last_error: Option<String>,
}

impl SessionOrchestrator {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            phase: SessionPhase::NotJoined,
            room_id: None,
            awaiting_create: false,
            unsent: None,
            navigated_to: None,
            verifying: None,
            roster: Roster::new(),
            last_error: None,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub fn roster(&self) -> &Roster {
        &self.roster
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// User asked for a new room.
    pub fn create_room(&mut self) -> Vec<SessionEffect> {
        self.phase = SessionPhase::Joining;
        self.room_id = None;
        self.awaiting_create = true;
        self.unsent = None;
        self.last_error = None;
        vec![SessionEffect::Send(RoomIntent::Create)]
    }

    /// The room page for `room_id` mounted.
    pub fn enter_room(&mut self, room_id: &str) -> Vec<SessionEffect> {
        let same_room = self.room_id.as_deref() == Some(room_id);
        if same_room && self.phase != SessionPhase::NotJoined {
            if matches!(self.unsent, Some(RoomIntent::Join { .. })) {
                tracing::debug!(room_id = %room_id, "Retrying Join that never went out");
                return self.unsent.take().map(SessionEffect::Send).into_iter().collect();
            }
            tracing::debug!(room_id = %room_id, phase = ?self.phase, "Already entering room");
            return Vec::new();
        }

        self.phase = SessionPhase::Joining;
        self.room_id = Some(room_id.to_string());
        self.awaiting_create = false;
        self.unsent = None;
        self.last_error = None;
        self.roster.clear();

        vec![SessionEffect::Send(RoomIntent::join(room_id, &self.user_id))]
    }

    /// Ask the server whether `room_id` exists. Does not change the phase.
    pub fn verify_room(&mut self, room_id: &str) -> Vec<SessionEffect> {
        self.verifying = Some(room_id.to_string());
        vec![SessionEffect::Send(RoomIntent::VerifyRoom {
            room: room_id.to_string(),
        })]
    }

    /// Back to NotJoined, forgetting the room.
    pub fn leave(&mut self) {
        if let Some(room_id) = &self.room_id {
            tracing::info!(room_id = %room_id, "Leaving room");
        }
        self.phase = SessionPhase::NotJoined;
        self.room_id = None;
        self.awaiting_create = false;
        self.unsent = None;
        self.navigated_to = None;
        self.roster.clear();
    }

    /// `intent` could not be queued on the channel. A `Create` or `Join` the
    /// session still waits on is held and goes out when the channel reopens.
    pub fn send_failed(&mut self, intent: &RoomIntent) {
        let pending = match intent {
            RoomIntent::Create => self.awaiting_create,
            RoomIntent::Join { room, .. } => {
                self.phase == SessionPhase::Joining && self.room_id.as_deref() == Some(room)
            }
            _ => false,
        };
        if pending {
            tracing::info!(msg_type = intent.msg_type(), "Holding intent until the channel opens");
            self.unsent = Some(intent.clone());
        }
    }

    /// The socket went away. Whatever the server knew about this client went
    /// with it, so the room has to be joined again on the next socket.
    pub fn channel_lost(&mut self) {
        if self.phase == SessionPhase::NotJoined || self.unsent.is_some() {
            return;
        }
        if self.awaiting_create {
            self.unsent = Some(RoomIntent::Create);
            return;
        }
        if let Some(room_id) = &self.room_id {
            tracing::info!(room_id = %room_id, phase = ?self.phase, "Channel lost, will rejoin");
            self.phase = SessionPhase::Joining;
            self.unsent = Some(RoomIntent::join(room_id, &self.user_id));
        }
    }

    /// A socket opened; replay the held `Create` or `Join`, if any.
    pub fn channel_reopened(&mut self) -> Vec<SessionEffect> {
        let Some(intent) = self.unsent.take() else {
            return Vec::new();
        };
        tracing::info!(
            msg_type = intent.msg_type(),
            room_id = ?self.room_id,
            "Replaying intent on new socket"
        );
        vec![SessionEffect::Send(intent)]
    }

    /// Some inbound events were lost. Ask again for the state they carried.
    pub fn resync(&mut self) -> Vec<SessionEffect> {
        match (&self.phase, &self.room_id) {
            (SessionPhase::Joined, Some(room_id)) if self.unsent.is_none() => vec![
                SessionEffect::Send(RoomIntent::list_participants(room_id.clone())),
            ],
            _ => Vec::new(),
        }
    }

    pub fn handle_event(&mut self, event: &RoomEvent) -> Vec<SessionEffect> {
        match event {
            RoomEvent::CreateOk { room_id } => self.on_created(room_id),
            RoomEvent::JoinOk { room } => self.on_joined(room.as_deref()),
            RoomEvent::ParticipantsList { participants } => {
                self.roster.replace(participants.clone());
                vec![SessionEffect::RosterUpdated(
                    self.roster.participants().to_vec(),
                )]
            }
            RoomEvent::PeerJoined { user_id } => {
                if self.roster.add(Participant::new(user_id.clone())) {
                    vec![SessionEffect::RosterUpdated(
                        self.roster.participants().to_vec(),
                    )]
                } else {
                    Vec::new()
                }
            }
            RoomEvent::Error { reason } => {
                tracing::warn!(
                    phase = ?self.phase,
                    room_id = ?self.room_id,
                    reason = %reason,
                    "Server rejected room request"
                );
                self.phase = SessionPhase::NotJoined;
                self.room_id = None;
                self.awaiting_create = false;
                self.unsent = None;
                self.navigated_to = None;
                self.last_error = Some(reason.clone());
                vec![SessionEffect::ShowError {
                    reason: reason.clone(),
                }]
            }
            RoomEvent::VerifySuccess { room } => {
                self.verifying = None;
                vec![SessionEffect::RoomAvailable {
                    room_id: room.clone(),
                }]
            }
            RoomEvent::VerifyError { error } => vec![SessionEffect::RoomUnavailable {
                room_id: self.verifying.take(),
                reason: error.clone(),
            }],
        }
    }

    fn on_created(&mut self, room_id: &str) -> Vec<SessionEffect> {
        if self.navigated_to.as_deref() == Some(room_id) {
            tracing::debug!(room_id = %room_id, "Duplicate CreateOk ignored");
            return Vec::new();
        }
        if self.phase == SessionPhase::Joined {
            tracing::debug!(room_id = %room_id, "CreateOk while in a room ignored");
            return Vec::new();
        }

        tracing::info!(room_id = %room_id, "Room created");
        self.phase = SessionPhase::Joining;
        self.awaiting_create = false;
        self.navigated_to = Some(room_id.to_string());

        vec![SessionEffect::Navigate {
            room_id: room_id.to_string(),
        }]
    }

    fn on_joined(&mut self, confirmed: Option<&str>) -> Vec<SessionEffect> {
        if self.phase != SessionPhase::Joining || self.awaiting_create || self.unsent.is_some() {
            tracing::debug!(phase = ?self.phase, "JoinOk ignored");
            return Vec::new();
        }
        let Some(room_id) = self.room_id.clone() else {
            tracing::debug!("JoinOk before any Join was sent");
            return Vec::new();
        };
        if confirmed.is_some_and(|room| room != room_id) {
            tracing::debug!(
                room_id = %room_id,
                confirmed = ?confirmed,
                "JoinOk for another room ignored"
            );
            return Vec::new();
        }

        tracing::info!(room_id = %room_id, user_id = %self.user_id, "Joined room");
        self.phase = SessionPhase::Joined;
        vec![SessionEffect::Send(RoomIntent::list_participants(room_id))]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn created(room_id: &str) -> RoomEvent {
        RoomEvent::CreateOk {
            room_id: room_id.to_string(),
        }
    }

    fn join_ok() -> RoomEvent {
        RoomEvent::JoinOk { room: None }
    }

    fn list_requests(effects: &[SessionEffect]) -> usize {
        effects
            .iter()
            .filter(|e| matches!(e, SessionEffect::Send(RoomIntent::ListParticipants { .. })))
            .count()
    }

    #[test]
    fn test_create_then_join_flow() {
        let mut session = SessionOrchestrator::new("u1");

        assert_eq!(
            session.create_room(),
            vec![SessionEffect::Send(RoomIntent::Create)]
        );
        assert_eq!(session.phase(), SessionPhase::Joining);

        assert_eq!(
            session.handle_event(&created("7")),
            vec![SessionEffect::Navigate {
                room_id: "7".to_string()
            }]
        );

        assert_eq!(
            session.enter_room("7"),
            vec![SessionEffect::Send(RoomIntent::join("7", "u1"))]
        );

        assert_eq!(
            session.handle_event(&join_ok()),
            vec![SessionEffect::Send(RoomIntent::list_participants("7"))]
        );
        assert_eq!(session.phase(), SessionPhase::Joined);
        assert_eq!(session.room_id(), Some("7"));
    }

    #[test]
    fn test_create_ok_from_not_joined_navigates() {
        let mut session = SessionOrchestrator::new("u1");
        let effects = session.handle_event(&created("7"));
        assert_eq!(session.phase(), SessionPhase::Joining);
        assert_eq!(
            effects,
            vec![SessionEffect::Navigate {
                room_id: "7".to_string()
            }]
        );
    }

    #[test]
    fn test_duplicate_create_ok_navigates_once() {
        let mut session = SessionOrchestrator::new("u1");
        session.create_room();
        assert_eq!(session.handle_event(&created("7")).len(), 1);
        assert!(session.handle_event(&created("7")).is_empty());
    }

    #[test]
    fn test_duplicate_join_ok_lists_once() {
        let mut session = SessionOrchestrator::new("u1");
        session.enter_room("7");

        let mut effects = session.handle_event(&join_ok());
        effects.extend(session.handle_event(&join_ok()));

        assert_eq!(list_requests(&effects), 1);
        assert_eq!(session.phase(), SessionPhase::Joined);
    }

    #[test]
    fn test_enter_same_room_twice_sends_one_join() {
        let mut session = SessionOrchestrator::new("u1");
        assert_eq!(session.enter_room("7").len(), 1);
        assert!(session.enter_room("7").is_empty());

        session.handle_event(&join_ok());
        assert!(session.enter_room("7").is_empty());
    }

    #[test]
    fn test_join_ok_for_other_room_ignored() {
        let mut session = SessionOrchestrator::new("u1");
        session.enter_room("7");
        let effects = session.handle_event(&RoomEvent::JoinOk {
            room: Some("8".to_string()),
        });
        assert!(effects.is_empty());
        assert_eq!(session.phase(), SessionPhase::Joining);
    }

    #[test]
    fn test_error_resets_and_surfaces_reason() {
        let mut session = SessionOrchestrator::new("u1");
        session.enter_room("7");
        session.handle_event(&join_ok());

        let effects = session.handle_event(&RoomEvent::Error {
            reason: "Room closed".to_string(),
        });

        assert_eq!(
            effects,
            vec![SessionEffect::ShowError {
                reason: "Room closed".to_string()
            }]
        );
        assert_eq!(session.phase(), SessionPhase::NotJoined);
        assert_eq!(session.room_id(), None);
        assert_eq!(session.last_error(), Some("Room closed"));

        // the same room can be entered again after an error
        assert_eq!(session.enter_room("7").len(), 1);
    }

    #[test]
    fn test_roster_updates() {
        let mut session = SessionOrchestrator::new("u1");
        session.enter_room("7");
        session.handle_event(&join_ok());

        session.handle_event(&RoomEvent::ParticipantsList {
            participants: vec![Participant::new("u1"), Participant::new("u2")],
        });
        assert_eq!(session.roster().len(), 2);

        let effects = session.handle_event(&RoomEvent::PeerJoined {
            user_id: "u3".to_string(),
        });
        assert_eq!(effects.len(), 1);
        assert!(session.roster().contains("u3"));

        assert!(session
            .handle_event(&RoomEvent::PeerJoined {
                user_id: "u3".to_string()
            })
            .is_empty());
    }

    #[test]
    fn test_join_dropped_before_open_is_retried() {
        let mut session = SessionOrchestrator::new("u1");

        let join = RoomIntent::join("7", "u1");
        assert_eq!(session.enter_room("7"), vec![SessionEffect::Send(join.clone())]);
        session.send_failed(&join);
        assert_eq!(session.phase(), SessionPhase::Joining);

        // the page retries; the held Join goes out once
        assert_eq!(session.enter_room("7"), vec![SessionEffect::Send(join)]);
        assert!(session.enter_room("7").is_empty());
        assert!(session.channel_reopened().is_empty());

        session.handle_event(&join_ok());
        assert_eq!(session.phase(), SessionPhase::Joined);
    }

    #[test]
    fn test_held_join_replayed_on_open() {
        let mut session = SessionOrchestrator::new("u1");
        let join = RoomIntent::join("7", "u1");
        session.enter_room("7");
        session.send_failed(&join);

        // a JoinOk cannot answer a Join that never left
        assert!(session.handle_event(&join_ok()).is_empty());

        assert_eq!(session.channel_reopened(), vec![SessionEffect::Send(join)]);
        assert!(session.enter_room("7").is_empty());
    }

    #[test]
    fn test_failed_send_of_stale_join_not_held() {
        let mut session = SessionOrchestrator::new("u1");
        session.enter_room("8");
        session.send_failed(&RoomIntent::join("7", "u1"));
        session.send_failed(&RoomIntent::list_participants("8"));
        assert!(session.channel_reopened().is_empty());
    }

    #[test]
    fn test_rejoin_after_channel_lost() {
        let mut session = SessionOrchestrator::new("u1");
        session.enter_room("7");
        session.handle_event(&join_ok());

        session.channel_lost();
        assert_eq!(session.phase(), SessionPhase::Joining);
        assert_eq!(session.room_id(), Some("7"));

        // repeated loss while still down changes nothing
        session.channel_lost();

        assert_eq!(
            session.channel_reopened(),
            vec![SessionEffect::Send(RoomIntent::join("7", "u1"))]
        );
        assert_eq!(list_requests(&session.handle_event(&join_ok())), 1);
        assert_eq!(session.phase(), SessionPhase::Joined);
    }

    #[test]
    fn test_channel_lost_outside_room_is_noop() {
        let mut session = SessionOrchestrator::new("u1");
        session.channel_lost();
        assert_eq!(session.phase(), SessionPhase::NotJoined);
        assert!(session.channel_reopened().is_empty());
    }

    #[test]
    fn test_create_in_flight_is_replayed() {
        let mut session = SessionOrchestrator::new("u1");
        session.create_room();
        session.channel_lost();
        assert_eq!(
            session.channel_reopened(),
            vec![SessionEffect::Send(RoomIntent::Create)]
        );
    }

    #[test]
    fn test_resync_lists_participants_when_joined() {
        let mut session = SessionOrchestrator::new("u1");
        assert!(session.resync().is_empty());

        session.enter_room("7");
        assert!(session.resync().is_empty());

        session.handle_event(&join_ok());
        assert_eq!(
            session.resync(),
            vec![SessionEffect::Send(RoomIntent::list_participants("7"))]
        );
    }

    #[test]
    fn test_verify_room() {
        let mut session = SessionOrchestrator::new("u1");

        session.verify_room("7");
        assert_eq!(
            session.handle_event(&RoomEvent::VerifyError {
                error: "Room not found".to_string()
            }),
            vec![SessionEffect::RoomUnavailable {
                room_id: Some("7".to_string()),
                reason: "Room not found".to_string()
            }]
        );

        session.verify_room("8");
        assert_eq!(
            session.handle_event(&RoomEvent::VerifySuccess {
                room: "8".to_string()
            }),
            vec![SessionEffect::RoomAvailable {
                room_id: "8".to_string()
            }]
        );
        assert_eq!(session.phase(), SessionPhase::NotJoined);
    }
}
