use serde::{Deserialize, Serialize};

/// One entry of a participant list.
///
/// The signaling service sends either bare user ids or objects; both decode
/// into this struct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ParticipantRepr")]
pub struct Participant {
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Participant {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ParticipantRepr {
    Id(String),
    Full {
        user_id: String,
        #[serde(default)]
        display: Option<String>,
    },
}

impl From<ParticipantRepr> for Participant {
    fn from(repr: ParticipantRepr) -> Self {
        match repr {
            ParticipantRepr::Id(user_id) => Participant {
                user_id,
                display: None,
            },
            ParticipantRepr::Full { user_id, display } => Participant { user_id, display },
        }
    }
}

/// Participants currently known to be in the joined room
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    participants: Vec<Participant>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole roster with an authoritative list from the server.
    pub fn replace(&mut self, participants: Vec<Participant>) {
        self.participants.clear();
        for participant in participants {
            self.add(participant);
        }
    }

    /// Returns false when the user was already listed.
    pub fn add(&mut self, participant: Participant) -> bool {
        if self.contains(&participant.user_id) {
            return false;
        }
        self.participants.push(participant);
        true
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.participants.iter().any(|p| p.user_id == user_id)
    }

    pub fn clear(&mut self) {
        self.participants.clear();
    }

    pub fn participants(&self) -> &[Participant] {
        &self.participants
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
