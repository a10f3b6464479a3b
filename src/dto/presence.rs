use serde::Serialize;
use serde_with::skip_serializing_none;
use utoipa::ToSchema;

use crate::services::presence_service::{HostPresence, HostRecovery, PresenceCheck};

#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HostPresenceDto {
    Present,
    Absent,
}

/// Host liveness as seen by the server clock.
#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceResponse {
    pub host_id: String,
    pub presence: HostPresenceDto,
    pub silent_for_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcomeDto {
    Present,
    Promoted,
    /// No player left to take over; stop trying to recover this room.
    Abandoned,
}

#[skip_serializing_none]
#[derive(Debug, Serialize, ToSchema)]
pub struct RecoveryResponse {
    pub outcome: RecoveryOutcomeDto,
    pub host_id: Option<String>,
    pub previous_host_id: Option<String>,
}

impl From<PresenceCheck> for PresenceResponse {
    fn from(check: PresenceCheck) -> Self {
        Self {
            host_id: check.host_id,
            presence: match check.presence {
                HostPresence::Present => HostPresenceDto::Present,
                HostPresence::Absent => HostPresenceDto::Absent,
            },
            silent_for_ms: u64::try_from(check.silent_for.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<HostRecovery> for RecoveryResponse {
    fn from(recovery: HostRecovery) -> Self {
        match recovery {
            HostRecovery::Present { host_id } => Self {
                outcome: RecoveryOutcomeDto::Present,
                host_id: Some(host_id),
                previous_host_id: None,
            },
            HostRecovery::Promoted {
                host_id,
                previous_host_id,
            } => Self {
                outcome: RecoveryOutcomeDto::Promoted,
                host_id: Some(host_id),
                previous_host_id: Some(previous_host_id),
            },
            HostRecovery::Abandoned => Self {
                outcome: RecoveryOutcomeDto::Abandoned,
                host_id: None,
                previous_host_id: None,
            },
        }
    }
}
