//! # Request Arguments and Responses
//!
//! Value types exchanged with the request layer. Arguments arrive
//! pre-validated for shape; every semantic check happens in the core.

use crate::error::{DlbResult, STATUS_SUCCESS};
use crate::{DomainId, PortId, QueueId, DLB_UNASSIGNED_ID};

/// Scheduling-domain creation request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateSchedDomainArgs {
    /// Load-balanced queues to attach
    pub num_ldb_queues: u32,
    /// Load-balanced ports to attach
    pub num_ldb_ports: u32,
    /// Directed port/queue pairs to attach
    pub num_dir_ports: u32,
    /// Atomic-inflight entries to attach
    pub num_atomic_inflights: u32,
    /// Contiguous history-list entries to attach
    pub num_hist_list_entries: u32,
    /// Load-balanced credits to attach
    pub num_ldb_credits: u32,
    /// Directed credits to attach
    pub num_dir_credits: u32,
}

/// Load-balanced queue creation request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateLdbQueueArgs {
    /// Sequence numbers per queue; zero for an unordered queue
    pub num_sequence_numbers: u32,
    /// Inflight limit
    pub num_qid_inflights: u32,
    /// Atomic-inflight entries taken from the domain
    pub num_atomic_inflights: u32,
    /// Lock-id compression level
    pub lock_id_comp_level: u32,
    /// Depth threshold
    pub depth_threshold: u32,
}

/// Load-balanced port creation request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CreateLdbPortArgs {
    /// CQ depth
    pub cq_depth: u32,
    /// CQ interrupt depth threshold
    pub cq_depth_threshold: u32,
    /// History-list entries carved from the domain's range
    pub cq_history_list_size: u32,
    /// CQ base address (64-byte aligned)
    pub cq_base_address: u64,
}

/// Directed queue creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateDirQueueArgs {
    /// Configured port of the pair, or [`DLB_UNASSIGNED_ID`] for a fresh pair
    pub port_id: PortId,
    /// Depth threshold
    pub depth_threshold: u32,
}

impl Default for CreateDirQueueArgs {
    fn default() -> Self {
        Self {
            port_id: DLB_UNASSIGNED_ID,
            depth_threshold: 0,
        }
    }
}

/// Directed port creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateDirPortArgs {
    /// CQ depth
    pub cq_depth: u32,
    /// CQ interrupt depth threshold
    pub cq_depth_threshold: u32,
    /// CQ base address (64-byte aligned)
    pub cq_base_address: u64,
    /// Configured queue of the pair, or [`DLB_UNASSIGNED_ID`] for a fresh pair
    pub queue_id: QueueId,
}

impl Default for CreateDirPortArgs {
    fn default() -> Self {
        Self {
            cq_depth: 0,
            cq_depth_threshold: 0,
            cq_base_address: 0,
            queue_id: DLB_UNASSIGNED_ID,
        }
    }
}

/// QID map request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapQidArgs {
    /// Load-balanced port
    pub port_id: PortId,
    /// Load-balanced queue
    pub qid: QueueId,
    /// Scheduling priority (0 highest)
    pub priority: u32,
}

/// QID unmap request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnmapQidArgs {
    /// Load-balanced port
    pub port_id: PortId,
    /// Load-balanced queue
    pub qid: QueueId,
}

/// Domain reset request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResetDomainArgs {
    /// Domain to reset
    pub domain_id: DomainId,
}

/// Queue depth query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryDepthArgs {
    /// Owning domain
    pub domain_id: DomainId,
    /// Queue to query
    pub queue_id: QueueId,
}

/// Command response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdResponse {
    /// Status code; zero on success
    pub status: u32,
    /// Id of the created resource (or returned value)
    pub id: u32,
}

impl CmdResponse {
    /// Successful response
    pub const fn success(id: u32) -> Self {
        Self {
            status: STATUS_SUCCESS,
            id,
        }
    }

    /// Encode a command result
    pub fn from_result<T: Into<u32>>(result: DlbResult<T>) -> Self {
        match result {
            Ok(id) => Self::success(id.into()),
            Err(e) => Self {
                status: e.status(),
                id: DLB_UNASSIGNED_ID,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DlbError;

    #[test]
    fn test_response_encoding() {
        let ok = CmdResponse::from_result::<u32>(Ok(7));
        assert_eq!(ok.status, STATUS_SUCCESS);
        assert_eq!(ok.id, 7);

        let err = CmdResponse::from_result::<u32>(Err(DlbError::DomainStarted));
        assert_ne!(err.status, STATUS_SUCCESS);
        assert_eq!(err.status, DlbError::DomainStarted.status());
        assert_eq!(err.id, DLB_UNASSIGNED_ID);
    }

    #[test]
    fn test_dir_args_default_to_fresh_pair() {
        assert_eq!(CreateDirQueueArgs::default().port_id, DLB_UNASSIGNED_ID);
        assert_eq!(CreateDirPortArgs::default().queue_id, DLB_UNASSIGNED_ID);
    }
}
