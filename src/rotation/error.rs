use sea_orm::DbErr;
use thiserror::Error;

use crate::db::services::DirectoryError;
use crate::dns::ReconcileError;
use crate::rotation::pool::PoolRef;

#[derive(Error, Debug)]
pub enum RotationError {
    /// Empty effective membership. Pool state is left untouched.
    #[error("Pool {0} has no candidate machines")]
    NoCandidates(PoolRef),
    #[error("Pool {0} not found")]
    PoolNotFound(PoolRef),
    #[error("Machine {0} is not a member of pool {1}")]
    NotAMember(i32, PoolRef),
    #[error("Machine {0} has no IP address on file")]
    MachineWithoutIp(i32),
    #[error("DNS reconciliation failed: {0}")]
    Reconciliation(#[from] ReconcileError),
    #[error("Machine directory error: {0}")]
    Directory(#[from] DirectoryError),
    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}
