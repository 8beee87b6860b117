//! SeaORM entities, one module per table.

pub mod agent_job;
pub mod dns_account;
pub mod dns_record;
pub mod domain;
pub mod pool_member;
pub mod pool_tag;
pub mod record_pool;
pub mod rotation_history;
pub mod tag;
pub mod vps;
pub mod vps_tag;
pub mod wildcard_pool;

// Prelude module for easy importing of all entities and their related types
pub mod prelude {
    pub use super::agent_job::Entity as AgentJob;
    pub use super::agent_job::Model as AgentJobModel;

    pub use super::dns_account::Entity as DnsAccount;
    pub use super::dns_account::Model as DnsAccountModel;

    pub use super::dns_record::Entity as DnsRecord;
    pub use super::dns_record::Model as DnsRecordModel;

    pub use super::domain::Entity as Domain;
    pub use super::domain::Model as DomainModel;

    pub use super::pool_member::Entity as PoolMember;
    pub use super::pool_member::Model as PoolMemberModel;

    pub use super::pool_tag::Entity as PoolTag;
    pub use super::pool_tag::Model as PoolTagModel;

    pub use super::record_pool::Entity as RecordPool;
    pub use super::record_pool::Model as RecordPoolModel;

    pub use super::rotation_history::Entity as RotationHistory;
    pub use super::rotation_history::Model as RotationHistoryModel;

    pub use super::tag::Entity as Tag;
    pub use super::tag::Model as TagModel;

    pub use super::vps::Entity as Vps;
    pub use super::vps::Model as VpsModel;

    pub use super::vps_tag::Entity as VpsTag;
    pub use super::vps_tag::Model as VpsTagModel;

    pub use super::wildcard_pool::Entity as WildcardPool;
    pub use super::wildcard_pool::Model as WildcardPoolModel;
}
