//! DNS side of a rotation: the provider contract, the Cloudflare adapter and the
//! reconciler that keeps local mirror rows and provider records converged.

pub mod cloudflare;
pub mod provider;
pub mod reconciler;

pub use provider::{DnsProvider, ProviderError, ProviderFactory, ProviderRecord, RecordSpec};
pub use reconciler::{DnsReconciler, ReconcileError, ReconcileOutcome};
