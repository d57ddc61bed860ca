//! Topology documents and their resolution into network records.
//!
//! [`TopologySpec`] is what the operator writes; [`TopologyResolver`] checks it
//! against the structural preconditions, allocates ports, provisions keys,
//! builds the genesis ledger and assembles the [`NetworkRecord`].
//!
//! [`NetworkRecord`]: crate::record::NetworkRecord

mod resolver;
mod spec;

pub use resolver::{start_order, PlannedNode, ResolvedPlan, TopologyResolver};
pub use spec::{NodeOverride, RoleGroup, TopologySpec, TopologySpecBuilder, TransactionConfig};
