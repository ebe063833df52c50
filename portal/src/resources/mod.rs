//! The resources of the portal.
//!
//! Only `tenancies` has a fixed endpoint. Every other collection lives under
//! the selected tenancy and stays unbound until one is selected.

pub mod clusters;
pub mod kubernetes;
pub mod machines;

use crate::resource::{Item, NotFoundPolicy, ResourceConfig, Scope, status_in};
use serde_json::Value;

pub use clusters::{CLUSTERS, ClusterFlags, ClusterOp, ClusterReducer};
pub use kubernetes::{KUBERNETES_CLUSTERS, KubernetesFlags, KubernetesOp, KubernetesReducer};
pub use machines::{MACHINES, MachineOp, MachineReducer};

/// Tenancies the user belongs to
pub const TENANCIES: ResourceConfig = ResourceConfig::new("tenancies", Scope::Global("/api/tenancies/"));

/// Resource quotas of the tenancy; not every cloud exposes them
pub const QUOTAS: ResourceConfig =
    ResourceConfig::new("quotas", Scope::Tenancy).with_not_found(NotFoundPolicy::Unsupported);

/// Machine images
pub const IMAGES: ResourceConfig = ResourceConfig::new("images", Scope::Tenancy);

/// Machine sizes
pub const SIZES: ResourceConfig = ResourceConfig::new("sizes", Scope::Tenancy);

/// Block storage volumes
pub const VOLUMES: ResourceConfig = ResourceConfig::new("volumes", Scope::Tenancy).with_is_active(volume_is_active);

/// External IP addresses
pub const EXTERNAL_IPS: ResourceConfig =
    ResourceConfig::new("external_ips", Scope::Tenancy).with_is_active(external_ip_is_active);

/// Cluster types offered by the cluster-as-a-service backend
pub const CLUSTER_TYPES: ResourceConfig =
    ResourceConfig::new("cluster_types", Scope::Tenancy).with_not_found(NotFoundPolicy::Unsupported);

/// Kubernetes cluster templates
pub const KUBERNETES_CLUSTER_TEMPLATES: ResourceConfig =
    ResourceConfig::new("kubernetes_cluster_templates", Scope::Tenancy)
        .with_not_found(NotFoundPolicy::Unsupported);

fn volume_is_active(item: &Item) -> bool {
    status_in(
        item,
        &["CREATING", "ATTACHING", "DETACHING", "DELETING", "EXTENDING", "DOWNLOADING"],
    )
}

fn external_ip_is_active(item: &Item) -> bool {
    item.get("updating").and_then(Value::as_bool).unwrap_or(false)
}
