//! # Cloudsync Portal
//!
//! Client-side cache of a cloud portal's REST collections.
//!
//! The [`Portal`] owns one store holding the session and eleven
//! collections (tenancies, quotas, images, sizes, machines, volumes,
//! external IPs, cluster types, clusters, Kubernetes cluster templates and
//! Kubernetes clusters). Consumers send [`PortalAction`]s and read
//! [`PortalState`]; every HTTP outcome ends up in the state, never as an
//! error returned to the caller.
//!
//! ## Example
//!
//! ```ignore
//! use cloudsync_portal::{Portal, PortalAction, PortalConfig, ResourceAction};
//!
//! let portal = Portal::builder(PortalConfig::from_env()?).connect().await?;
//! portal.send(PortalAction::Tenancies(ResourceAction::FetchListIfNeeded)).await;
//! let count = portal.state(|s| s.tenancies.data.len()).await;
//! ```

pub mod app;
pub mod config;
pub mod resource;
pub mod resources;
pub mod session;

pub use app::{Portal, PortalAction, PortalBuilder, PortalEnvironment, PortalState, PortalStore, portal_reducer};
pub use config::{ConfigError, PortalConfig};
pub use resource::{CollectionState, Item, ResourceAction};
pub use session::{SessionAction, SessionState};
