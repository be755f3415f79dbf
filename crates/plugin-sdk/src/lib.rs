//! Benana Plugin SDK
//!
//! The contract every plugin implements, plus the shared registries the host
//! hands to plugins while they load. Plugin crates depend on this crate only;
//! they never see the kernel's internals.

pub mod contract;
pub mod permissions;
pub mod routes;
pub mod services;

pub use contract::{Plugin, PluginContext, PluginFactory};
pub use permissions::{Permission, PermissionRegistry};
pub use routes::RouteTable;
pub use services::{ServiceError, ServiceHandle, ServiceRegistry};

pub mod prelude {
    pub use crate::contract::{Plugin, PluginContext, PluginFactory};
    pub use crate::permissions::{Permission, PermissionRegistry};
    pub use crate::routes::RouteTable;
    pub use crate::services::{ServiceError, ServiceHandle, ServiceRegistry};
    pub use async_trait::async_trait;
}
