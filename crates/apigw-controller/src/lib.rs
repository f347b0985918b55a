//! APIRule validation, desired-state computation and reconciliation
//!
//! This crate turns APIRule CRDs into the resources of the active enforcement stack:
//!
//! - **Handlers**: typed decoding of access strategy and mutator configuration
//! - **Validation**: ordered validator chain producing attribute-level failures
//! - **Builders**: VirtualService, Oathkeeper Rule, RequestAuthentication and
//!   AuthorizationPolicy from an APIRule
//! - **Processing**: key-based diff of desired against owned resources
//! - **Controller**: reconcile loop, apply and status write

pub mod builders;
pub mod client;
pub mod controller;
pub mod handlers;
pub mod processing;
pub mod reconciliation;
pub mod status;
pub mod validation;
pub mod workload;

pub use client::{GatewayKubeClient, GatewayKubeClientImpl};
pub use controller::{error_policy, reconcile, Context, RequeuePeriods};
