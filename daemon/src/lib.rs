//! matte gateway - background-removal API with a steganographic tunnel
//!
//! One endpoint, two credential classes. Legitimate keys get their photo
//! processed by the configured pipeline. Covert keys have their upload decoded
//! as a carrier, the hidden request fetched, and the reply returned in a fresh
//! carrier that looks like any other processed image.

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod executor;
pub mod fingerprint;
pub mod metrics;
pub mod pipeline;
pub mod server;

pub use auth::{CredentialTable, Role};
pub use config::{ConfigError, GatewayConfig};
pub use dispatch::{DispatchError, Gateway, GatewayState, Session};
pub use executor::{ExecutorConfig, ExecutorError, HttpExecutor, Upstream};
pub use fingerprint::{Fingerprint, OuterResponse, ResponseProfile};
pub use pipeline::{BackgroundRemover, PipelineError, RemoteRemover, Upload};
