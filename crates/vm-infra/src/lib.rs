pub mod azure;
pub mod config;
pub mod keys;
pub mod provision;
pub mod start_task;
pub mod types;

#[cfg(test)]
pub(crate) mod mock;

use std::path::PathBuf;

use async_trait::async_trait;
use types::{
    CommandStatus, NetworkInterfaceInfo, NetworkInterfaceSpec, PublicIpInfo, PublicIpSpec,
    ResourceGroupInfo, ResourceGroupSpec, RunCommandSpec, SecurityGroupInfo, SecurityGroupSpec,
    SubnetInfo, SubnetSpec, VirtualMachineInfo, VirtualMachineSpec, VirtualNetworkInfo,
    VirtualNetworkSpec,
};

pub use azure::AzureProvider;
pub use config::{ConfigError, Settings};
pub use provision::provision;
pub use start_task::start_task;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("azure error: {0}")]
    Azure(#[from] azure_api::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to {action} {}: {source}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("ssh key generation failed")]
    KeyGeneration,

    #[error("ssh key encoding failed: {0}")]
    KeyEncoding(#[from] russh_keys::Error),

    #[error("remote command failed ({code}): {message}")]
    RemoteCommand { code: String, message: String },

    #[error("remote command returned no status")]
    EmptyCommandOutput,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The create-or-update surface both workflows drive.
///
/// Every `ensure_*` call is idempotent: it creates the resource when absent,
/// converges it to the spec when present, and returns once the provider
/// reports it realized.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn ensure_resource_group(&self, spec: &ResourceGroupSpec) -> Result<ResourceGroupInfo>;

    async fn ensure_virtual_network(
        &self,
        spec: &VirtualNetworkSpec,
    ) -> Result<VirtualNetworkInfo>;

    async fn ensure_subnet(&self, spec: &SubnetSpec) -> Result<SubnetInfo>;

    async fn ensure_public_ip(&self, spec: &PublicIpSpec) -> Result<PublicIpInfo>;

    async fn ensure_security_group(&self, spec: &SecurityGroupSpec) -> Result<SecurityGroupInfo>;

    async fn ensure_network_interface(
        &self,
        spec: &NetworkInterfaceSpec,
    ) -> Result<NetworkInterfaceInfo>;

    async fn ensure_virtual_machine(
        &self,
        spec: &VirtualMachineSpec,
    ) -> Result<VirtualMachineInfo>;

    /// Run a shell script on an existing VM and wait for the agent's report.
    async fn run_command(&self, spec: &RunCommandSpec) -> Result<Vec<CommandStatus>>;
}
