use serde::{Deserialize, Serialize};

/// Opaque provider-side resource identifier (an ARM resource id on Azure).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceId(pub String);

impl ResourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Desired state ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroupSpec {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNetworkSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub address_prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetSpec {
    pub resource_group: String,
    pub virtual_network: String,
    pub name: String,
    pub address_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIpSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub sku: String,
    pub allocation_method: String,
}

/// An inbound allow rule matching any protocol and any source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityRuleSpec {
    pub name: String,
    pub destination_port: u16,
    pub priority: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub rules: Vec<SecurityRuleSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterfaceSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub ip_configuration_name: String,
    pub subnet_id: ResourceId,
    pub public_ip_id: ResourceId,
    pub security_group_id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineSpec {
    pub resource_group: String,
    pub name: String,
    pub location: String,
    pub size: String,
    pub image: ImageSpec,
    pub admin_username: String,
    pub admin_password: String,
    /// OpenSSH `authorized_keys` line installed for the admin user.
    pub ssh_public_key: String,
    pub network_interface_id: ResourceId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommandSpec {
    pub resource_group: String,
    pub vm_name: String,
    pub script: String,
}

// ── Realized state ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroupInfo {
    pub name: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualNetworkInfo {
    pub name: String,
    pub address_prefixes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubnetInfo {
    pub id: ResourceId,
    pub name: String,
    pub address_prefix: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicIpInfo {
    pub id: ResourceId,
    pub name: String,
    pub ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityGroupInfo {
    pub id: ResourceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterfaceInfo {
    pub id: ResourceId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMachineInfo {
    pub id: ResourceId,
    pub name: String,
}

/// One status entry reported by the guest agent after a run-command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandStatus {
    pub code: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
}

impl CommandStatus {
    /// Whether the agent reported this entry as a failure.
    pub fn is_failure(&self) -> bool {
        let level_error = self
            .level
            .as_deref()
            .is_some_and(|l| l.eq_ignore_ascii_case("error"));
        let code_failed = self
            .code
            .as_deref()
            .is_some_and(|c| c.to_ascii_lowercase().contains("/failed"));
        level_error || code_failed
    }
}
