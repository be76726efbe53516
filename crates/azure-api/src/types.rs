use serde::{Deserialize, Serialize};

/// Reference to another ARM resource by its full id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResource {
    pub id: String,
}

// ── Resource groups ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ResourceGroupRequest {
    pub location: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResourceGroup {
    pub id: String,
    pub name: String,
    pub location: String,
    #[serde(default)]
    pub properties: Option<ProvisioningProperties>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningProperties {
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

// ── Virtual networks ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct VirtualNetworkRequest {
    pub location: String,
    pub properties: VirtualNetworkRequestProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkRequestProperties {
    pub address_space: AddressSpace,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressSpace {
    pub address_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualNetwork {
    pub id: String,
    pub name: String,
    pub properties: VirtualNetworkProperties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualNetworkProperties {
    pub address_space: AddressSpace,
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

// ── Subnets ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct SubnetRequest {
    pub properties: SubnetRequestProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetRequestProperties {
    pub address_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub properties: SubnetProperties,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetProperties {
    #[serde(default)]
    pub address_prefix: Option<String>,
    #[serde(default)]
    pub provisioning_state: Option<String>,
}

// ── Public IP addresses ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PublicIpAddressRequest {
    pub location: String,
    pub sku: Sku,
    pub properties: PublicIpAddressRequestProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sku {
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddressRequestProperties {
    #[serde(rename = "publicIPAllocationMethod")]
    pub public_ip_allocation_method: String,
    #[serde(rename = "publicIPAddressVersion")]
    pub public_ip_address_version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PublicIpAddress {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Option<PublicIpAddressProperties>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicIpAddressProperties {
    /// Only populated once a static address is allocated, or a dynamic one
    /// is attached to a running VM.
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default, rename = "publicIPAllocationMethod")]
    pub public_ip_allocation_method: Option<String>,
}

// ── Network security groups ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct NetworkSecurityGroupRequest {
    pub location: String,
    pub properties: NetworkSecurityGroupRequestProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSecurityGroupRequestProperties {
    pub security_rules: Vec<SecurityRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub properties: SecurityRuleProperties,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityRuleProperties {
    pub protocol: String,
    pub source_port_range: String,
    pub destination_port_range: String,
    pub source_address_prefix: String,
    pub destination_address_prefix: String,
    pub access: String,
    pub priority: u32,
    pub direction: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSecurityGroup {
    pub id: String,
    pub name: String,
}

// ── Network interfaces ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct NetworkInterfaceRequest {
    pub location: String,
    pub properties: NetworkInterfaceRequestProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInterfaceRequestProperties {
    pub ip_configurations: Vec<IpConfiguration>,
    pub network_security_group: SubResource,
}

#[derive(Debug, Clone, Serialize)]
pub struct IpConfiguration {
    pub name: String,
    pub properties: IpConfigurationProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IpConfigurationProperties {
    pub subnet: SubResource,
    #[serde(rename = "publicIPAddress")]
    pub public_ip_address: SubResource,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkInterface {
    pub id: String,
    pub name: String,
}

// ── Virtual machines ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct VirtualMachineRequest {
    pub location: String,
    pub properties: VirtualMachineRequestProperties,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineRequestProperties {
    pub hardware_profile: HardwareProfile,
    pub storage_profile: StorageProfile,
    pub os_profile: OsProfile,
    pub network_profile: NetworkProfile,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HardwareProfile {
    pub vm_size: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageProfile {
    pub image_reference: ImageReference,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OsProfile {
    pub computer_name: String,
    pub admin_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_password: Option<String>,
    pub linux_configuration: LinuxConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxConfiguration {
    pub disable_password_authentication: bool,
    pub ssh: SshConfiguration,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfiguration {
    pub public_keys: Vec<SshPublicKey>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshPublicKey {
    pub path: String,
    pub key_data: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProfile {
    pub network_interfaces: Vec<SubResource>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub properties: Option<ProvisioningProperties>,
}

// ── Run command ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCommandInput {
    pub command_id: String,
    pub script: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunCommandResult {
    #[serde(default)]
    pub value: Vec<InstanceViewStatus>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceViewStatus {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub display_status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ── Long-running operations ─────────────────────────────────────────

/// Body of an `Azure-AsyncOperation` status URL.
#[derive(Debug, Clone, Deserialize)]
pub struct AsyncOperationStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

impl AsyncOperationStatus {
    pub fn is_terminal(&self) -> bool {
        is_terminal_state(&self.status)
    }
}

/// Final states shared by async operations and `provisioningState`.
pub fn is_terminal_state(state: &str) -> bool {
    matches!(state, "Succeeded" | "Failed" | "Canceled")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}
