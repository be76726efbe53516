use std::sync::Arc;

use async_trait::async_trait;
use azure_api::{
    AddressSpace, AzureClient, DefaultAzureCredential, HardwareProfile, ImageReference,
    IpConfiguration, IpConfigurationProperties, LinuxConfiguration, NetworkInterfaceRequest,
    NetworkInterfaceRequestProperties, NetworkProfile, NetworkSecurityGroupRequest,
    NetworkSecurityGroupRequestProperties, OsProfile, PublicIpAddressRequest,
    PublicIpAddressRequestProperties, ResourceGroupRequest, RunCommandInput, SecurityRule,
    SecurityRuleProperties, Sku, SshConfiguration, SshPublicKey, StorageProfile, SubResource,
    SubnetRequest, SubnetRequestProperties, VirtualMachineRequest,
    VirtualMachineRequestProperties, VirtualNetworkRequest, VirtualNetworkRequestProperties,
};
use tracing::debug;

use crate::config::AzureSettings;
use crate::types::{
    CommandStatus, NetworkInterfaceInfo, NetworkInterfaceSpec, PublicIpInfo, PublicIpSpec,
    ResourceGroupInfo, ResourceGroupSpec, ResourceId, RunCommandSpec, SecurityGroupInfo,
    SecurityGroupSpec, SecurityRuleSpec, SubnetInfo, SubnetSpec, VirtualMachineInfo,
    VirtualMachineSpec, VirtualNetworkInfo, VirtualNetworkSpec,
};
use crate::{CloudProvider, Result};

const RUN_SHELL_SCRIPT: &str = "RunShellScript";
const IP_VERSION: &str = "IPv4";
const ANY: &str = "*";
const ALLOW: &str = "Allow";
const INBOUND: &str = "Inbound";

/// Azure Resource Manager provider.
///
/// Delegates to `azure_api::AzureClient` for all HTTP calls.
pub struct AzureProvider {
    client: AzureClient,
}

impl AzureProvider {
    pub fn new(client: AzureClient) -> Self {
        Self { client }
    }

    /// Client for the configured subscription, authenticated with
    /// [`DefaultAzureCredential`].
    pub fn from_settings(settings: &AzureSettings) -> Self {
        let credential = Arc::new(DefaultAzureCredential::from_env());
        Self::new(AzureClient::new(settings.subscription_id.clone(), credential))
    }

    pub(crate) fn security_rule(rule: &SecurityRuleSpec) -> SecurityRule {
        SecurityRule {
            name: rule.name.clone(),
            properties: SecurityRuleProperties {
                protocol: ANY.into(),
                source_port_range: ANY.into(),
                destination_port_range: rule.destination_port.to_string(),
                source_address_prefix: ANY.into(),
                destination_address_prefix: ANY.into(),
                access: ALLOW.into(),
                priority: rule.priority,
                direction: INBOUND.into(),
            },
        }
    }

    pub(crate) fn virtual_machine_request(spec: &VirtualMachineSpec) -> VirtualMachineRequest {
        VirtualMachineRequest {
            location: spec.location.clone(),
            properties: VirtualMachineRequestProperties {
                hardware_profile: HardwareProfile {
                    vm_size: spec.size.clone(),
                },
                storage_profile: StorageProfile {
                    image_reference: ImageReference {
                        publisher: spec.image.publisher.clone(),
                        offer: spec.image.offer.clone(),
                        sku: spec.image.sku.clone(),
                        version: spec.image.version.clone(),
                    },
                },
                os_profile: OsProfile {
                    computer_name: spec.name.clone(),
                    admin_username: spec.admin_username.clone(),
                    admin_password: Some(spec.admin_password.clone()),
                    linux_configuration: LinuxConfiguration {
                        disable_password_authentication: true,
                        ssh: SshConfiguration {
                            public_keys: vec![SshPublicKey {
                                path: format!(
                                    "/home/{}/.ssh/authorized_keys",
                                    spec.admin_username
                                ),
                                key_data: spec.ssh_public_key.clone(),
                            }],
                        },
                    },
                },
                network_profile: NetworkProfile {
                    network_interfaces: vec![SubResource {
                        id: spec.network_interface_id.0.clone(),
                    }],
                },
            },
        }
    }
}

#[async_trait]
impl CloudProvider for AzureProvider {
    async fn ensure_resource_group(&self, spec: &ResourceGroupSpec) -> Result<ResourceGroupInfo> {
        let rg = self
            .client
            .create_or_update_resource_group(
                &spec.name,
                &ResourceGroupRequest {
                    location: spec.location.clone(),
                },
            )
            .await?;

        debug!(id = %rg.id, "azure: resource group ready");

        Ok(ResourceGroupInfo {
            name: rg.name,
            location: rg.location,
        })
    }

    async fn ensure_virtual_network(
        &self,
        spec: &VirtualNetworkSpec,
    ) -> Result<VirtualNetworkInfo> {
        let vnet = self
            .client
            .create_or_update_virtual_network(
                &spec.resource_group,
                &spec.name,
                &VirtualNetworkRequest {
                    location: spec.location.clone(),
                    properties: VirtualNetworkRequestProperties {
                        address_space: AddressSpace {
                            address_prefixes: spec.address_prefixes.clone(),
                        },
                    },
                },
            )
            .await?;

        debug!(id = %vnet.id, "azure: virtual network ready");

        Ok(VirtualNetworkInfo {
            name: vnet.name,
            address_prefixes: vnet.properties.address_space.address_prefixes,
        })
    }

    async fn ensure_subnet(&self, spec: &SubnetSpec) -> Result<SubnetInfo> {
        let subnet = self
            .client
            .create_or_update_subnet(
                &spec.resource_group,
                &spec.virtual_network,
                &spec.name,
                &SubnetRequest {
                    properties: SubnetRequestProperties {
                        address_prefix: spec.address_prefix.clone(),
                    },
                },
            )
            .await?;

        Ok(SubnetInfo {
            id: ResourceId(subnet.id),
            name: subnet.name,
            address_prefix: subnet.properties.address_prefix,
        })
    }

    async fn ensure_public_ip(&self, spec: &PublicIpSpec) -> Result<PublicIpInfo> {
        let ip = self
            .client
            .create_or_update_public_ip_address(
                &spec.resource_group,
                &spec.name,
                &PublicIpAddressRequest {
                    location: spec.location.clone(),
                    sku: Sku {
                        name: spec.sku.clone(),
                    },
                    properties: PublicIpAddressRequestProperties {
                        public_ip_allocation_method: spec.allocation_method.clone(),
                        public_ip_address_version: IP_VERSION.into(),
                    },
                },
            )
            .await?;

        Ok(PublicIpInfo {
            id: ResourceId(ip.id),
            name: ip.name,
            ip_address: ip.properties.and_then(|p| p.ip_address),
        })
    }

    async fn ensure_security_group(&self, spec: &SecurityGroupSpec) -> Result<SecurityGroupInfo> {
        let nsg = self
            .client
            .create_or_update_network_security_group(
                &spec.resource_group,
                &spec.name,
                &NetworkSecurityGroupRequest {
                    location: spec.location.clone(),
                    properties: NetworkSecurityGroupRequestProperties {
                        security_rules: spec.rules.iter().map(Self::security_rule).collect(),
                    },
                },
            )
            .await?;

        Ok(SecurityGroupInfo {
            id: ResourceId(nsg.id),
            name: nsg.name,
        })
    }

    async fn ensure_network_interface(
        &self,
        spec: &NetworkInterfaceSpec,
    ) -> Result<NetworkInterfaceInfo> {
        let nic = self
            .client
            .create_or_update_network_interface(
                &spec.resource_group,
                &spec.name,
                &NetworkInterfaceRequest {
                    location: spec.location.clone(),
                    properties: NetworkInterfaceRequestProperties {
                        ip_configurations: vec![IpConfiguration {
                            name: spec.ip_configuration_name.clone(),
                            properties: IpConfigurationProperties {
                                subnet: SubResource {
                                    id: spec.subnet_id.0.clone(),
                                },
                                public_ip_address: SubResource {
                                    id: spec.public_ip_id.0.clone(),
                                },
                            },
                        }],
                        network_security_group: SubResource {
                            id: spec.security_group_id.0.clone(),
                        },
                    },
                },
            )
            .await?;

        Ok(NetworkInterfaceInfo {
            id: ResourceId(nic.id),
            name: nic.name,
        })
    }

    async fn ensure_virtual_machine(
        &self,
        spec: &VirtualMachineSpec,
    ) -> Result<VirtualMachineInfo> {
        let vm = self
            .client
            .create_or_update_virtual_machine(
                &spec.resource_group,
                &spec.name,
                &Self::virtual_machine_request(spec),
            )
            .await?;

        debug!(
            id = %vm.id,
            state = ?vm.properties.as_ref().and_then(|p| p.provisioning_state.as_deref()),
            "azure: virtual machine ready"
        );

        Ok(VirtualMachineInfo {
            id: ResourceId(vm.id),
            name: vm.name,
        })
    }

    async fn run_command(&self, spec: &RunCommandSpec) -> Result<Vec<CommandStatus>> {
        let result = self
            .client
            .run_command(
                &spec.resource_group,
                &spec.vm_name,
                &RunCommandInput {
                    command_id: RUN_SHELL_SCRIPT.into(),
                    script: vec![spec.script.clone()],
                },
            )
            .await?;

        Ok(result
            .value
            .into_iter()
            .map(|s| CommandStatus {
                code: s.code,
                level: s.level,
                message: s.message,
            })
            .collect())
    }
}
