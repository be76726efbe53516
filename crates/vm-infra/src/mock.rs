//! In-memory `CloudProvider` that records every call.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::types::{
    CommandStatus, NetworkInterfaceInfo, NetworkInterfaceSpec, PublicIpInfo, PublicIpSpec,
    ResourceGroupInfo, ResourceGroupSpec, ResourceId, RunCommandSpec, SecurityGroupInfo,
    SecurityGroupSpec, SubnetInfo, SubnetSpec, VirtualMachineInfo, VirtualMachineSpec,
    VirtualNetworkInfo, VirtualNetworkSpec,
};
use crate::{CloudProvider, Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    ResourceGroup(ResourceGroupSpec),
    VirtualNetwork(VirtualNetworkSpec),
    Subnet(SubnetSpec),
    PublicIp(PublicIpSpec),
    SecurityGroup(SecurityGroupSpec),
    NetworkInterface(NetworkInterfaceSpec),
    VirtualMachine(VirtualMachineSpec),
    RunCommand(RunCommandSpec),
}

impl Call {
    pub fn step(&self) -> &'static str {
        match self {
            Self::ResourceGroup(_) => "resource group",
            Self::VirtualNetwork(_) => "virtual network",
            Self::Subnet(_) => "subnet",
            Self::PublicIp(_) => "public ip",
            Self::SecurityGroup(_) => "security group",
            Self::NetworkInterface(_) => "network interface",
            Self::VirtualMachine(_) => "virtual machine",
            Self::RunCommand(_) => "run command",
        }
    }
}

#[derive(Default)]
pub struct RecordingProvider {
    calls: Mutex<Vec<Call>>,
    fail_at: Option<&'static str>,
    statuses: Vec<CommandStatus>,
}

impl RecordingProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the step with this label fail after being recorded.
    pub fn failing_at(step: &'static str) -> Self {
        Self {
            fail_at: Some(step),
            ..Self::default()
        }
    }

    pub fn with_statuses(statuses: Vec<CommandStatus>) -> Self {
        Self {
            statuses,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn steps(&self) -> Vec<&'static str> {
        self.calls().iter().map(Call::step).collect()
    }

    fn record(&self, call: Call) -> Result<()> {
        let step = call.step();
        self.calls.lock().unwrap().push(call);
        if self.fail_at == Some(step) {
            return Err(Error::Azure(azure_api::Error::OperationFailed {
                endpoint: step,
                status: "Failed".into(),
                message: "injected failure".into(),
            }));
        }
        Ok(())
    }

    fn id(kind: &str, name: &str) -> ResourceId {
        ResourceId(format!("/subscriptions/test/{kind}/{name}"))
    }
}

#[async_trait]
impl CloudProvider for RecordingProvider {
    async fn ensure_resource_group(&self, spec: &ResourceGroupSpec) -> Result<ResourceGroupInfo> {
        self.record(Call::ResourceGroup(spec.clone()))?;
        Ok(ResourceGroupInfo {
            name: spec.name.clone(),
            location: spec.location.clone(),
        })
    }

    async fn ensure_virtual_network(
        &self,
        spec: &VirtualNetworkSpec,
    ) -> Result<VirtualNetworkInfo> {
        self.record(Call::VirtualNetwork(spec.clone()))?;
        Ok(VirtualNetworkInfo {
            name: spec.name.clone(),
            address_prefixes: spec.address_prefixes.clone(),
        })
    }

    async fn ensure_subnet(&self, spec: &SubnetSpec) -> Result<SubnetInfo> {
        self.record(Call::Subnet(spec.clone()))?;
        Ok(SubnetInfo {
            id: Self::id("subnets", &spec.name),
            name: spec.name.clone(),
            address_prefix: Some(spec.address_prefix.clone()),
        })
    }

    async fn ensure_public_ip(&self, spec: &PublicIpSpec) -> Result<PublicIpInfo> {
        self.record(Call::PublicIp(spec.clone()))?;
        Ok(PublicIpInfo {
            id: Self::id("publicIPAddresses", &spec.name),
            name: spec.name.clone(),
            ip_address: Some("203.0.113.10".into()),
        })
    }

    async fn ensure_security_group(&self, spec: &SecurityGroupSpec) -> Result<SecurityGroupInfo> {
        self.record(Call::SecurityGroup(spec.clone()))?;
        Ok(SecurityGroupInfo {
            id: Self::id("networkSecurityGroups", &spec.name),
            name: spec.name.clone(),
        })
    }

    async fn ensure_network_interface(
        &self,
        spec: &NetworkInterfaceSpec,
    ) -> Result<NetworkInterfaceInfo> {
        self.record(Call::NetworkInterface(spec.clone()))?;
        Ok(NetworkInterfaceInfo {
            id: Self::id("networkInterfaces", &spec.name),
            name: spec.name.clone(),
        })
    }

    async fn ensure_virtual_machine(
        &self,
        spec: &VirtualMachineSpec,
    ) -> Result<VirtualMachineInfo> {
        self.record(Call::VirtualMachine(spec.clone()))?;
        Ok(VirtualMachineInfo {
            id: Self::id("virtualMachines", &spec.name),
            name: spec.name.clone(),
        })
    }

    async fn run_command(&self, spec: &RunCommandSpec) -> Result<Vec<CommandStatus>> {
        self.record(Call::RunCommand(spec.clone()))?;
        Ok(self.statuses.clone())
    }
}
