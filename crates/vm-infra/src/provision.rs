use std::fs;

use tracing::{Instrument, info, info_span};

use crate::config::Settings;
use crate::keys::generate_ssh_keys;
use crate::types::{
    ImageSpec, NetworkInterfaceSpec, PublicIpSpec, ResourceGroupSpec,
    SecurityGroupSpec, SecurityRuleSpec, SubnetSpec, VirtualMachineSpec, VirtualNetworkSpec,
};
use crate::{CloudProvider, Error, Result};

pub const IMAGE_PUBLISHER: &str = "Canonical";
pub const IMAGE_OFFER: &str = "UbuntuServer";

/// Inbound SSH and HTTP from anywhere; nothing else is opened.
pub fn security_rules() -> Vec<SecurityRuleSpec> {
    vec![
        SecurityRuleSpec {
            name: "Allow-SSH".into(),
            destination_port: 22,
            priority: 4000,
        },
        SecurityRuleSpec {
            name: "Allow-HTTP".into(),
            destination_port: 80,
            priority: 4001,
        },
    ]
}

/// Stand up the VM and everything it needs, in dependency order, and return
/// the VM's name.
///
/// Steps run strictly one after another; the first failure is returned as is
/// and nothing created before it is rolled back. Re-running with the same
/// settings converges the existing resources.
pub async fn provision<P>(settings: &Settings, provider: &P) -> Result<String>
where
    P: CloudProvider + ?Sized,
{
    let span = info_span!("provision", vm = %settings.azure.vm.name);
    run(settings, provider).instrument(span).await
}

async fn run<P>(settings: &Settings, provider: &P) -> Result<String>
where
    P: CloudProvider + ?Sized,
{
    let azure = &settings.azure;
    let rg_name = &azure.resource_group_name;

    let keys = generate_ssh_keys(&settings.ssh.key.path)?;
    info!(
        private_key = %keys.private_path.display(),
        public_key = %keys.public_path.display(),
        "SSH keys generated"
    );

    let rg = provider
        .ensure_resource_group(&ResourceGroupSpec {
            name: rg_name.clone(),
            location: azure.location.clone(),
        })
        .await?;
    info!(name = %rg.name, location = %rg.location, "resource group provisioned");

    let vnet = provider
        .ensure_virtual_network(&VirtualNetworkSpec {
            resource_group: rg_name.clone(),
            name: azure.vnet.name.clone(),
            location: azure.location.clone(),
            address_prefixes: azure.vnet.address_prefixes.clone(),
        })
        .await?;
    info!(name = %vnet.name, address_prefixes = ?vnet.address_prefixes, "virtual network provisioned");

    let subnet = provider
        .ensure_subnet(&SubnetSpec {
            resource_group: rg_name.clone(),
            virtual_network: vnet.name.clone(),
            name: azure.subnet.name.clone(),
            address_prefix: azure.subnet.address_prefix.clone(),
        })
        .await?;
    info!(name = %subnet.name, address_prefix = ?subnet.address_prefix, "subnet provisioned");

    let ip = provider
        .ensure_public_ip(&PublicIpSpec {
            resource_group: rg_name.clone(),
            name: azure.public.ip.name.clone(),
            location: azure.location.clone(),
            sku: azure.public.ip.sku.clone(),
            allocation_method: azure.public.ip.allocation_method.clone(),
        })
        .await?;
    info!(name = %ip.name, address = ?ip.ip_address, "public IP address provisioned");

    let nsg = provider
        .ensure_security_group(&SecurityGroupSpec {
            resource_group: rg_name.clone(),
            name: azure.nsg.name.clone(),
            location: azure.location.clone(),
            rules: security_rules(),
        })
        .await?;
    info!(name = %nsg.name, "network security group provisioned");

    let nic = provider
        .ensure_network_interface(&NetworkInterfaceSpec {
            resource_group: rg_name.clone(),
            name: azure.public.nic.name.clone(),
            location: azure.location.clone(),
            ip_configuration_name: azure.public.ip.config_name.clone(),
            subnet_id: subnet.id,
            public_ip_id: ip.id,
            security_group_id: nsg.id,
        })
        .await?;
    info!(name = %nic.name, "network interface provisioned");

    let ssh_public_key = fs::read_to_string(&keys.public_path).map_err(|source| Error::Io {
        action: "read",
        path: keys.public_path.clone(),
        source,
    })?;

    let vm = provider
        .ensure_virtual_machine(&VirtualMachineSpec {
            resource_group: rg_name.clone(),
            name: azure.vm.name.clone(),
            location: azure.location.clone(),
            size: azure.vm.size.clone(),
            image: ImageSpec {
                publisher: IMAGE_PUBLISHER.into(),
                offer: IMAGE_OFFER.into(),
                sku: azure.vm.image.sku.clone(),
                version: azure.vm.image.version.clone(),
            },
            admin_username: azure.vm.credentials.username.clone(),
            admin_password: azure.vm.credentials.password.clone(),
            ssh_public_key,
            network_interface_id: nic.id,
        })
        .await?;
    info!(name = %vm.name, "virtual machine provisioned");

    Ok(vm.name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample;
    use crate::mock::{Call, RecordingProvider};
    use crate::types::ResourceId;

    const ALL_STEPS: [&str; 7] = [
        "resource group",
        "virtual network",
        "subnet",
        "public ip",
        "security group",
        "network interface",
        "virtual machine",
    ];

    fn settings_in(dir: &tempfile::TempDir) -> Settings {
        let mut settings = sample();
        settings.ssh.key.path.private = dir.path().join("keys/id_rsa").display().to_string();
        settings
    }

    #[tokio::test]
    async fn steps_run_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let provider = RecordingProvider::new();

        let vm = provision(&settings_in(&dir), &provider).await.unwrap();

        assert_eq!(vm, "demo-vm");
        assert_eq!(provider.steps(), ALL_STEPS);
    }

    #[tokio::test]
    async fn ids_are_threaded_into_later_steps() {
        let dir = tempfile::tempdir().unwrap();
        let provider = RecordingProvider::new();
        provision(&settings_in(&dir), &provider).await.unwrap();

        let calls = provider.calls();
        let Call::NetworkInterface(nic) = &calls[5] else {
            panic!("expected network interface, got {:?}", calls[5]);
        };
        assert_eq!(nic.subnet_id, ResourceId("/subscriptions/test/subnets/demo-subnet".into()));
        assert_eq!(
            nic.public_ip_id,
            ResourceId("/subscriptions/test/publicIPAddresses/demo-ip".into())
        );
        assert_eq!(
            nic.security_group_id,
            ResourceId("/subscriptions/test/networkSecurityGroups/demo-nsg".into())
        );
        assert_eq!(nic.ip_configuration_name, "demo-ipconfig");

        let Call::Subnet(subnet) = &calls[2] else {
            panic!("expected subnet, got {:?}", calls[2]);
        };
        assert_eq!(subnet.virtual_network, "demo-vnet");

        let Call::VirtualMachine(vm) = &calls[6] else {
            panic!("expected virtual machine, got {:?}", calls[6]);
        };
        assert_eq!(
            vm.network_interface_id,
            ResourceId("/subscriptions/test/networkInterfaces/demo-nic".into())
        );
    }

    #[tokio::test]
    async fn vm_gets_generated_public_key_and_fixed_image() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let provider = RecordingProvider::new();
        provision(&settings, &provider).await.unwrap();

        let public_key = fs::read_to_string(settings.ssh.key.path.public_path()).unwrap();
        let Some(Call::VirtualMachine(vm)) = provider.calls().pop() else {
            panic!("last call was not the virtual machine");
        };

        assert!(public_key.starts_with("ssh-rsa "));
        assert_eq!(vm.ssh_public_key, public_key);
        assert_eq!(vm.admin_username, "azureuser");
        assert_eq!(vm.image.publisher, "Canonical");
        assert_eq!(vm.image.offer, "UbuntuServer");
        assert_eq!(vm.image.sku, "18.04-LTS");
        assert_eq!(vm.size, "Standard_B1s");
    }

    #[tokio::test]
    async fn security_group_always_gets_the_two_fixed_rules() {
        let dir = tempfile::tempdir().unwrap();
        let provider = RecordingProvider::new();
        provision(&settings_in(&dir), &provider).await.unwrap();

        let calls = provider.calls();
        let Call::SecurityGroup(nsg) = &calls[4] else {
            panic!("expected security group, got {:?}", calls[4]);
        };

        let summary: Vec<_> = nsg
            .rules
            .iter()
            .map(|r| (r.name.as_str(), r.destination_port, r.priority))
            .collect();
        assert_eq!(
            summary,
            [
                ("Allow-SSH", 22, 4000),
                ("Allow-HTTP", 80, 4001),
            ]
        );
    }

    #[tokio::test]
    async fn failure_stops_the_sequence_and_surfaces_unchanged() {
        for (index, failing) in ALL_STEPS.iter().enumerate() {
            let dir = tempfile::tempdir().unwrap();
            let provider = RecordingProvider::failing_at(*failing);

            let err = provision(&settings_in(&dir), &provider).await.unwrap_err();

            assert_eq!(provider.steps(), &ALL_STEPS[..=index], "failing at {failing}");
            match err {
                Error::Azure(azure_api::Error::OperationFailed { endpoint, message, .. }) => {
                    assert_eq!(endpoint, *failing);
                    assert_eq!(message, "injected failure");
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn key_generation_failure_makes_no_provider_calls() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "not a directory").unwrap();

        let mut settings = sample();
        settings.ssh.key.path.private = blocker.join("id_rsa").display().to_string();
        let provider = RecordingProvider::new();

        let err = provision(&settings, &provider).await.unwrap_err();

        assert!(matches!(err, Error::Io { .. }), "{err}");
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn rerun_with_same_settings_yields_same_vm() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings_in(&dir);
        let provider = RecordingProvider::new();

        let first = provision(&settings, &provider).await.unwrap();
        let second = provision(&settings, &provider).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(provider.steps().len(), ALL_STEPS.len() * 2);
    }
}
