use tracing::{Instrument, info, info_span, warn};

use crate::config::{RegistrySettings, Settings};
use crate::types::RunCommandSpec;
use crate::{CloudProvider, Error, Result};

/// Port the application listens on inside the container.
pub const CONTAINER_PORT: u16 = 5000;
/// Port published on the VM.
pub const HOST_PORT: u16 = 80;

/// Shell script that installs Docker, logs in to the registry and starts the
/// image. Registry values are inserted verbatim, without quoting.
pub fn container_start_script(registry: &RegistrySettings) -> String {
    let RegistrySettings {
        server,
        username,
        password,
        image,
    } = registry;

    format!(
        "sudo apt-get update
sudo apt install docker.io --yes
sudo groupadd docker
sudo usermod -aG docker $USER
newgrp docker
docker login {server} -p {password} -u {username}
docker run -p {HOST_PORT}:{CONTAINER_PORT} {image}
"
    )
}

/// Run the container start script on the provisioned VM and return the first
/// message the guest agent reported.
pub async fn start_task<P>(settings: &Settings, provider: &P) -> Result<String>
where
    P: CloudProvider + ?Sized,
{
    let span = info_span!("start_task", vm = %settings.azure.vm.name);
    run(settings, provider).instrument(span).await
}

async fn run<P>(settings: &Settings, provider: &P) -> Result<String>
where
    P: CloudProvider + ?Sized,
{
    let spec = RunCommandSpec {
        resource_group: settings.azure.resource_group_name.clone(),
        vm_name: settings.azure.vm.name.clone(),
        script: container_start_script(&settings.container.registry),
    };

    info!(image = %settings.container.registry.image, "running container start script");
    let statuses = provider.run_command(&spec).await?;

    if let Some(failed) = statuses.iter().find(|s| s.is_failure()) {
        let code = failed.code.clone().unwrap_or_default();
        let message = failed.message.clone().unwrap_or_default();
        warn!(%code, "container start script failed");
        return Err(Error::RemoteCommand { code, message });
    }

    let first = statuses.into_iter().next().ok_or(Error::EmptyCommandOutput)?;
    info!(code = ?first.code, "container start script finished");
    Ok(first.message.unwrap_or_default())
}
