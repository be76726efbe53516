use std::process::ExitCode;

use vm_infra::provision;

#[tokio::main]
async fn main() -> ExitCode {
    vm_deploy::run_workflow("provision", |settings, provider| async move {
        let vm = provision(&settings, &provider).await?;
        tracing::info!(vm = %vm, "provisioning complete");
        Ok(())
    })
    .await
}
