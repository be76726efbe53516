use std::process::ExitCode;

use vm_infra::start_task;

#[tokio::main]
async fn main() -> ExitCode {
    vm_deploy::run_workflow("start-task", |settings, provider| async move {
        let message = start_task(&settings, &provider).await?;
        println!("{message}");
        Ok(())
    })
    .await
}
