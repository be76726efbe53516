//! Shared plumbing for the `provision` and `start-task` binaries.

pub mod cli;
pub mod telemetry;

use std::future::Future;
use std::process::ExitCode;

use clap::Parser;
use tracing::instrument::WithSubscriber;
use vm_infra::{AzureProvider, Settings};

use crate::cli::Args;

/// Load `.env`, parse flags, build the logger and settings, then hand the
/// workflow a provider. Errors are logged and turned into a failing exit code.
pub async fn run_workflow<F, Fut>(name: &'static str, workflow: F) -> ExitCode
where
    F: FnOnce(Settings, AzureProvider) -> Fut,
    Fut: Future<Output = vm_infra::Result<()>>,
{
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    let subscriber = telemetry::subscriber();

    async move {
        let settings = match Settings::load(&args.settings, &args.env) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(error = %e, settings = %args.settings.display(), "failed to load settings");
                return ExitCode::FAILURE;
            }
        };
        let provider = AzureProvider::from_settings(&settings.azure);

        match workflow(settings, provider).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!(error = %e, workflow = name, "workflow failed");
                ExitCode::FAILURE
            }
        }
    }
    .with_subscriber(subscriber)
    .await
}
