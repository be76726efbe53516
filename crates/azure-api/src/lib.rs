//! Typed Rust client for the Azure Resource Manager REST API.
//!
//! Covers the subset needed to stand up a single Linux VM:
//! resource groups, virtual networks, subnets, public IPs, network security
//! groups, network interfaces, virtual machines (create-or-update) and
//! run-command.
//!
//! Every create-or-update call blocks until the long-running operation it
//! starts has finished.

pub mod credential;
mod types;

use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use credential::{
    AzureCliCredential, ClientSecretCredential, DefaultAzureCredential, StaticTokenCredential,
    TokenCredential,
};
pub use types::*;

const BASE_URL: &str = "https://management.azure.com";

const RESOURCES_API_VERSION: &str = "2021-04-01";
const NETWORK_API_VERSION: &str = "2023-09-01";
const COMPUTE_API_VERSION: &str = "2023-09-01";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("azure api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("azure api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("azure operation {endpoint} ended as {status}: {message}")]
    OperationFailed {
        endpoint: &'static str,
        status: String,
        message: String,
    },

    #[error("azure api {endpoint} accepted the request but gave no result location")]
    MissingResultLocation { endpoint: &'static str },

    #[error("azure credential error: {0}")]
    Credential(String),

    #[error("unexpected azure api response: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Client for the ARM REST API, scoped to one subscription.
#[derive(Clone)]
pub struct AzureClient {
    subscription_id: String,
    credential: Arc<dyn TokenCredential>,
    base_url: String,
    poll_interval: Duration,
    http: reqwest::Client,
}

impl AzureClient {
    pub fn new(subscription_id: impl Into<String>, credential: Arc<dyn TokenCredential>) -> Self {
        Self {
            subscription_id: subscription_id.into(),
            credential,
            base_url: BASE_URL.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            http: reqwest::Client::new(),
        }
    }

    /// Point the client at another endpoint (sovereign clouds, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Delay between polls when the server does not send `Retry-After`.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn subscription_id(&self) -> &str {
        &self.subscription_id
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/subscriptions/{}{path}",
            self.base_url, self.subscription_id
        )
    }

    fn network_path(resource_group: &str, rest: &str) -> String {
        format!("/resourceGroups/{resource_group}/providers/Microsoft.Network/{rest}")
    }

    fn compute_path(resource_group: &str, rest: &str) -> String {
        format!("/resourceGroups/{resource_group}/providers/Microsoft.Compute/{rest}")
    }

    async fn auth(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.credential.token().await?))
    }

    async fn check(resp: reqwest::Response, endpoint: &'static str) -> Result<reqwest::Response> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Api {
                endpoint,
                status,
                body,
            });
        }
        Ok(resp)
    }

    fn header(resp: &reqwest::Response, name: &str) -> Option<String> {
        resp.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned)
    }

    fn retry_after(&self, resp: &reqwest::Response) -> Duration {
        Self::header(resp, "Retry-After")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.poll_interval)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        api_version: Option<&str>,
        endpoint: &'static str,
    ) -> Result<T> {
        let mut builder = self.http.get(url).header("Authorization", self.auth().await?);
        if let Some(version) = api_version {
            builder = builder.query(&[("api-version", version)]);
        }
        let resp = builder.send().await?;

        Self::check(resp, endpoint)
            .await?
            .json()
            .await
            .map_err(Error::from)
    }

    /// Poll an `Azure-AsyncOperation` URL until it reaches a terminal state.
    async fn wait_for_operation(
        &self,
        url: &str,
        mut delay: Duration,
        endpoint: &'static str,
    ) -> Result<()> {
        loop {
            tokio::time::sleep(delay).await;

            let resp = self
                .http
                .get(url)
                .header("Authorization", self.auth().await?)
                .send()
                .await?;
            let resp = Self::check(resp, endpoint).await?;
            delay = self.retry_after(&resp);

            let op: AsyncOperationStatus = resp.json().await?;
            tracing::debug!(endpoint, status = %op.status, "polled async operation");

            if !op.is_terminal() {
                continue;
            }
            if op.status == "Succeeded" {
                return Ok(());
            }

            let message = op
                .error
                .and_then(|e| e.message.or(e.code))
                .unwrap_or_default();
            return Err(Error::OperationFailed {
                endpoint,
                status: op.status,
                message,
            });
        }
    }

    /// Poll a `Location` URL while it answers 202 and return the final response.
    async fn poll_location(
        &self,
        url: &str,
        mut delay: Duration,
        endpoint: &'static str,
    ) -> Result<reqwest::Response> {
        loop {
            tokio::time::sleep(delay).await;

            let resp = self
                .http
                .get(url)
                .header("Authorization", self.auth().await?)
                .send()
                .await?;
            let resp = Self::check(resp, endpoint).await?;

            if resp.status() != StatusCode::ACCEPTED {
                return Ok(resp);
            }
            delay = self.retry_after(&resp);
        }
    }

    /// Re-read a resource until its `provisioningState` is final.
    async fn wait_for_provisioning<T: DeserializeOwned>(
        &self,
        url: &str,
        api_version: &str,
        mut resource: Value,
        endpoint: &'static str,
    ) -> Result<T> {
        loop {
            let state = resource
                .pointer("/properties/provisioningState")
                .and_then(Value::as_str)
                .map(str::to_owned);

            match state.as_deref() {
                None | Some("Succeeded") => return Ok(serde_json::from_value(resource)?),
                Some(state) if is_terminal_state(state) => {
                    return Err(Error::OperationFailed {
                        endpoint,
                        status: state.to_string(),
                        message: format!("resource provisioning ended as {state}"),
                    });
                }
                Some(state) => {
                    tracing::debug!(endpoint, state, "resource still provisioning");
                    tokio::time::sleep(self.poll_interval).await;
                    resource = self.get_json(url, Some(api_version), endpoint).await?;
                }
            }
        }
    }

    /// Create-or-update `PUT`, waiting for any long-running operation it starts.
    async fn put_resource<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        api_version: &str,
        body: &B,
        endpoint: &'static str,
    ) -> Result<T> {
        let url = self.url(path);
        let resp = self
            .http
            .put(&url)
            .query(&[("api-version", api_version)])
            .header("Authorization", self.auth().await?)
            .json(body)
            .send()
            .await?;
        let resp = Self::check(resp, endpoint).await?;
        let delay = self.retry_after(&resp);

        let resource = if let Some(op_url) = Self::header(&resp, "Azure-AsyncOperation") {
            self.wait_for_operation(&op_url, delay, endpoint).await?;
            self.get_json(&url, Some(api_version), endpoint).await?
        } else if let Some(location) = Self::header(&resp, "Location") {
            self.poll_location(&location, delay, endpoint).await?;
            self.get_json(&url, Some(api_version), endpoint).await?
        } else {
            resp.json().await?
        };

        self.wait_for_provisioning(&url, api_version, resource, endpoint)
            .await
    }

    /// Action `POST`, waiting for the accepted operation to produce its result.
    async fn post_action<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        api_version: &str,
        body: &B,
        endpoint: &'static str,
    ) -> Result<T> {
        let resp = self
            .http
            .post(self.url(path))
            .query(&[("api-version", api_version)])
            .header("Authorization", self.auth().await?)
            .json(body)
            .send()
            .await?;
        let resp = Self::check(resp, endpoint).await?;

        if resp.status() != StatusCode::ACCEPTED {
            return resp.json().await.map_err(Error::from);
        }

        let delay = self.retry_after(&resp);
        let location = Self::header(&resp, "Location");
        if let Some(op_url) = Self::header(&resp, "Azure-AsyncOperation") {
            self.wait_for_operation(&op_url, delay, endpoint).await?;
        }

        match location {
            Some(url) => Ok(self
                .poll_location(&url, Duration::ZERO, endpoint)
                .await?
                .json()
                .await?),
            None => Err(Error::MissingResultLocation { endpoint }),
        }
    }

    // ── Resource groups ─────────────────────────────────────────────

    pub async fn create_or_update_resource_group(
        &self,
        name: &str,
        req: &ResourceGroupRequest,
    ) -> Result<ResourceGroup> {
        self.put_resource(
            &format!("/resourcegroups/{name}"),
            RESOURCES_API_VERSION,
            req,
            "create resource group",
        )
        .await
    }

    // ── Networking ──────────────────────────────────────────────────

    pub async fn create_or_update_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        req: &VirtualNetworkRequest,
    ) -> Result<VirtualNetwork> {
        self.put_resource(
            &Self::network_path(resource_group, &format!("virtualNetworks/{name}")),
            NETWORK_API_VERSION,
            req,
            "create virtual network",
        )
        .await
    }

    pub async fn create_or_update_subnet(
        &self,
        resource_group: &str,
        virtual_network: &str,
        name: &str,
        req: &SubnetRequest,
    ) -> Result<Subnet> {
        self.put_resource(
            &Self::network_path(
                resource_group,
                &format!("virtualNetworks/{virtual_network}/subnets/{name}"),
            ),
            NETWORK_API_VERSION,
            req,
            "create subnet",
        )
        .await
    }

    pub async fn create_or_update_public_ip_address(
        &self,
        resource_group: &str,
        name: &str,
        req: &PublicIpAddressRequest,
    ) -> Result<PublicIpAddress> {
        self.put_resource(
            &Self::network_path(resource_group, &format!("publicIPAddresses/{name}")),
            NETWORK_API_VERSION,
            req,
            "create public ip address",
        )
        .await
    }

    pub async fn create_or_update_network_security_group(
        &self,
        resource_group: &str,
        name: &str,
        req: &NetworkSecurityGroupRequest,
    ) -> Result<NetworkSecurityGroup> {
        self.put_resource(
            &Self::network_path(resource_group, &format!("networkSecurityGroups/{name}")),
            NETWORK_API_VERSION,
            req,
            "create network security group",
        )
        .await
    }

    pub async fn create_or_update_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        req: &NetworkInterfaceRequest,
    ) -> Result<NetworkInterface> {
        self.put_resource(
            &Self::network_path(resource_group, &format!("networkInterfaces/{name}")),
            NETWORK_API_VERSION,
            req,
            "create network interface",
        )
        .await
    }

    // ── Compute ─────────────────────────────────────────────────────

    pub async fn create_or_update_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        req: &VirtualMachineRequest,
    ) -> Result<VirtualMachine> {
        self.put_resource(
            &Self::compute_path(resource_group, &format!("virtualMachines/{name}")),
            COMPUTE_API_VERSION,
            req,
            "create virtual machine",
        )
        .await
    }

    /// Run a script on the VM through the guest agent and wait for its result.
    pub async fn run_command(
        &self,
        resource_group: &str,
        vm_name: &str,
        input: &RunCommandInput,
    ) -> Result<RunCommandResult> {
        self.post_action(
            &Self::compute_path(resource_group, &format!("virtualMachines/{vm_name}/runCommand")),
            COMPUTE_API_VERSION,
            input,
            "run command",
        )
        .await
    }
}
