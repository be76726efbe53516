//! Typed deployment settings.
//!
//! Settings live in a TOML file split into environments:
//!
//! ```toml
//! [default.azure]
//! location = "westeurope"
//!
//! [production.azure]
//! location = "northeurope"
//! ```
//!
//! The effective settings are `default`, overlaid with the selected
//! environment, overlaid with `global`. Tables merge key by key; any other
//! value is replaced wholesale.
//!
//! Finally, any `VM_DEPLOY_<KEY>__<KEY>...` environment variable overrides the
//! key at that path, e.g. `VM_DEPLOY_CONTAINER__REGISTRY__PASSWORD`. Variables
//! without a `__` separator are not settings keys and are ignored.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::{Table, Value};

pub const DEFAULT_ENVIRONMENT: &str = "development";

const DEFAULT_SECTION: &str = "default";
const GLOBAL_SECTION: &str = "global";

pub const ENV_PREFIX: &str = "VM_DEPLOY_";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read settings file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("settings file has neither a `{0}` nor a `default` section")]
    MissingEnvironment(String),

    #[error("setting `{0}` must not be empty")]
    Empty(&'static str),

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    pub azure: AzureSettings,
    pub ssh: SshSettings,
    pub container: ContainerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AzureSettings {
    pub subscription_id: String,
    pub location: String,
    pub resource_group_name: String,
    pub vnet: VnetSettings,
    pub subnet: SubnetSettings,
    pub public: PublicSettings,
    pub nsg: NsgSettings,
    pub vm: VmSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VnetSettings {
    pub name: String,
    pub address_prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubnetSettings {
    pub name: String,
    pub address_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublicSettings {
    pub ip: PublicIpSettings,
    pub nic: NicSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PublicIpSettings {
    pub name: String,
    /// `Basic` or `Standard`.
    pub sku: String,
    /// `Static` or `Dynamic`.
    pub allocation_method: String,
    /// Name of the NIC's IP configuration that binds this address.
    pub config_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NicSettings {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NsgSettings {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmSettings {
    pub name: String,
    pub size: String,
    pub image: VmImageSettings,
    pub credentials: VmCredentials,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmImageSettings {
    pub sku: String,
    pub version: String,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VmCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for VmCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshSettings {
    pub key: SshKeySettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshKeySettings {
    pub path: SshKeyPaths,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshKeyPaths {
    pub private: String,
    /// Only accepted when it matches the derived `<private>.pub`.
    #[serde(default)]
    pub public: Option<String>,
}

impl SshKeyPaths {
    /// Private key path with `~` expanded.
    pub fn private_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.private).into_owned())
    }

    /// The public key always sits next to the private key.
    pub fn public_path(&self) -> PathBuf {
        let mut path = self.private_path().into_os_string();
        path.push(".pub");
        PathBuf::from(path)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSettings {
    pub registry: RegistrySettings,
}

#[derive(Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrySettings {
    pub server: String,
    pub username: String,
    pub password: String,
    pub image: String,
}

impl fmt::Debug for RegistrySettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrySettings")
            .field("server", &self.server)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("image", &self.image)
            .finish()
    }
}

impl Settings {
    /// Read, merge and validate the settings file for `environment`.
    pub fn load(path: &Path, environment: &str) -> Result<Self, ConfigError> {
        let src = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = Self::from_toml_str(&src, environment)?;
        tracing::debug!(path = %path.display(), environment, "loaded settings");
        Ok(settings)
    }

    /// Parse settings from TOML source, applying overrides from the process
    /// environment.
    pub fn from_toml_str(src: &str, environment: &str) -> Result<Self, ConfigError> {
        Self::from_toml_str_with_overrides(src, environment, std::env::vars())
    }

    pub fn from_toml_str_with_overrides<I>(
        src: &str,
        environment: &str,
        vars: I,
    ) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut root: Table = toml::from_str(src)?;

        let base = root.remove(DEFAULT_SECTION);
        let selected = root.remove(environment);
        if base.is_none() && selected.is_none() {
            return Err(ConfigError::MissingEnvironment(environment.to_string()));
        }

        let mut merged = Table::new();
        for layer in [base, selected, root.remove(GLOBAL_SECTION)]
            .into_iter()
            .flatten()
        {
            match layer {
                Value::Table(table) => merge(&mut merged, table),
                other => {
                    return Err(ConfigError::Invalid {
                        key: "<environment>",
                        reason: format!("expected a table, found {}", other.type_str()),
                    });
                }
            }
        }

        apply_env_overrides(&mut merged, vars)?;

        let settings = Value::Table(merged).try_into::<Settings>()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let azure = &self.azure;
        let registry = &self.container.registry;
        let required = [
            ("azure.subscription_id", &azure.subscription_id),
            ("azure.location", &azure.location),
            ("azure.resource_group_name", &azure.resource_group_name),
            ("azure.vnet.name", &azure.vnet.name),
            ("azure.subnet.name", &azure.subnet.name),
            ("azure.subnet.address_prefix", &azure.subnet.address_prefix),
            ("azure.public.ip.name", &azure.public.ip.name),
            ("azure.public.ip.sku", &azure.public.ip.sku),
            (
                "azure.public.ip.allocation_method",
                &azure.public.ip.allocation_method,
            ),
            ("azure.public.ip.config_name", &azure.public.ip.config_name),
            ("azure.public.nic.name", &azure.public.nic.name),
            ("azure.nsg.name", &azure.nsg.name),
            ("azure.vm.name", &azure.vm.name),
            ("azure.vm.size", &azure.vm.size),
            ("azure.vm.image.sku", &azure.vm.image.sku),
            ("azure.vm.image.version", &azure.vm.image.version),
            ("azure.vm.credentials.username", &azure.vm.credentials.username),
            ("azure.vm.credentials.password", &azure.vm.credentials.password),
            ("ssh.key.path.private", &self.ssh.key.path.private),
            ("container.registry.server", &registry.server),
            ("container.registry.username", &registry.username),
            ("container.registry.password", &registry.password),
            ("container.registry.image", &registry.image),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Empty(key));
            }
        }

        if azure.vnet.address_prefixes.is_empty() {
            return Err(ConfigError::Empty("azure.vnet.address_prefixes"));
        }
        if azure.vnet.address_prefixes.iter().any(|p| p.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                key: "azure.vnet.address_prefixes",
                reason: "contains an empty prefix".into(),
            });
        }

        let paths = &self.ssh.key.path;
        if let Some(public) = &paths.public {
            let configured = PathBuf::from(shellexpand::tilde(public).into_owned());
            if configured != paths.public_path() {
                return Err(ConfigError::Invalid {
                    key: "ssh.key.path.public",
                    reason: format!(
                        "must be {} (the private key path plus `.pub`)",
                        paths.public_path().display()
                    ),
                });
            }
        }

        Ok(())
    }
}

fn merge(base: &mut Table, overlay: Table) {
    for (key, value) in overlay {
        if let Value::Table(incoming) = value {
            if let Some(Value::Table(existing)) = base.get_mut(&key) {
                merge(existing, incoming);
                continue;
            }
            base.insert(key, Value::Table(incoming));
        } else {
            base.insert(key, value);
        }
    }
}

fn apply_env_overrides<I>(table: &mut Table, vars: I) -> Result<(), ConfigError>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (name, raw) in vars {
        let Some(key) = name.strip_prefix(ENV_PREFIX) else {
            continue;
        };
        if !key.contains(ENV_SEPARATOR) {
            continue;
        }

        let path: Vec<String> = key
            .split(ENV_SEPARATOR)
            .map(str::to_ascii_lowercase)
            .collect();
        if path.iter().any(String::is_empty) {
            return Err(ConfigError::Invalid {
                key: "<environment override>",
                reason: format!("`{name}` has an empty key segment"),
            });
        }

        set_path(table, &path, raw, &name)?;
        tracing::debug!(variable = %name, "setting overridden from environment");
    }
    Ok(())
}

fn set_path(table: &mut Table, path: &[String], raw: String, name: &str) -> Result<(), ConfigError> {
    let Some((last, parents)) = path.split_last() else {
        return Ok(());
    };

    let mut current = table;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert(Value::Table(Table::new()));
        current = match entry {
            Value::Table(inner) => inner,
            _ => {
                return Err(ConfigError::Invalid {
                    key: "<environment override>",
                    reason: format!("`{name}` descends into `{segment}`, which is not a table"),
                });
            }
        };
    }

    // Strings are taken verbatim; anything else is read as a TOML value so
    // lists and numbers can be overridden too.
    let value = match current.get(last) {
        None | Some(Value::String(_)) => Value::String(raw),
        Some(_) => parse_value(&raw).ok_or_else(|| ConfigError::Invalid {
            key: "<environment override>",
            reason: format!("`{name}` is not a valid TOML value"),
        })?,
    };
    current.insert(last.clone(), value);
    Ok(())
}

fn parse_value(raw: &str) -> Option<Value> {
    toml::from_str::<Table>(&format!("value = {raw}"))
        .ok()
        .and_then(|mut table| table.remove("value"))
}
