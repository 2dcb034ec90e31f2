use crate::error::ConfigError;
use crate::secret::{secret_schema, Secret};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Application tag attached to every session, which attributes
/// warehouse usage to Flow.
pub const DEFAULT_APPLICATION: &str = "Estuary_Flow";

/// Authenticator selects how a session authenticates with the database.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Authenticator {
    /// User and password.
    Snowflake,
    /// Key-pair authentication using a signed JWT.
    SnowflakeJwt,
    /// Browser-based SSO. Only usable where a browser is available.
    #[serde(rename = "externalbrowser")]
    ExternalBrowser,
    /// Native SSO through an Okta endpoint, given as `endpoint`.
    OktaEndpoint,
    /// OAuth access token, given as `token`.
    Oauth,
    /// User and password with multi-factor authentication.
    UsernamePasswordMfa,
}

impl Authenticator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Authenticator::Snowflake => "snowflake",
            Authenticator::SnowflakeJwt => "snowflake_jwt",
            Authenticator::ExternalBrowser => "externalbrowser",
            Authenticator::OktaEndpoint => "okta_endpoint",
            Authenticator::Oauth => "oauth",
            Authenticator::UsernamePasswordMfa => "username_password_mfa",
        }
    }
}

#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
#[schemars(
    title = "Credentials",
    description = "Identity and authentication used to open database sessions."
)]
pub struct Credentials {
    /// Account identifier, such as `myorg-account123`.
    pub account: String,
    /// User name used to authenticate.
    pub user: String,
    /// Password used to authenticate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "secret_schema")]
    pub password: Option<Secret<String>>,
    /// PEM-encoded private key used for key-pair authentication.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "private_key_schema")]
    pub private_key: Option<Secret<String>>,
    /// Path to a file holding a PEM-encoded private key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key_path: Option<PathBuf>,
    /// Type of authenticator to use when opening sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authenticator: Option<Authenticator>,
    /// URL of the Okta endpoint, required when authenticator is `okta_endpoint`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// OAuth or JWT token, required when authenticator is `oauth`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(schema_with = "secret_schema")]
    pub token: Option<Secret<String>>,
    /// Default role of sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Whether sessions automatically commit each operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autocommit: Option<bool>,
}

fn private_key_schema(_: &mut schemars::generate::SchemaGenerator) -> schemars::Schema {
    serde_json::from_value(serde_json::json!({
        "type": "string",
        "secret": true,
        // This annotation is interpreted by the UI to render this as a multiline input.
        "multiline": true,
    }))
    .unwrap()
}

/// Connector pairs Credentials with the database, warehouse, and schema
/// that sessions use by default.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
#[schemars(
    title = "Warehouse Connector",
    description = "Connection to an analytical database."
)]
pub struct Connector {
    /// Default database of sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Default warehouse of sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    /// Default schema of sessions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Application tag used to attribute usage.
    #[serde(default = "default_application")]
    pub application: String,
    pub credentials: Credentials,
}

fn default_application() -> String {
    DEFAULT_APPLICATION.to_string()
}

/// Overrides of Connector defaults for a single call.
#[derive(Serialize, Deserialize, JsonSchema, Debug, Clone, Default, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Overrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warehouse: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

/// A value of ConnectParams.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Text(String),
    Bool(bool),
    Secret(Secret<String>),
    /// DER-encoded private key.
    Key(Secret<Vec<u8>>),
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_secret(&self) -> Option<&Secret<String>> {
        match self {
            ParamValue::Secret(secret) => Some(secret),
            _ => None,
        }
    }

    pub fn as_key(&self) -> Option<&Secret<Vec<u8>>> {
        match self {
            ParamValue::Key(key) => Some(key),
            _ => None,
        }
    }
}

/// ConnectParams is the flat, validated mapping of named parameters used
/// to open a session. Unset values are never present, and at most one of
/// `password`, `private_key`, or `token` is.
///
/// ConnectParams are built fresh for each connection attempt and are
/// consumed by `Driver::connect`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectParams(BTreeMap<&'static str, ParamValue>);

impl ConnectParams {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn insert(&mut self, name: &'static str, value: ParamValue) -> Option<ParamValue> {
        self.0.insert(name, value)
    }

    pub fn remove(&mut self, name: &str) -> Option<ParamValue> {
        self.0.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &ParamValue)> {
        self.0.iter().map(|(name, value)| (*name, value))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert_opt(&mut self, name: &'static str, value: Option<ParamValue>) {
        if let Some(value) = value {
            self.0.insert(name, value);
        }
    }
}

impl Connector {
    /// Resolve this Connector and call `overrides` into ConnectParams.
    pub fn connect_params(&self, overrides: &Overrides) -> Result<ConnectParams, ConfigError> {
        let Credentials {
            account,
            user,
            password,
            private_key,
            private_key_path,
            authenticator,
            endpoint,
            token,
            role,
            autocommit,
        } = &self.credentials;

        // Empty secrets are treated as though they weren't set.
        let password = non_empty(password);
        let private_key = non_empty(private_key);
        let token = non_empty(token);
        let private_key_path = private_key_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty());

        if password.is_none()
            && private_key.is_none()
            && private_key_path.is_none()
            && authenticator.is_none()
            && token.is_none()
        {
            return Err(ConfigError::NoAuthentication);
        }

        let required = |field: &'static str, call: &Option<String>, connector: &Option<String>| {
            call.as_ref()
                .or(connector.as_ref())
                .filter(|value| !value.is_empty())
                .cloned()
                .ok_or(ConfigError::MissingField(field))
        };
        let database = required("database", &overrides.database, &self.database)?;
        let warehouse = required("warehouse", &overrides.warehouse, &self.warehouse)?;
        let schema = required("schema", &overrides.schema, &self.schema)?;

        if account.is_empty() {
            return Err(ConfigError::MissingField("account"));
        }
        if user.is_empty() {
            return Err(ConfigError::MissingField("user"));
        }

        let mut params = ConnectParams::default();
        params.insert("account", ParamValue::Text(account.clone()));
        params.insert("user", ParamValue::Text(user.clone()));
        params.insert("database", ParamValue::Text(database));
        params.insert("warehouse", ParamValue::Text(warehouse));
        params.insert("schema", ParamValue::Text(schema));
        params.insert("application", ParamValue::Text(self.application.clone()));
        params.insert_opt("role", role.clone().map(ParamValue::Text));
        params.insert_opt("autocommit", autocommit.map(ParamValue::Bool));

        // Select exactly one secret. An `oauth` authenticator always uses its token,
        // and otherwise a private key supersedes a token, which supersedes a password.
        if let Some(Authenticator::Oauth) = authenticator {
            let token = token.ok_or(ConfigError::MissingToken)?;
            params.insert("token", ParamValue::Secret(token.clone()));
        } else if let Some(key) = resolve_private_key(private_key, private_key_path)? {
            params.insert("private_key", ParamValue::Key(key));
        } else if let Some(token) = token {
            params.insert("token", ParamValue::Secret(token.clone()));
        } else if let Some(password) = password {
            params.insert("password", ParamValue::Secret(password.clone()));
        }

        match authenticator {
            // The `okta_endpoint` sentinel is replaced by the endpoint URL itself.
            Some(Authenticator::OktaEndpoint) => {
                let endpoint = endpoint.as_ref().ok_or(ConfigError::MissingEndpoint)?;
                url::Url::parse(endpoint)
                    .map_err(|err| ConfigError::InvalidEndpoint(endpoint.clone(), err))?;
                params.insert("authenticator", ParamValue::Text(endpoint.clone()));
            }
            Some(authenticator) => {
                params.insert(
                    "authenticator",
                    ParamValue::Text(authenticator.as_str().to_string()),
                );
            }
            None => {}
        }

        tracing::debug!(
            params = ?params.iter().map(|(name, _)| name).collect::<Vec<_>>(),
            "resolved connection parameters"
        );

        Ok(params)
    }
}

fn non_empty(secret: &Option<Secret<String>>) -> Option<&Secret<String>> {
    secret.as_ref().filter(|secret| !secret.reveal().is_empty())
}

// Load a private key from inline PEM or a PEM file, and decode it into DER.
fn resolve_private_key(
    inline: Option<&Secret<String>>,
    path: Option<&Path>,
) -> Result<Option<Secret<Vec<u8>>>, ConfigError> {
    let pem = match (inline, path) {
        (Some(_), Some(_)) => return Err(ConfigError::AmbiguousPrivateKey),
        (Some(inline), None) => Zeroizing::new(inline.reveal().as_bytes().to_vec()),
        (None, Some(path)) => {
            Zeroizing::new(
                std::fs::read(path).map_err(|source| ConfigError::ReadPrivateKey {
                    path: path.to_owned(),
                    source,
                })?,
            )
        }
        (None, None) => return Ok(None),
    };

    let mut reader = pem.as_slice();
    match rustls_pemfile::private_key(&mut reader) {
        Ok(Some(key)) => Ok(Some(Secret::new(key.secret_der().to_vec()))),
        Ok(None) | Err(_) => Err(ConfigError::InvalidPrivateKey),
    }
}
