/*
 * Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
 * SPDX-License-Identifier: Apache-2.0
 */

use core::fmt;

use serde::Deserialize;

/// The client user value that marks an account as anonymous.
pub const ANONYMOUS_USER: &str = "anonymous";

/// Authentication scheme for a grid server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Native (password) authentication
    #[default]
    Native,
    /// PAM authentication
    Pam,
    /// GSI authentication
    Gsi,
}

/// SSL parameters for an account, when the connection is encrypted.
#[derive(Debug, Clone, Default, Deserialize)]
#[non_exhaustive]
pub struct SslConfig {
    /// Path to the CA certificate file
    #[serde(default)]
    pub ca_cert_path: Option<String>,
    /// Encryption key size in bytes
    #[serde(default)]
    pub key_size: u32,
    /// Encryption algorithm name
    #[serde(default)]
    pub algorithm: String,
    /// Salt size in bytes
    #[serde(default)]
    pub salt_size: u32,
    /// Number of hash rounds
    #[serde(default)]
    pub hash_rounds: u32,
}

/// Identity of a data grid server and the user connecting to it.
///
/// Immutable after construction. The `Debug` representation masks the
/// password so accounts can be logged safely.
#[derive(Clone, Deserialize)]
#[serde(from = "RawAccount")]
pub struct Account {
    host: String,
    port: u16,
    zone: String,
    username: String,
    client_username: String,
    auth_scheme: AuthScheme,
    default_resource: String,
    password: String,
    ssl: Option<SslConfig>,
}

/// Wire shape for deserializing an [`Account`] from a textual configuration.
#[derive(Deserialize)]
struct RawAccount {
    host: String,
    port: u16,
    zone: String,
    user: String,
    #[serde(default)]
    client_user: Option<String>,
    #[serde(default)]
    auth_scheme: AuthScheme,
    #[serde(default)]
    default_resource: String,
    #[serde(default)]
    password: String,
    #[serde(default)]
    ssl_ca_cert_path: Option<String>,
    #[serde(default)]
    ssl_key_size: u32,
    #[serde(default)]
    ssl_algorithm: String,
    #[serde(default)]
    ssl_salt_size: u32,
    #[serde(default)]
    ssl_hash_rounds: u32,
}

impl From<RawAccount> for Account {
    fn from(raw: RawAccount) -> Self {
        let ssl = if raw.ssl_ca_cert_path.is_some() || !raw.ssl_algorithm.is_empty() {
            Some(SslConfig {
                ca_cert_path: raw.ssl_ca_cert_path,
                key_size: raw.ssl_key_size,
                algorithm: raw.ssl_algorithm,
                salt_size: raw.ssl_salt_size,
                hash_rounds: raw.ssl_hash_rounds,
            })
        } else {
            None
        };

        let mut builder = Account::builder()
            .host(raw.host)
            .port(raw.port)
            .zone(raw.zone)
            .username(raw.user)
            .auth_scheme(raw.auth_scheme)
            .default_resource(raw.default_resource)
            .password(raw.password);
        if let Some(client_user) = raw.client_user {
            builder = builder.client_username(client_user);
        }
        if let Some(ssl) = ssl {
            builder = builder.ssl(ssl);
        }
        builder.build()
    }
}

impl Account {
    /// Create a new `Account` builder
    pub fn builder() -> Builder {
        Builder::default()
    }

    /// Server host name
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Server port
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Zone name
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Server user name
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Client user name; equals [`username`](Self::username) unless overridden
    pub fn client_username(&self) -> &str {
        &self.client_username
    }

    /// Authentication scheme
    pub fn auth_scheme(&self) -> AuthScheme {
        self.auth_scheme
    }

    /// Default storage resource for this account
    pub fn default_resource(&self) -> &str {
        &self.default_resource
    }

    /// Password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// SSL parameters, when set
    pub fn ssl(&self) -> Option<&SslConfig> {
        self.ssl.as_ref()
    }

    /// Whether the client user is the anonymous user
    pub fn is_anonymous(&self) -> bool {
        self.client_username == ANONYMOUS_USER
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("zone", &self.zone)
            .field("username", &self.username)
            .field("client_username", &self.client_username)
            .field("auth_scheme", &self.auth_scheme)
            .field("default_resource", &self.default_resource)
            .field("password", &"****")
            .field("ssl", &self.ssl)
            .finish()
    }
}

/// Fluent style builder for [`Account`]
#[derive(Debug, Clone, Default)]
pub struct Builder {
    host: String,
    port: u16,
    zone: String,
    username: String,
    client_username: Option<String>,
    auth_scheme: AuthScheme,
    default_resource: String,
    password: String,
    ssl: Option<SslConfig>,
}

impl Builder {
    /// Set the server host name
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the zone name
    pub fn zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = zone.into();
        self
    }

    /// Set the server user name
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Set the client user name. Defaults to the server user name.
    pub fn client_username(mut self, client_username: impl Into<String>) -> Self {
        self.client_username = Some(client_username.into());
        self
    }

    /// Set the authentication scheme
    pub fn auth_scheme(mut self, auth_scheme: AuthScheme) -> Self {
        self.auth_scheme = auth_scheme;
        self
    }

    /// Set the default storage resource
    pub fn default_resource(mut self, default_resource: impl Into<String>) -> Self {
        self.default_resource = default_resource.into();
        self
    }

    /// Set the password
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the SSL parameters
    pub fn ssl(mut self, ssl: SslConfig) -> Self {
        self.ssl = Some(ssl);
        self
    }

    /// Consumes the builder and constructs an [`Account`]
    pub fn build(self) -> Account {
        let client_username = match self.client_username {
            Some(name) if !name.is_empty() => name,
            _ => self.username.clone(),
        };
        Account {
            host: self.host,
            port: self.port,
            zone: self.zone,
            username: self.username,
            client_username,
            auth_scheme: self.auth_scheme,
            default_resource: self.default_resource,
            password: self.password,
            ssl: self.ssl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_account() -> Account {
        Account::builder()
            .host("grid.example.org")
            .port(1247)
            .zone("tempZone")
            .username("rods")
            .password("hunter2")
            .default_resource("demoResc")
            .build()
    }

    #[test]
    fn client_user_defaults_to_server_user() {
        let account = test_account();
        assert_eq!(account.client_username(), "rods");
        assert!(!account.is_anonymous());
    }

    #[test]
    fn anonymous_detection() {
        let account = Account::builder()
            .host("grid.example.org")
            .port(1247)
            .zone("tempZone")
            .username("rods")
            .client_username(ANONYMOUS_USER)
            .build();
        assert!(account.is_anonymous());
    }

    #[test]
    fn debug_masks_password() {
        let rendered = format!("{:?}", test_account());
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("****"));
    }

    #[test]
    fn deserializes_from_textual_config() {
        let account: Account = serde_json::from_str(
            r#"{
                "host": "grid.example.org",
                "port": 1247,
                "zone": "tempZone",
                "user": "rods",
                "auth_scheme": "pam",
                "default_resource": "demoResc",
                "password": "secret",
                "ssl_ca_cert_path": "/etc/ssl/ca.crt",
                "ssl_key_size": 32,
                "ssl_algorithm": "AES-256-CBC",
                "ssl_salt_size": 8,
                "ssl_hash_rounds": 16
            }"#,
        )
        .unwrap();

        assert_eq!(account.username(), "rods");
        assert_eq!(account.client_username(), "rods");
        assert_eq!(account.auth_scheme(), AuthScheme::Pam);
        let ssl = account.ssl().expect("ssl configured");
        assert_eq!(ssl.key_size, 32);
        assert_eq!(ssl.algorithm, "AES-256-CBC");
    }
}
