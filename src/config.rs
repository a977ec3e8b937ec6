//! Per-connection configuration consumed by the engine.

/// Settings for one connection attempt.
///
/// Mirrors the account settings the engine reads: identity, the optional
/// server password sent with `PASS`, and the SASL knobs.
#[derive(Clone, Debug)]
pub struct Config {
    /// Desired nickname.
    pub nickname: String,
    /// Username (ident) sent with `USER`.
    pub username: String,
    /// Real name / GECOS.
    pub realname: String,
    /// Server password sent with `PASS`, if required.
    pub server_password: Option<String>,
    /// SASL credential. Setting this arms SASL authentication.
    pub password: Option<String>,
    /// Override for the SASL authentication identity; the nickname is
    /// used when unset or empty.
    pub sasl_login_name: Option<String>,
    /// Allowed SASL mechanisms. Empty means use whatever the server
    /// advertises on the `sasl` capability.
    pub sasl_mechanisms: Vec<String>,
    /// Authorization identity for the EXTERNAL mechanism.
    pub sasl_authzid: Option<String>,
    /// Permit the PLAIN mechanism on connections without TLS.
    pub plain_sasl_in_clear: bool,
    /// Whether the transport is TLS-protected.
    pub use_tls: bool,
    /// Extra capabilities to request once the server's listing is ready.
    /// Only advertised capabilities are requested.
    pub request_caps: Vec<String>,
}

impl Config {
    /// Create a config with the given identity and defaults for the rest.
    pub fn new(
        nickname: impl Into<String>,
        username: impl Into<String>,
        realname: impl Into<String>,
    ) -> Self {
        Self {
            nickname: nickname.into(),
            username: username.into(),
            realname: realname.into(),
            ..Self::default()
        }
    }

    /// Whether SASL authentication should be attempted at all.
    pub(crate) fn sasl_enabled(&self) -> bool {
        self.password.is_some() || !self.sasl_mechanisms.is_empty()
    }

    /// The SASL authentication identity.
    pub(crate) fn sasl_username(&self) -> &str {
        match &self.sasl_login_name {
            Some(name) if !name.is_empty() => name,
            _ => &self.nickname,
        }
    }

    /// Whether the PLAIN mechanism is acceptable on this connection.
    pub(crate) fn allow_plain(&self) -> bool {
        self.use_tls || self.plain_sasl_in_clear
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nickname: String::new(),
            username: String::new(),
            realname: String::new(),
            server_password: None,
            password: None,
            sasl_login_name: None,
            sasl_mechanisms: Vec::new(),
            sasl_authzid: None,
            plain_sasl_in_clear: false,
            use_tls: true,
            request_caps: Vec::new(),
        }
    }
}
