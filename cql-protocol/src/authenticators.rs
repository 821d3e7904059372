//! SASL authenticators used during the connection handshake.
use crate::error::Result;

/// Handles one SASL exchange on one connection.
///
/// The connection sends `initial_response` after the server's `AUTHENTICATE`, answers every
/// `AUTH_CHALLENGE` with `evaluate_challenge` and finally hands the `AUTH_SUCCESS` token to
/// `handle_success`.
pub trait SaslAuthenticator: Send {
    fn initial_response(&mut self) -> Vec<u8>;

    fn evaluate_challenge(&mut self, challenge: Option<&[u8]>) -> Result<Vec<u8>>;

    fn handle_success(&mut self, data: Option<&[u8]>) -> Result<()>;
}

/// Creates an authenticator for every new connection.
pub trait SaslAuthenticatorProvider: Send + Sync {
    /// Server authenticator class this provider is meant for. `None` accepts any.
    fn name(&self) -> Option<&str>;

    fn create_authenticator(&self) -> Box<dyn SaslAuthenticator>;
}

const PASSWORD_AUTHENTICATOR: &str = "org.apache.cassandra.auth.PasswordAuthenticator";

/// `PLAIN` mechanism: `\0username\0password`.
#[derive(Debug, Clone)]
pub struct StaticPasswordAuthenticator {
    username: String,
    password: String,
}

impl StaticPasswordAuthenticator {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        StaticPasswordAuthenticator {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslAuthenticator for StaticPasswordAuthenticator {
    fn initial_response(&mut self) -> Vec<u8> {
        let mut token = Vec::with_capacity(self.username.len() + self.password.len() + 2);
        token.push(0);
        token.extend_from_slice(self.username.as_bytes());
        token.push(0);
        token.extend_from_slice(self.password.as_bytes());
        token
    }

    fn evaluate_challenge(&mut self, _challenge: Option<&[u8]>) -> Result<Vec<u8>> {
        Err("Server challenge is not supported by the password authenticator".into())
    }

    fn handle_success(&mut self, _data: Option<&[u8]>) -> Result<()> {
        Ok(())
    }
}

/// Username and password credentials.
#[derive(Debug, Clone)]
pub struct StaticPasswordAuthenticatorProvider {
    username: String,
    password: String,
}

impl StaticPasswordAuthenticatorProvider {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        StaticPasswordAuthenticatorProvider {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl SaslAuthenticatorProvider for StaticPasswordAuthenticatorProvider {
    fn name(&self) -> Option<&str> {
        Some(PASSWORD_AUTHENTICATOR)
    }

    fn create_authenticator(&self) -> Box<dyn SaslAuthenticator> {
        Box::new(StaticPasswordAuthenticator::new(
            self.username.clone(),
            self.password.clone(),
        ))
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoneAuthenticator;

impl SaslAuthenticator for NoneAuthenticator {
    fn initial_response(&mut self) -> Vec<u8> {
        vec![0]
    }

    fn evaluate_challenge(&mut self, _challenge: Option<&[u8]>) -> Result<Vec<u8>> {
        Err("Server challenge is not supported without credentials".into())
    }

    fn handle_success(&mut self, _data: Option<&[u8]>) -> Result<()> {
        Ok(())
    }
}

/// Provider for clusters without authentication.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoneAuthenticatorProvider;

impl SaslAuthenticatorProvider for NoneAuthenticatorProvider {
    fn name(&self) -> Option<&str> {
        None
    }

    fn create_authenticator(&self) -> Box<dyn SaslAuthenticator> {
        Box::new(NoneAuthenticator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_password_token() {
        let mut auth = StaticPasswordAuthenticator::new("foo", "bar");
        assert_eq!(auth.initial_response(), b"\0foo\0bar".to_vec());
        assert!(auth.evaluate_challenge(None).is_err());
    }

    #[test]
    fn test_static_password_authenticator_cassandra_name() {
        let auth = StaticPasswordAuthenticatorProvider::new("foo", "bar");
        assert_eq!(
            auth.name(),
            Some("org.apache.cassandra.auth.PasswordAuthenticator")
        );
    }

    #[test]
    fn test_authenticator_none() {
        let provider = NoneAuthenticatorProvider;
        assert_eq!(provider.name(), None);
        assert_eq!(provider.create_authenticator().initial_response(), vec![0]);
    }
}
