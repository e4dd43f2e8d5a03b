use std::fmt;
use std::str::FromStr;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;

use crate::error::{Error, ErrorKind};

/// Basic-auth credentials.
///
/// Parses from the `login:password` literal; the split is on the first `:`,
/// so passwords may contain colons. A literal without any colon is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    login: String,
    password: String,
}

impl Auth {
    pub fn new(login: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            login: login.into(),
            password: password.into(),
        }
    }

    #[inline]
    pub fn login(&self) -> &str {
        &self.login
    }

    #[inline]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Value for the `Authorization` header.
    pub fn basic(&self) -> String {
        let raw = format!("{}:{}", self.login, self.password);
        format!("Basic {}", BASE64_STANDARD.encode(raw))
    }
}

impl FromStr for Auth {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((login, password)) => Ok(Auth::new(login, password)),
            None => Err(Error::new(
                ErrorKind::Auth,
                format!("expected login:password, got {s:?}"),
            )),
        }
    }
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.login, self.password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let auth: Auth = "u:p".parse().unwrap();
        assert_eq!(auth.to_string(), "u:p");
    }

    #[test]
    fn splits_on_first_colon() {
        let auth: Auth = "a:b:c".parse().unwrap();
        assert_eq!(auth.login(), "a");
        assert_eq!(auth.password(), "b:c");
    }

    #[test]
    fn empty_password_allowed() {
        let auth: Auth = "user:".parse().unwrap();
        assert_eq!(auth.login(), "user");
        assert_eq!(auth.password(), "");
    }

    #[test]
    fn missing_colon_is_hard_error() {
        let err = "nope".parse::<Auth>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Auth);
    }

    #[test]
    fn basic_header_value() {
        let auth = Auth::new("Aladdin", "open sesame");
        assert_eq!(auth.basic(), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }
}
