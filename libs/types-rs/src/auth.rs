use std::{fmt::Display, str::FromStr};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

const EMAIL_PATTERN: &str = r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$";

lazy_static! {
    static ref EMAIL_REGEX: Regex = Regex::new(EMAIL_PATTERN).unwrap();
}

/// A syntactically valid email address, used as a user's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Email(String);

impl Email {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Email {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() <= 254 && EMAIL_REGEX.is_match(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(format!("invalid email address: '{s}'"))
        }
    }
}

impl TryFrom<String> for Email {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl<'de> Deserialize<'de> for Email {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;
        value.parse().map_err(serde::de::Error::custom)
    }
}

impl Display for Email {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub email: Email,
    pub constituency: String,
    pub is_central_authority: bool,
    pub has_public_key: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        for email in [
            "admin@sentinelvote.tech",
            "voter42@sentinelvote.tech",
            "first.last+tag@example.co.uk",
        ] {
            assert_eq!(email.parse::<Email>().unwrap().as_str(), email);
        }
    }

    #[test]
    fn test_invalid_emails() {
        for email in [
            "",
            "admin",
            "@sentinelvote.tech",
            "admin@",
            "admin@@sentinelvote.tech",
            "admin@sentinelvote.tech'; DROP TABLE users; --",
        ] {
            assert!(email.parse::<Email>().is_err(), "{email:?} should be rejected");
        }
    }

    #[test]
    fn test_deserialize_rejects_invalid_email() {
        assert!(serde_json::from_str::<Email>(r#""not-an-email""#).is_err());
        assert_eq!(
            serde_json::from_str::<Email>(r#""user1@sentinelvote.tech""#).unwrap(),
            "user1@sentinelvote.tech".parse().unwrap()
        );
    }
}
