//! Identity and addressing types for Blindpost.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::params::{MAX_HOST_LEN, USER_ID_LEN};
use crate::WireError;

/// A numeric user identity: exactly sixteen ASCII digits.
///
/// Identities are allocated by the server at registration. There are no
/// usernames, emails, or phone numbers to correlate; the digit string is
/// the only name a user ever has.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Generate a random identity using the OS RNG.
    ///
    /// The registration path retries until the generated id is free in the
    /// identity store.
    pub fn random() -> Self {
        use rand::Rng;
        let mut rng = rand::rngs::OsRng;
        let digits = (0..USER_ID_LEN)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect();
        Self(digits)
    }

    /// View the identity as its digit string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn valid_user_id(s: &str) -> bool {
    s.len() == USER_ID_LEN && s.bytes().all(|b| b.is_ascii_digit())
}

impl FromStr for UserId {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if valid_user_id(s) {
            Ok(Self(s.to_owned()))
        } else {
            Err(WireError::InvalidUserId(s.to_owned()))
        }
    }
}

impl TryFrom<String> for UserId {
    type Error = WireError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        if valid_user_id(&s) {
            Ok(Self(s))
        } else {
            Err(WireError::InvalidUserId(s))
        }
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

/// A relay address: a local identity, or `id@host` on a federated peer.
///
/// The host part is trimmed and lowercased during parsing. Whether the host
/// is actually reachable or trusted is the relay's concern, not the parser's;
/// only shape is checked here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Address {
    /// A user on this server.
    Local(UserId),
    /// A user on a federated peer server.
    Remote {
        /// The identity on the remote server.
        user: UserId,
        /// The remote server's hostname, lowercased.
        host: String,
    },
}

impl Address {
    /// The user id component, local or remote.
    pub fn user(&self) -> &UserId {
        match self {
            Address::Local(user) => user,
            Address::Remote { user, .. } => user,
        }
    }

    /// The host component, if the address is remote.
    pub fn host(&self) -> Option<&str> {
        match self {
            Address::Local(_) => None,
            Address::Remote { host, .. } => Some(host),
        }
    }
}

impl FromStr for Address {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('@');
        let user_part = parts.next().unwrap_or_default();
        let host_part = parts.next();
        if parts.next().is_some() {
            return Err(WireError::InvalidAddress(
                "multiple '@' separators".into(),
            ));
        }
        let user = UserId::from_str(user_part)?;
        match host_part {
            None => Ok(Address::Local(user)),
            Some(raw) => {
                let host = raw.trim().to_ascii_lowercase();
                if host.is_empty() {
                    return Err(WireError::InvalidAddress("empty host".into()));
                }
                if host.len() > MAX_HOST_LEN {
                    return Err(WireError::InvalidAddress("host too long".into()));
                }
                Ok(Address::Remote { user, host })
            }
        }
    }
}

impl TryFrom<String> for Address {
    type Error = WireError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Local(user) => f.write_str(user.as_str()),
            Address::Remote { user, host } => write!(f, "{}@{}", user, host),
        }
    }
}
