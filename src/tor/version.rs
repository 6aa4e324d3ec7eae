//! Tor version parsing for capability gating

use std::fmt;

/// A Tor release number, `major.minor.micro.patch`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TorVersion(pub u32, pub u32, pub u32, pub u32);

/// First release with ADD_ONION / DEL_ONION
pub const ADD_ONION_MIN: TorVersion = TorVersion(0, 2, 7, 1);
/// First release accepting ClientAuth / BasicAuth on ADD_ONION
pub const ADD_ONION_CLIENT_AUTH_MIN: TorVersion = TorVersion(0, 2, 9, 1);
/// First release accepting ED25519-V3 keys on ADD_ONION
pub const ADD_ONION_V3_MIN: TorVersion = TorVersion(0, 3, 2, 1);

impl TorVersion {
    /// Parse strings such as `0.4.8.9`, `0.3.5.7 (git-abc)` or
    /// `0.4.9.0-alpha-dev`.
    pub fn parse(version: &str) -> Option<Self> {
        let release = version.split_whitespace().next()?;
        let numeric = release.split('-').next()?;
        let mut parts = numeric.split('.').map(|p| p.parse::<u32>());

        let major = parts.next()?.ok()?;
        let minor = parts.next()?.ok()?;
        let micro = parts.next()?.ok()?;
        let patch = match parts.next() {
            Some(p) => p.ok()?,
            None => 0,
        };
        Some(TorVersion(major, minor, micro, patch))
    }
}

impl fmt::Display for TorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0, self.1, self.2, self.3)
    }
}

/// What the connected Tor can do, derived from its reported version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub add_onion: bool,
    pub add_onion_client_auth: bool,
    pub add_onion_v3: bool,
}

impl Capabilities {
    /// Unparseable versions are assumed to be current
    pub fn from_version_string(version: &str) -> Self {
        match TorVersion::parse(version) {
            Some(v) => Self::from_version(v),
            None => {
                tracing::warn!("Could not parse Tor version {:?}, assuming current", version);
                Self::all()
            },
        }
    }

    pub fn from_version(v: TorVersion) -> Self {
        Self {
            add_onion: v >= ADD_ONION_MIN,
            add_onion_client_auth: v >= ADD_ONION_CLIENT_AUTH_MIN,
            add_onion_v3: v >= ADD_ONION_V3_MIN,
        }
    }

    pub fn all() -> Self {
        Self {
            add_onion: true,
            add_onion_client_auth: true,
            add_onion_v3: true,
        }
    }
}
