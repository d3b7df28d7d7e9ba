//! Instance metadata and address resolution.

use std::time::SystemTime;

use crate::node::AddressPreference;
use crate::session::TransportFuture;

/// Address reported by providers before one has been assigned.
pub const UNASSIGNED_ADDRESS: &str = "0.0.0.0";

/// Point-in-time view of the instance's network identity.
///
/// Snapshots are fetched fresh on every connection attempt because
/// addresses may be missing or may change while the instance boots.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceSnapshot {
    /// Private DNS name.
    pub private_dns: Option<String>,
    /// Private IP address.
    pub private_ip: Option<String>,
    /// Public DNS name.
    pub public_dns: Option<String>,
    /// Public IP address.
    pub public_ip: Option<String>,
    /// Virtual network identifier, when the instance lives in one.
    pub network_id: Option<String>,
    /// Time at which the provider created the instance.
    pub created_at: SystemTime,
}

impl InstanceSnapshot {
    /// Resolves the `(host, ip)` pair to dial for the given preference.
    ///
    /// With [`AddressPreference::Private`] the private pair is always used.
    /// Otherwise the public pair wins unless the public DNS name is empty,
    /// in which case the private pair is used instead.
    #[must_use]
    pub fn resolve(&self, preference: AddressPreference) -> Endpoint {
        let use_private = match preference {
            AddressPreference::Private => true,
            AddressPreference::Public => is_blank(self.public_dns.as_deref()),
        };

        if use_private {
            Endpoint::new(self.private_dns.as_deref(), self.private_ip.as_deref())
        } else {
            Endpoint::new(self.public_dns.as_deref(), self.public_ip.as_deref())
        }
    }
}

/// Resolved dialling target.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Endpoint {
    /// Host name as reported by the provider.
    pub host: String,
    /// IP address the session is opened against.
    pub ip: String,
}

impl Endpoint {
    fn new(host: Option<&str>, ip: Option<&str>) -> Self {
        Self {
            host: host.unwrap_or_default().trim().to_owned(),
            ip: ip.unwrap_or_default().trim().to_owned(),
        }
    }

    /// Returns `true` while the provider has not assigned an address yet.
    #[must_use]
    pub fn is_unassigned(&self) -> bool {
        self.host == UNASSIGNED_ADDRESS || self.ip.is_empty() || self.ip == UNASSIGNED_ADDRESS
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|text| text.trim().is_empty())
}

/// Fetches the current provider-side description of the instance.
pub trait InstanceDescriber: Send + Sync {
    /// Returns a fresh snapshot. May be called repeatedly.
    fn describe(&self) -> TransportFuture<'_, InstanceSnapshot>;
}
