//! Named certificate profiles.

use std::collections::HashMap;

use rcgen::{DistinguishedName, DnType, RsaKeySize, SignatureAlgorithm};
use serde::{Deserialize, Serialize};

use super::CertError;

/// Name of the profile used when a requested one is missing.
pub const DEFAULT_PROFILE: &str = "default";

/// Subject attributes stamped on every certificate of a profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Subject {
    pub country: String,
    pub province: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

/// Expiry, key size and subject for one kind of certificate.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct CertProfile {
    /// `<n>h`, `<n>d` or `<n>y`; empty selects the per-operation default.
    pub expiry: String,
    /// RSA modulus size in bits.
    pub key_size: u32,
    pub subject: Subject,
}

impl Default for CertProfile {
    fn default() -> Self {
        Self {
            expiry: String::new(),
            key_size: 2048,
            subject: Subject::default(),
        }
    }
}

impl CertProfile {
    /// Lifetime of certificates issued with this profile, or `fallback`.
    pub fn lifetime(&self, fallback: time::Duration) -> Result<time::Duration, CertError> {
        Ok(parse_expiry(&self.expiry)?.unwrap_or(fallback))
    }

    /// `≥4096 → SHA512`, `≥2048 → SHA384`, otherwise SHA256.
    pub fn signature_algorithm(&self) -> &'static SignatureAlgorithm {
        if self.key_size >= 4096 {
            &rcgen::PKCS_RSA_SHA512
        } else if self.key_size >= 2048 {
            &rcgen::PKCS_RSA_SHA384
        } else {
            &rcgen::PKCS_RSA_SHA256
        }
    }

    /// Closest RSA size the key generator supports; 2048 is the floor.
    pub fn rsa_key_size(&self) -> RsaKeySize {
        if self.key_size >= 4096 {
            RsaKeySize::_4096
        } else if self.key_size >= 3072 {
            RsaKeySize::_3072
        } else {
            RsaKeySize::_2048
        }
    }

    pub(crate) fn distinguished_name(&self, common_name: &str) -> DistinguishedName {
        let mut dn = DistinguishedName::new();
        let subject = &self.subject;
        let fields = [
            (DnType::CountryName, &subject.country),
            (DnType::StateOrProvinceName, &subject.province),
            (DnType::LocalityName, &subject.locality),
            (DnType::OrganizationName, &subject.organization),
            (DnType::OrganizationalUnitName, &subject.organizational_unit),
        ];
        for (ty, value) in fields {
            if !value.is_empty() {
                dn.push(ty, value.as_str());
            }
        }
        dn.push(DnType::CommonName, common_name);
        dn
    }
}

/// Profiles keyed by name, with fallback to [`DEFAULT_PROFILE`].
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct CertProfiles(HashMap<String, CertProfile>);

impl CertProfiles {
    pub fn new(profiles: HashMap<String, CertProfile>) -> Self {
        Self(profiles)
    }

    /// Look up `name`, falling back to `default`.
    pub fn get(&self, name: &str) -> Result<&CertProfile, CertError> {
        self.0
            .get(name)
            .or_else(|| self.0.get(DEFAULT_PROFILE))
            .ok_or_else(|| CertError::MissingProfile(name.to_string()))
    }

    pub fn insert(&mut self, name: impl Into<String>, profile: CertProfile) {
        self.0.insert(name.into(), profile);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CertProfile)> {
        self.0.iter()
    }
}

impl Default for CertProfiles {
    fn default() -> Self {
        let mut profiles = HashMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), CertProfile::default());
        Self(profiles)
    }
}

/// Parse `12h`, `30d`, `2y`. Empty input yields `None`.
pub fn parse_expiry(value: &str) -> Result<Option<time::Duration>, CertError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }

    let invalid = || CertError::InvalidExpiry(value.to_string());
    let unit_start = value.char_indices().last().map(|(i, _)| i).unwrap_or(0);
    let (digits, unit) = value.split_at(unit_start);
    let amount: i64 = digits.parse().map_err(|_| invalid())?;
    if amount <= 0 {
        return Err(invalid());
    }

    let duration = match unit {
        "h" => time::Duration::hours(amount),
        "d" => time::Duration::days(amount),
        "y" => time::Duration::days(amount * 365),
        _ => return Err(invalid()),
    };
    Ok(Some(duration))
}
