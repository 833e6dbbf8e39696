//! Certificate issuance: root CA, intermediate CA and leaf.

use std::net::IpAddr;

use rcgen::{
    BasicConstraints, CertificateParams, ExtendedKeyUsagePurpose, IsCa, KeyPair,
    KeyUsagePurpose, SanType, SerialNumber,
};
use time::{Duration, OffsetDateTime};

use super::profile::{CertProfile, CertProfiles};
use super::{CaBundle, CertBundle, CertError};

const CA_LIFETIME: Duration = Duration::days(20 * 365);
const SA_LIFETIME: Duration = Duration::days(10 * 365);
const CE_LIFETIME: Duration = Duration::days(365);

/// Self-signed root CA.
pub fn create_ca(
    profiles: &CertProfiles,
    profile: &str,
    common_name: &str,
) -> Result<CaBundle, CertError> {
    let profile = profiles.get(profile)?;
    let common_name = resolve_common_name(common_name, &[], &[])?;
    let params = ca_params(profile, &common_name, profile.lifetime(CA_LIFETIME)?);
    let key = generate_key(profile)?;

    let cert = params.clone().self_signed(&key)?;
    let bundle = CertBundle {
        crt_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    };

    tracing::debug!(common_name = %common_name, "root CA created");
    Ok(CaBundle::from_parts(bundle, params, key))
}

/// Intermediate CA issued by `ca`.
pub fn create_sa(
    profiles: &CertProfiles,
    profile: &str,
    common_name: &str,
    ca: &CaBundle,
) -> Result<CaBundle, CertError> {
    let profile = profiles.get(profile)?;
    let common_name = resolve_common_name(common_name, &[], &[])?;
    let params = ca_params(profile, &common_name, profile.lifetime(SA_LIFETIME)?);
    let key = generate_key(profile)?;

    let cert = params.clone().signed_by(&key, ca.issuer())?;
    let bundle = CertBundle {
        crt_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    };

    tracing::debug!(common_name = %common_name, "intermediate CA created");
    Ok(CaBundle::from_parts(bundle, params, key))
}

/// Leaf certificate for `dns` and `ips`, signed by `signer` or self-signed.
pub fn create_ce(
    profiles: &CertProfiles,
    profile: &str,
    common_name: &str,
    dns: &[String],
    ips: &[IpAddr],
    signer: Option<&CaBundle>,
) -> Result<CertBundle, CertError> {
    let profile = profiles.get(profile)?;
    let common_name = resolve_common_name(common_name, dns, ips)?;

    let mut params = base_params(profile, &common_name, profile.lifetime(CE_LIFETIME)?);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.subject_alt_names = subject_alt_names(dns, ips)?;

    let key = generate_key(profile)?;
    let cert = match signer {
        Some(ca) => params.signed_by(&key, ca.issuer())?,
        None => params.self_signed(&key)?,
    };

    Ok(CertBundle {
        crt_pem: cert.pem(),
        key_pem: key.serialize_pem(),
    })
}

/// True when the first certificate in `pem` is past its `not_after`.
pub fn is_pem_expired(pem: &str) -> Result<bool, CertError> {
    is_pem_expired_at(pem, OffsetDateTime::now_utc())
}

/// [`is_pem_expired`] against an explicit instant.
pub fn is_pem_expired_at(pem: &str, at: OffsetDateTime) -> Result<bool, CertError> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes())
        .map_err(|e| CertError::Pem(e.to_string()))?;
    let cert = pem
        .parse_x509()
        .map_err(|e| CertError::Pem(e.to_string()))?;

    Ok(cert.validity().not_after.timestamp() < at.unix_timestamp())
}

/// An empty common name is taken from the single DNS name, else the single IP.
fn resolve_common_name(
    common_name: &str,
    dns: &[String],
    ips: &[IpAddr],
) -> Result<String, CertError> {
    if !common_name.is_empty() {
        return Ok(common_name.to_string());
    }
    match (dns, ips) {
        ([name], _) => Ok(name.clone()),
        ([], [ip]) => Ok(ip.to_string()),
        _ => Err(CertError::MissingCommonName {
            dns: dns.len(),
            ips: ips.len(),
        }),
    }
}

fn base_params(profile: &CertProfile, common_name: &str, lifetime: Duration) -> CertificateParams {
    let mut params = CertificateParams::default();
    params.distinguished_name = profile.distinguished_name(common_name);
    params.serial_number = Some(random_serial());

    let now = OffsetDateTime::now_utc();
    params.not_before = now;
    params.not_after = now + lifetime;

    params.extended_key_usages = vec![
        ExtendedKeyUsagePurpose::ServerAuth,
        ExtendedKeyUsagePurpose::ClientAuth,
    ];
    params
}

fn ca_params(profile: &CertProfile, common_name: &str, lifetime: Duration) -> CertificateParams {
    let mut params = base_params(profile, common_name, lifetime);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
        KeyUsagePurpose::KeyCertSign,
    ];
    params
}

fn subject_alt_names(dns: &[String], ips: &[IpAddr]) -> Result<Vec<SanType>, CertError> {
    let mut names = Vec::with_capacity(dns.len() + ips.len());
    for name in dns {
        let ia5 = name
            .clone()
            .try_into()
            .map_err(|_| CertError::InvalidName(name.clone()))?;
        names.push(SanType::DnsName(ia5));
    }
    names.extend(ips.iter().copied().map(SanType::IpAddress));
    Ok(names)
}

fn generate_key(profile: &CertProfile) -> Result<KeyPair, CertError> {
    Ok(KeyPair::generate_rsa_for(
        profile.signature_algorithm(),
        profile.rsa_key_size(),
    )?)
}

/// Uniform in `[0, 2^128)`.
fn random_serial() -> SerialNumber {
    let bytes: [u8; 16] = rand::random();
    SerialNumber::from(bytes.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use x509_parser::prelude::*;

    fn parse(pem: &str) -> (Vec<u8>, String) {
        let (_, pem) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).unwrap();
        let cert = pem.parse_x509().unwrap();
        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default()
            .to_string();
        (pem.contents.clone(), cn)
    }

    fn verifies_under(leaf_pem: &str, issuer_pem: &str) -> bool {
        let (_, leaf) = x509_parser::pem::parse_x509_pem(leaf_pem.as_bytes()).unwrap();
        let (_, issuer) = x509_parser::pem::parse_x509_pem(issuer_pem.as_bytes()).unwrap();
        let leaf = leaf.parse_x509().unwrap();
        let issuer = issuer.parse_x509().unwrap();
        leaf.verify_signature(Some(issuer.public_key())).is_ok()
    }

    #[test]
    fn ca_is_self_signed_ca() {
        let profiles = CertProfiles::default();
        let ca = create_ca(&profiles, "default", "Gateway Root").unwrap();

        let (der, cn) = parse(ca.crt_pem());
        assert_eq!(cn, "Gateway Root");
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        assert!(cert.is_ca());
        assert!(verifies_under(ca.crt_pem(), ca.crt_pem()));
    }

    #[test]
    fn leaf_verifies_under_root_and_intermediate() {
        let profiles = CertProfiles::default();
        let ca = create_ca(&profiles, "default", "Gateway Root").unwrap();
        let sa = create_sa(&profiles, "default", "Gateway Intermediate", &ca).unwrap();
        assert!(verifies_under(sa.crt_pem(), ca.crt_pem()));

        let leaf = create_ce(
            &profiles,
            "default",
            "",
            &["dev1.com".to_string()],
            &[],
            Some(&sa),
        )
        .unwrap();
        assert!(verifies_under(&leaf.crt_pem, sa.crt_pem()));
        assert!(!verifies_under(&leaf.crt_pem, ca.crt_pem()));

        let (der, cn) = parse(&leaf.crt_pem);
        assert_eq!(cn, "dev1.com");
        let (_, cert) = X509Certificate::from_der(&der).unwrap();
        assert!(!cert.is_ca());
        let san = cert.subject_alternative_name().unwrap().unwrap();
        assert!(san
            .value
            .general_names
            .iter()
            .any(|n| matches!(n, GeneralName::DNSName("dev1.com"))));
    }

    #[test]
    fn leaf_without_signer_is_self_signed() {
        let profiles = CertProfiles::default();
        let ip: IpAddr = "10.1.2.3".parse().unwrap();
        let leaf = create_ce(&profiles, "default", "", &[], &[ip], None).unwrap();
        assert!(verifies_under(&leaf.crt_pem, &leaf.crt_pem));
        assert_eq!(parse(&leaf.crt_pem).1, "10.1.2.3");
    }

    #[test]
    fn common_name_must_be_derivable() {
        let profiles = CertProfiles::default();
        let two = ["a.com".to_string(), "b.com".to_string()];
        let err = create_ce(&profiles, "default", "", &two, &[], None).unwrap_err();
        assert!(matches!(err, CertError::MissingCommonName { dns: 2, ips: 0 }));

        let err = create_ca(&profiles, "default", "").unwrap_err();
        assert!(matches!(err, CertError::MissingCommonName { .. }));
    }

    #[test]
    fn expiry_check_tracks_not_after() {
        let mut profiles = CertProfiles::default();
        profiles.insert(
            "short",
            CertProfile {
                expiry: "2h".into(),
                ..CertProfile::default()
            },
        );
        let leaf = create_ce(&profiles, "short", "dev1.com", &[], &[], None).unwrap();

        assert!(!is_pem_expired(&leaf.crt_pem).unwrap());
        let later = OffsetDateTime::now_utc() + Duration::hours(3);
        assert!(is_pem_expired_at(&leaf.crt_pem, later).unwrap());
    }

    #[test]
    fn garbage_pem_is_an_error() {
        assert!(is_pem_expired("not a certificate").is_err());
    }

    #[test]
    fn ca_round_trips_through_pem() {
        let profiles = CertProfiles::default();
        let ca = create_ca(&profiles, "default", "Gateway Root").unwrap();
        let loaded = CaBundle::from_pem(&ca.bundle().crt_pem, &ca.bundle().key_pem).unwrap();

        let leaf = create_ce(&profiles, "default", "api.local", &[], &[], Some(&loaded)).unwrap();
        assert!(verifies_under(&leaf.crt_pem, ca.crt_pem()));

        let (leaf_der, _) = parse(&leaf.crt_pem);
        let (ca_der, _) = parse(ca.crt_pem());
        let (_, leaf_cert) = X509Certificate::from_der(&leaf_der).unwrap();
        let (_, ca_cert) = X509Certificate::from_der(&ca_der).unwrap();
        assert_eq!(leaf_cert.issuer().to_string(), ca_cert.subject().to_string());
        assert!(leaf_cert.issuer().to_string().contains("CN=Gateway Root"));
    }
}
