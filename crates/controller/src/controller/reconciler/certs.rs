//! # Self-signed certificate lifecycle
//!
//! Issues and rotates a CA-signed TLS leaf for the workload. The SAN set
//! tracks the current pod and service IPs plus the known internal DNS
//! names; the secret is rewritten only when the live certificate's SAN set
//! stops being a superset of the expected one, when it expires, or when it
//! cannot be parsed at all.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use k8s_openapi::api::core::v1::{Pod, Secret, Service};
use k8s_openapi::ByteString;
use kube::api::{Api, ListParams, ObjectMeta};
use kube::ResourceExt;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info};
use x509_cert::builder::{Builder, CertificateBuilder, Profile};
use const_oid::db::rfc5280::{ID_CE_SUBJECT_ALT_NAME, ID_KP_SERVER_AUTH};
use x509_cert::der::asn1::{Ia5String, OctetString};
use x509_cert::der::{Decode, DecodePem, EncodePem};
use x509_cert::ext::pkix::name::GeneralName;
use x509_cert::ext::pkix::{ExtendedKeyUsage, SubjectAltName};
use x509_cert::name::Name;
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;
use x509_cert::time::Validity;
use x509_cert::Certificate;

use crate::crd::{LLMInferenceService, CERT_EXPIRATION_ANNOTATION, PART_OF_VALUE};

use super::lifecycle::{self, is_not_found};
use super::scheduler::SchedulerSnapshot;
use super::workload::COMPONENT_WORKLOAD;
use super::{names, semantic, ReconcileError, Reconciler};

/// Leaf validity: ten years, with a 20% renewal buffer recorded in the
/// expiration annotation.
const LEAF_VALIDITY: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);
const RENEWAL_BUFFER: Duration = Duration::from_secs(2 * 365 * 24 * 60 * 60);

#[derive(Debug, Error)]
pub enum CertError {
    #[error("signing secret {namespace}/{name} is missing key material")]
    CaSecretIncomplete { namespace: String, name: String },
    #[error("failed to parse CA material: {0}")]
    CaUnparsable(String),
    #[error("failed to issue certificate: {0}")]
    Issue(String),
}

/// The subject alternative names a workload certificate must cover.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SanSet {
    pub dns: BTreeSet<String>,
    pub ips: BTreeSet<IpAddr>,
}

impl SanSet {
    /// Rotation is gated on this: a live certificate whose SANs are a
    /// superset of the expected set is left alone.
    #[must_use]
    pub fn is_superset_of(&self, expected: &Self) -> bool {
        self.dns.is_superset(&expected.dns) && self.ips.is_superset(&expected.ips)
    }
}

/// Issues CA-signed leaves. The key size is fixed in production; tests
/// shrink it to keep key generation fast.
#[derive(Debug, Clone, Copy)]
pub struct Issuer {
    pub key_bits: usize,
}

impl Default for Issuer {
    fn default() -> Self {
        Self { key_bits: 4096 }
    }
}

/// PEM-encoded issue result. `chain_pem` is the leaf followed by the CA.
#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub chain_pem: String,
    pub key_pem: String,
}

impl Issuer {
    /// Issue an RSA leaf signed by the given CA, SHA-256 with RSA, key
    /// usages digital-signature + key-encipherment, EKU server-auth, and a
    /// 128-bit random serial.
    pub fn issue_leaf(
        &self,
        ca_cert_pem: &str,
        ca_key_pem: &str,
        sans: &SanSet,
    ) -> Result<IssuedCert, CertError> {
        let ca_cert = Certificate::from_pem(ca_cert_pem.as_bytes())
            .map_err(|e| CertError::CaUnparsable(e.to_string()))?;
        let ca_key = parse_rsa_key(ca_key_pem)?;

        let mut rng = rand::rngs::OsRng;
        let leaf_key = RsaPrivateKey::new(&mut rng, self.key_bits)
            .map_err(|e| CertError::Issue(e.to_string()))?;
        let spki_der = leaf_key
            .to_public_key()
            .to_public_key_der()
            .map_err(|e| CertError::Issue(e.to_string()))?;
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes())
            .map_err(|e| CertError::Issue(e.to_string()))?;

        let mut serial_bytes = [0u8; 16];
        rand::RngCore::fill_bytes(&mut rng, &mut serial_bytes);
        serial_bytes[0] &= 0x7f;
        let serial =
            SerialNumber::new(&serial_bytes).map_err(|e| CertError::Issue(e.to_string()))?;

        let validity =
            Validity::from_now(LEAF_VALIDITY).map_err(|e| CertError::Issue(e.to_string()))?;
        let common_name = sans
            .dns
            .iter()
            .find(|d| d.as_str() != "localhost")
            .cloned()
            .unwrap_or_else(|| "localhost".to_string());
        let subject = Name::from_str(&format!("CN={common_name}"))
            .map_err(|e| CertError::Issue(e.to_string()))?;
        let profile = Profile::Leaf {
            issuer: ca_cert.tbs_certificate.subject.clone(),
            enable_key_agreement: false,
            enable_key_encipherment: true,
        };

        let signer = SigningKey::<Sha256>::new(ca_key);
        let mut builder =
            CertificateBuilder::new(profile, serial, validity, subject, spki, &signer)
                .map_err(|e| CertError::Issue(e.to_string()))?;
        builder
            .add_extension(&SubjectAltName(general_names(sans)?))
            .map_err(|e| CertError::Issue(e.to_string()))?;
        builder
            .add_extension(&ExtendedKeyUsage(vec![ID_KP_SERVER_AUTH]))
            .map_err(|e| CertError::Issue(e.to_string()))?;
        let leaf = builder
            .build::<rsa::pkcs1v15::Signature>()
            .map_err(|e| CertError::Issue(e.to_string()))?;

        let leaf_pem = leaf
            .to_pem(LineEnding::LF)
            .map_err(|e| CertError::Issue(e.to_string()))?;
        let ca_pem = ca_cert
            .to_pem(LineEnding::LF)
            .map_err(|e| CertError::Issue(e.to_string()))?;
        let key_pem = leaf_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| CertError::Issue(e.to_string()))?
            .to_string();
        Ok(IssuedCert {
            chain_pem: format!("{leaf_pem}{ca_pem}"),
            key_pem,
        })
    }
}

/// Both PKCS#8 and PKCS#1 CA keys appear in the wild; accept either.
fn parse_rsa_key(pem: &str) -> Result<RsaPrivateKey, CertError> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| CertError::CaUnparsable(e.to_string()))
}

fn general_names(sans: &SanSet) -> Result<Vec<GeneralName>, CertError> {
    let mut entries = Vec::with_capacity(sans.dns.len() + sans.ips.len());
    for dns in &sans.dns {
        entries.push(GeneralName::DnsName(
            Ia5String::new(dns).map_err(|e| CertError::Issue(e.to_string()))?,
        ));
    }
    for ip in &sans.ips {
        let octets = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        entries.push(GeneralName::IpAddress(
            OctetString::new(octets).map_err(|e| CertError::Issue(e.to_string()))?,
        ));
    }
    Ok(entries)
}

/// SAN set read back from a live certificate.
#[must_use]
pub fn certificate_sans(cert: &Certificate) -> SanSet {
    let mut sans = SanSet::default();
    let Some(extensions) = cert.tbs_certificate.extensions.as_ref() else {
        return sans;
    };
    for ext in extensions {
        if ext.extn_id != ID_CE_SUBJECT_ALT_NAME {
            continue;
        }
        let Ok(san) = SubjectAltName::from_der(ext.extn_value.as_bytes()) else {
            continue;
        };
        for name in san.0 {
            match name {
                GeneralName::DnsName(dns) => {
                    sans.dns.insert(dns.to_string());
                }
                GeneralName::IpAddress(octets) => {
                    let bytes = octets.as_bytes();
                    let ip = match bytes.len() {
                        4 => Some(IpAddr::from(<[u8; 4]>::try_from(bytes).unwrap_or_default())),
                        16 => Some(IpAddr::from(<[u8; 16]>::try_from(bytes).unwrap_or_default())),
                        _ => None,
                    };
                    if let Some(ip) = ip {
                        sans.ips.insert(ip);
                    }
                }
                _ => {}
            }
        }
    }
    sans
}

fn certificate_not_after(cert: &Certificate) -> SystemTime {
    cert.tbs_certificate.validity.not_after.to_system_time()
}

fn first_certificate(pem: &[u8]) -> Option<Certificate> {
    Certificate::load_pem_chain(pem)
        .ok()
        .and_then(|chain| chain.into_iter().next())
}

/// Recreate when: missing, empty data, PEM undecodable, SAN set not a
/// superset of expected, or expired.
#[must_use]
pub fn secret_needs_reissue(secret: Option<&Secret>, expected: &SanSet, now: SystemTime) -> bool {
    let Some(secret) = secret else { return true };
    let Some(data) = secret.data.as_ref().filter(|d| !d.is_empty()) else {
        return true;
    };
    let Some(ByteString(cert_bytes)) = data.get("tls.crt") else {
        return true;
    };
    if !data.contains_key("tls.key") {
        return true;
    }
    let Some(cert) = first_certificate(cert_bytes) else {
        return true;
    };
    if !certificate_sans(&cert).is_superset_of(expected) {
        return true;
    }
    certificate_not_after(&cert) <= now
}

/// Expected SAN set: loopback, every workload pod IP, every owned service
/// cluster IP, and the internal DNS names (EPP service only when the
/// scheduler pool is known).
#[must_use]
pub fn expected_sans(
    llmisvc: &LLMInferenceService,
    scheduler_managed: bool,
    pod_ips: impl IntoIterator<Item = IpAddr>,
    service_ips: impl IntoIterator<Item = IpAddr>,
) -> SanSet {
    let name = llmisvc.name_any();
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let mut sans = SanSet::default();
    sans.dns.insert("localhost".to_string());
    sans.dns
        .insert(format!("{}.{namespace}.svc", names::workload_service(&name)));
    if scheduler_managed {
        sans.dns
            .insert(format!("{}.{namespace}.svc", names::epp_service(&name)));
    }
    sans.ips.insert(IpAddr::from([127, 0, 0, 1]));
    sans.ips.extend(pod_ips);
    sans.ips.extend(service_ips);
    sans
}

/// Reconcile the self-signed certificate secret for one service.
pub async fn reconcile_self_signed_certs(
    reconciler: &Reconciler,
    llmisvc: &LLMInferenceService,
    scheduler: &SchedulerSnapshot,
) -> Result<(), ReconcileError> {
    let name = llmisvc.name_any();
    let namespace = llmisvc.namespace().unwrap_or_else(|| "default".to_string());
    let selector = format!(
        "app.kubernetes.io/part-of={PART_OF_VALUE},app.kubernetes.io/name={name}"
    );

    let pods: Api<Pod> = Api::namespaced(reconciler.client.clone(), &namespace);
    let pod_ips: Vec<IpAddr> = pods
        .list(&ListParams::default().labels(&selector))
        .await?
        .items
        .iter()
        .filter(|p| {
            p.labels()
                .get("app.kubernetes.io/component")
                .is_some_and(|c| c.starts_with(COMPONENT_WORKLOAD))
        })
        .filter_map(|p| p.status.as_ref().and_then(|s| s.pod_ip.as_deref()))
        .filter_map(|ip| ip.parse().ok())
        .collect();

    let services: Api<Service> = Api::namespaced(reconciler.client.clone(), &namespace);
    let service_ips: Vec<IpAddr> = services
        .list(&ListParams::default().labels(&selector))
        .await?
        .items
        .iter()
        .filter_map(|s| s.spec.as_ref().and_then(|spec| spec.cluster_ip.as_deref()))
        .filter(|ip| !ip.is_empty() && *ip != "None")
        .filter_map(|ip| ip.parse().ok())
        .collect();

    let expected = expected_sans(llmisvc, scheduler.managed, pod_ips, service_ips);

    let secrets: Api<Secret> = Api::namespaced(reconciler.client.clone(), &namespace);
    let secret_name = names::certs_secret(&name);
    let current = match secrets.get(&secret_name).await {
        Ok(secret) => Some(secret),
        Err(err) if is_not_found(&err) => None,
        Err(err) => return Err(err.into()),
    };

    if !secret_needs_reissue(current.as_ref(), &expected, SystemTime::now()) {
        debug!(secret = %secret_name, "certificate SANs still cover the expected set");
        return Ok(());
    }

    let (ca_cert_pem, ca_key_pem) = load_signing_ca(reconciler).await?;
    let issued = Issuer::default()
        .issue_leaf(&ca_cert_pem, &ca_key_pem, &expected)
        .map_err(ReconcileError::Certificate)?;
    info!(secret = %secret_name, dns = ?expected.dns, "issued fresh workload certificate");

    let renew_at = chrono::Utc::now()
        + chrono::Duration::from_std(LEAF_VALIDITY - RENEWAL_BUFFER)
            .unwrap_or_else(|_| chrono::Duration::zero());
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name),
            namespace: Some(namespace),
            labels: Some(super::child_labels(&name, COMPONENT_WORKLOAD)),
            annotations: Some(
                [(CERT_EXPIRATION_ANNOTATION.to_string(), renew_at.to_rfc3339())].into(),
            ),
            ..Default::default()
        },
        type_: Some("kubernetes.io/tls".to_string()),
        data: Some(
            [
                (
                    "tls.crt".to_string(),
                    ByteString(issued.chain_pem.into_bytes()),
                ),
                (
                    "tls.key".to_string(),
                    ByteString(issued.key_pem.into_bytes()),
                ),
            ]
            .into(),
        ),
        ..Default::default()
    };
    lifecycle::reconcile_child(reconciler, llmisvc, secret, semantic::semantic_eq).await?;
    Ok(())
}

/// The CA pair lives in a cluster secret under `tls.crt`/`tls.key`.
async fn load_signing_ca(reconciler: &Reconciler) -> Result<(String, String), ReconcileError> {
    let api: Api<Secret> = Api::namespaced(
        reconciler.client.clone(),
        &reconciler.config.signing_secret_namespace,
    );
    let secret = api.get(&reconciler.config.signing_secret_name).await?;
    let incomplete = || {
        ReconcileError::Certificate(CertError::CaSecretIncomplete {
            namespace: reconciler.config.signing_secret_namespace.clone(),
            name: reconciler.config.signing_secret_name.clone(),
        })
    };
    let data = secret.data.as_ref().ok_or_else(incomplete)?;
    let cert = data.get("tls.crt").ok_or_else(incomplete)?;
    let key = data.get("tls.key").ok_or_else(incomplete)?;
    Ok((
        String::from_utf8_lossy(&cert.0).into_owned(),
        String::from_utf8_lossy(&key.0).into_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::LLMInferenceServiceSpec;

    /// Self-signed root for tests only.
    fn test_ca(key_bits: usize) -> (String, String) {
        let mut rng = rand::rngs::OsRng;
        let ca_key = RsaPrivateKey::new(&mut rng, key_bits).unwrap();
        let spki_der = ca_key.to_public_key().to_public_key_der().unwrap();
        let spki = SubjectPublicKeyInfoOwned::from_der(spki_der.as_bytes()).unwrap();
        let serial = SerialNumber::new(&[1u8]).unwrap();
        let validity = Validity::from_now(Duration::from_secs(3600 * 24 * 365)).unwrap();
        let subject = Name::from_str("CN=test-service-ca").unwrap();
        let signer = SigningKey::<Sha256>::new(ca_key.clone());
        let builder =
            CertificateBuilder::new(Profile::Root, serial, validity, subject, spki, &signer)
                .unwrap();
        let cert = builder.build::<rsa::pkcs1v15::Signature>().unwrap();
        (
            cert.to_pem(LineEnding::LF).unwrap(),
            ca_key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string(),
        )
    }

    fn san_set(dns: &[&str], ips: &[&str]) -> SanSet {
        SanSet {
            dns: dns.iter().map(|d| (*d).to_string()).collect(),
            ips: ips.iter().map(|i| i.parse().unwrap()).collect(),
        }
    }

    fn tls_secret(chain_pem: &str, key_pem: &str) -> Secret {
        Secret {
            data: Some(
                [
                    (
                        "tls.crt".to_string(),
                        ByteString(chain_pem.as_bytes().to_vec()),
                    ),
                    (
                        "tls.key".to_string(),
                        ByteString(key_pem.as_bytes().to_vec()),
                    ),
                ]
                .into(),
            ),
            type_: Some("kubernetes.io/tls".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn issued_leaf_carries_requested_sans() {
        let (ca_pem, ca_key) = test_ca(2048);
        let sans = san_set(
            &["localhost", "test-llm-kserve-workload-svc.nn.svc"],
            &["127.0.0.1", "10.0.0.12"],
        );
        let issued = Issuer { key_bits: 2048 }
            .issue_leaf(&ca_pem, &ca_key, &sans)
            .unwrap();
        let cert = first_certificate(issued.chain_pem.as_bytes()).unwrap();
        let parsed = certificate_sans(&cert);
        assert!(parsed.is_superset_of(&sans));
        assert!(certificate_not_after(&cert) > SystemTime::now());
    }

    #[test]
    fn superset_secret_is_not_reissued() {
        let (ca_pem, ca_key) = test_ca(2048);
        let issued = Issuer { key_bits: 2048 }
            .issue_leaf(
                &ca_pem,
                &ca_key,
                &san_set(&["localhost", "foo.svc", "bar.svc"], &["1.2.3.4", "5.6.7.8"]),
            )
            .unwrap();
        let secret = tls_secret(&issued.chain_pem, &issued.key_pem);
        // expected set is a strict subset of what the cert carries
        let expected = san_set(&["localhost", "foo.svc"], &["1.2.3.4"]);
        assert!(!secret_needs_reissue(
            Some(&secret),
            &expected,
            SystemTime::now()
        ));
    }

    #[test]
    fn missing_san_forces_reissue() {
        let (ca_pem, ca_key) = test_ca(2048);
        let issued = Issuer { key_bits: 2048 }
            .issue_leaf(&ca_pem, &ca_key, &san_set(&["localhost"], &["127.0.0.1"]))
            .unwrap();
        let secret = tls_secret(&issued.chain_pem, &issued.key_pem);
        let expected = san_set(&["localhost", "new.svc"], &["127.0.0.1"]);
        assert!(secret_needs_reissue(
            Some(&secret),
            &expected,
            SystemTime::now()
        ));
    }

    #[test]
    fn garbage_and_absent_secrets_force_reissue() {
        let expected = san_set(&["localhost"], &[]);
        assert!(secret_needs_reissue(None, &expected, SystemTime::now()));
        assert!(secret_needs_reissue(
            Some(&Secret::default()),
            &expected,
            SystemTime::now()
        ));
        let garbage = tls_secret("not a pem", "not a key");
        assert!(secret_needs_reissue(
            Some(&garbage),
            &expected,
            SystemTime::now()
        ));
    }

    #[test]
    fn pkcs1_keys_parse_too() {
        use rsa::pkcs1::EncodeRsaPrivateKey;
        let mut rng = rand::rngs::OsRng;
        let key = RsaPrivateKey::new(&mut rng, 2048).unwrap();
        let pkcs1 = key.to_pkcs1_pem(LineEnding::LF).unwrap().to_string();
        let pkcs8 = key.to_pkcs8_pem(LineEnding::LF).unwrap().to_string();
        assert!(parse_rsa_key(&pkcs1).is_ok());
        assert!(parse_rsa_key(&pkcs8).is_ok());
        assert!(parse_rsa_key("garbage").is_err());
    }

    #[test]
    fn expected_sans_include_loopback_and_workload_dns() {
        let mut svc = LLMInferenceService::new("test-llm", LLMInferenceServiceSpec::default());
        svc.metadata.namespace = Some("nn".to_string());
        let sans = expected_sans(
            &svc,
            true,
            vec!["10.0.0.5".parse().unwrap()],
            vec!["10.96.0.17".parse().unwrap()],
        );
        assert!(sans.dns.contains("localhost"));
        assert!(sans.dns.contains("test-llm-kserve-workload-svc.nn.svc"));
        assert!(sans.dns.contains("test-llm-epp-service.nn.svc"));
        assert!(sans.ips.contains(&"127.0.0.1".parse().unwrap()));
        assert!(sans.ips.contains(&"10.0.0.5".parse().unwrap()));
        assert!(sans.ips.contains(&"10.96.0.17".parse().unwrap()));

        let sans = expected_sans(&svc, false, vec![], vec![]);
        assert!(!sans.dns.iter().any(|d| d.contains("epp")));
    }
}
