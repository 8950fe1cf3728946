//! Test certificate generation using rcgen
//!
//! Certificates are generated at runtime so TLS listeners and TLS backends can
//! be exercised without checked-in key material.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, IsCa, Issuer, KeyPair,
};
use rustls::{ClientConfig, RootCertStore};

/// A private CA and one `localhost` server certificate it signed
#[derive(Clone)]
pub struct TestCertificates {
    /// CA certificate PEM
    pub ca_cert_pem: String,

    /// Server certificate PEM
    pub server_cert_pem: String,
    /// Server private key PEM
    pub server_key_pem: String,
}

impl TestCertificates {
    /// Generate a CA and a server certificate valid for localhost and loopback IPs
    pub fn generate() -> Self {
        let ca_key = KeyPair::generate().expect("Failed to generate CA key");

        let mut ca_params = CertificateParams::default();
        ca_params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, "termgate Test CA");
            dn.push(DnType::OrganizationName, "termgate E2E Tests");
            dn
        };
        ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        ca_params.key_usages = vec![
            rcgen::KeyUsagePurpose::KeyCertSign,
            rcgen::KeyUsagePurpose::CrlSign,
        ];

        let ca_cert = ca_params
            .clone()
            .self_signed(&ca_key)
            .expect("Failed to create CA cert");
        let ca_issuer = Issuer::new(ca_params, ca_key);

        let server_key = KeyPair::generate().expect("Failed to generate server key");
        let mut server_params = CertificateParams::default();
        server_params.distinguished_name = {
            let mut dn = DistinguishedName::new();
            dn.push(DnType::CommonName, "localhost");
            dn
        };
        server_params.subject_alt_names = vec![
            rcgen::SanType::DnsName("localhost".try_into().unwrap()),
            rcgen::SanType::IpAddress(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))),
            rcgen::SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)),
        ];
        server_params.key_usages = vec![
            rcgen::KeyUsagePurpose::DigitalSignature,
            rcgen::KeyUsagePurpose::KeyEncipherment,
        ];
        server_params.extended_key_usages = vec![rcgen::ExtendedKeyUsagePurpose::ServerAuth];

        let server_cert = server_params
            .signed_by(&server_key, &ca_issuer)
            .expect("Failed to create server cert");

        Self {
            ca_cert_pem: ca_cert.pem(),
            server_cert_pem: server_cert.pem(),
            server_key_pem: server_key.serialize_pem(),
        }
    }

    /// Listener config presenting the server certificate
    pub fn server_config(&self) -> rustls::ServerConfig {
        termgate_common::load_listener_config_from_pem(&self.server_cert_pem, &self.server_key_pem)
            .expect("Failed to load server TLS config")
    }

    /// Client config that trusts only this CA
    pub fn client_config(&self) -> ClientConfig {
        let mut roots = RootCertStore::empty();
        for cert in termgate_common::load_certs_from_pem(&self.ca_cert_pem)
            .expect("Failed to parse CA certificate")
        {
            roots.add(cert).expect("Failed to add CA certificate");
        }

        ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .expect("Failed to set protocol versions")
            .with_root_certificates(roots)
            .with_no_client_auth()
    }
}
