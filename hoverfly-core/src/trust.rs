use crate::config::{ProxyConfiguration, Target};
use crate::tempfiles::ResourceRoots;
use crate::{HoverflyError, Result};
use rustls::client::{ServerCertVerified, ServerCertVerifier, WebPkiVerifier};
use rustls::{Certificate, ClientConfig, RootCertStore, ServerName};
use std::fs;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// Resource name of the CA bundled next to the proxy binary.
pub const DEFAULT_CA_RESOURCE: &str = "cert.pem";

/// Decode every `CERTIFICATE` block of a PEM document to DER.
pub fn pem_certificates(pem: &str) -> Result<Vec<Vec<u8>>> {
    let certs = rustls_pemfile::certs(&mut pem.as_bytes())
        .map_err(|e| HoverflyError::Tls(format!("Invalid certificate PEM: {}", e)))?;
    if certs.is_empty() {
        return Err(HoverflyError::Tls("No certificate found in PEM input".to_string()));
    }
    Ok(certs)
}

fn system_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let ders: Vec<Vec<u8>> = certs.into_iter().map(|c| c.0).collect();
            let (added, ignored) = roots.add_parsable_certificates(&ders);
            debug!(added, ignored, "Loaded system trust roots");
        }
        Err(e) => warn!("Failed to load system trust roots: {}", e),
    }
    roots
}

/// Trusts certificates signed by the proxy CA, then falls back to the
/// system roots. A certificate is rejected only if both checks fail.
pub struct CompositeVerifier {
    proxy: WebPkiVerifier,
    system: WebPkiVerifier,
}

impl CompositeVerifier {
    pub fn new(proxy_ca_pem: &str) -> Result<Self> {
        Self::with_system_roots(proxy_ca_pem, system_roots())
    }

    pub fn with_system_roots(proxy_ca_pem: &str, system: RootCertStore) -> Result<Self> {
        let mut proxy_roots = RootCertStore::empty();
        for der in pem_certificates(proxy_ca_pem)? {
            proxy_roots
                .add(&Certificate(der))
                .map_err(|e| HoverflyError::Tls(format!("Invalid proxy CA certificate: {}", e)))?;
        }

        Ok(Self {
            proxy: WebPkiVerifier::new(proxy_roots, None),
            system: WebPkiVerifier::new(system, None),
        })
    }
}

impl ServerCertVerifier for CompositeVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &Certificate,
        intermediates: &[Certificate],
        server_name: &ServerName,
        scts: &mut dyn Iterator<Item = &[u8]>,
        ocsp_response: &[u8],
        now: SystemTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        let scts: Vec<&[u8]> = scts.collect();
        match self.proxy.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            &mut scts.iter().copied(),
            ocsp_response,
            now,
        ) {
            Ok(verified) => Ok(verified),
            Err(proxy_err) => {
                debug!("Proxy CA rejected certificate ({}), trying system roots", proxy_err);
                self.system.verify_server_cert(
                    end_entity,
                    intermediates,
                    server_name,
                    &mut scts.iter().copied(),
                    ocsp_response,
                    now,
                )
            }
        }
    }
}

fn client_config(proxy_ca_pem: Option<&str>) -> Result<ClientConfig> {
    let builder = ClientConfig::builder().with_safe_defaults();
    let mut config = match proxy_ca_pem {
        Some(pem) => builder
            .with_custom_certificate_verifier(Arc::new(CompositeVerifier::new(pem)?))
            .with_no_client_auth(),
        None => builder.with_root_certificates(system_roots()).with_no_client_auth(),
    };
    config.alpn_protocols = vec![b"http/1.1".to_vec()];
    Ok(config)
}

/// Where this process's outbound HTTP should be proxied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    pub proxy_url: String,
    /// Also proxy requests for localhost
    pub proxy_local_host: bool,
}

#[derive(Clone)]
struct InstalledTrust {
    client_config: Arc<ClientConfig>,
    proxy: Option<ProxySettings>,
    custom_ca: bool,
}

/// Identifies one `install`; pass it back to `reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrustHandle(u64);

/// Process-wide outbound TLS and proxy defaults.
///
/// Installs stack up and the most recent one is in effect. `reset` removes
/// only the caller's own install, so the next most recent takes over again.
/// One local proxy per test process is assumed.
#[derive(Default)]
pub struct TrustContext {
    installs: Mutex<Vec<(TrustHandle, InstalledTrust)>>,
    next_id: AtomicU64,
}

static GLOBAL: OnceLock<TrustContext> = OnceLock::new();

impl TrustContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static TrustContext {
        GLOBAL.get_or_init(TrustContext::new)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(TrustHandle, InstalledTrust)>> {
        self.installs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn current(&self) -> Option<InstalledTrust> {
        self.lock().last().map(|(_, trust)| trust.clone())
    }

    /// Trust `proxy_ca_pem` (plus the system roots) and route through `proxy`.
    pub fn install(&self, proxy_ca_pem: Option<&str>, proxy: Option<ProxySettings>) -> Result<TrustHandle> {
        let installed = InstalledTrust {
            client_config: Arc::new(client_config(proxy_ca_pem)?),
            proxy,
            custom_ca: proxy_ca_pem.is_some(),
        };
        let handle = TrustHandle(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((handle, installed));
        info!(custom_ca = proxy_ca_pem.is_some(), "Installed outbound trust configuration");
        Ok(handle)
    }

    /// Withdraw the install identified by `handle`. Unknown handles are ignored.
    pub fn reset(&self, handle: TrustHandle) {
        let mut installs = self.lock();
        let before = installs.len();
        installs.retain(|(id, _)| *id != handle);
        if installs.len() != before {
            debug!(remaining = installs.len(), "Withdrew outbound trust configuration");
        }
    }

    pub fn is_installed(&self) -> bool {
        !self.lock().is_empty()
    }

    pub fn has_custom_ca(&self) -> bool {
        self.current().map(|t| t.custom_ca).unwrap_or(false)
    }

    pub fn client_config(&self) -> Option<Arc<ClientConfig>> {
        self.current().map(|t| t.client_config)
    }

    pub fn proxy_settings(&self) -> Option<ProxySettings> {
        self.current().and_then(|t| t.proxy)
    }

    /// An HTTP client using the installed trust and proxy, or plain defaults.
    pub fn http_client(&self) -> Result<reqwest::Client> {
        let current = self.current();
        let mut builder = reqwest::Client::builder();

        if let Some(installed) = current {
            builder = builder.use_preconfigured_tls((*installed.client_config).clone());
            if let Some(settings) = installed.proxy {
                let mut proxy = reqwest::Proxy::all(&settings.proxy_url)
                    .map_err(|e| HoverflyError::Configuration(format!("Invalid proxy URL: {}", e)))?;
                if !settings.proxy_local_host {
                    proxy = proxy.no_proxy(reqwest::NoProxy::from_string("localhost,127.0.0.1,::1"));
                }
                builder = builder.proxy(proxy);
            }
        }

        builder
            .build()
            .map_err(|e| HoverflyError::Tls(format!("Failed to build HTTP client: {}", e)))
    }
}

/// Read the CA to trust for `config`: an explicit certificate wins, otherwise
/// the bundled default. A missing default is not an error.
pub fn proxy_ca_pem(config: &ProxyConfiguration) -> Result<Option<String>> {
    let (explicit, roots) = match config.target() {
        Target::Local(local) => (local.ssl_cert.clone(), local.resource_roots.clone()),
        Target::Remote(remote) => (remote.ca_cert.clone(), ResourceRoots::standard(None)),
    };

    let path = match explicit {
        Some(name) => roots.resolve(&name)?,
        None => match roots.resolve(DEFAULT_CA_RESOURCE) {
            Ok(path) => path,
            Err(_) => {
                warn!("Default CA {} not found; trusting system roots only", DEFAULT_CA_RESOURCE);
                return Ok(None);
            }
        },
    };

    let pem = fs::read_to_string(&path)
        .map_err(|e| HoverflyError::Setup(format!("Failed to read CA {}: {}", path.display(), e)))?;
    Ok(Some(pem))
}
