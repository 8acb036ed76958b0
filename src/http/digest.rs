//! Digest authentication
//!
//! The first request to a digest-protected endpoint goes out without
//! credentials. A 401 carrying `WWW-Authenticate: Digest ...` is answered
//! once with a computed `Authorization` header; the parsed challenge is
//! cached per host so subsequent requests within the bound provider's
//! lifetime authenticate on the first try.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU32, Ordering};

use dashmap::DashMap;
use md5::Md5;
use sha2::{Digest as _, Sha256};

use super::{FetchParams, FetchResponse};
use crate::http::SecurityConfiguration;
use crate::{Error, ErrorReport, Result};

/// Digest hash algorithms the SDK answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestAlgorithm {
    /// MD5 (the RFC default)
    #[default]
    Md5,
    /// SHA-256
    Sha256,
}

impl DigestAlgorithm {
    fn hash(self, input: &str) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(input.as_bytes())),
            Self::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }
}

/// A parsed `WWW-Authenticate: Digest` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    /// Protection realm
    pub realm: String,
    /// Server nonce
    pub nonce: String,
    /// Quality of protection, when offered
    pub qop: Option<String>,
    /// Hash algorithm
    pub algorithm: DigestAlgorithm,
    /// Opaque value echoed back verbatim
    pub opaque: Option<String>,
}

impl DigestChallenge {
    /// Parse the value of a `WWW-Authenticate` header.
    pub fn parse(header: &str) -> Result<Self> {
        let Some(parameters) = header.trim().strip_prefix("Digest ") else {
            return Err(Error::Unexpected(
                ErrorReport::new("Not a digest challenge")
                    .detail(format!("WWW-Authenticate: {header}")),
            ));
        };

        #[allow(clippy::unwrap_used)]
        let pair = regex::Regex::new(r#"(\w+)=(?:"([^"]*)"|([^\s,]+))"#).unwrap();

        let mut realm = None;
        let mut nonce = None;
        let mut qop = None;
        let mut algorithm = DigestAlgorithm::default();
        let mut opaque = None;

        for caps in pair.captures_iter(parameters) {
            let value = caps
                .get(2)
                .or_else(|| caps.get(3))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            match &caps[1] {
                "realm" => realm = Some(value),
                "nonce" => nonce = Some(value),
                "qop" => {
                    // Servers may offer `auth,auth-int`; pick plain auth
                    qop = value
                        .split(',')
                        .map(str::trim)
                        .find(|offered| *offered == "auth")
                        .map(str::to_string)
                        .or(Some(value));
                }
                "algorithm" => {
                    algorithm = match value.to_ascii_uppercase().as_str() {
                        "SHA-256" => DigestAlgorithm::Sha256,
                        _ => DigestAlgorithm::Md5,
                    };
                }
                "opaque" => opaque = Some(value),
                _ => {}
            }
        }

        match (realm, nonce) {
            (Some(realm), Some(nonce)) => Ok(Self {
                realm,
                nonce,
                qop,
                algorithm,
                opaque,
            }),
            _ => Err(Error::Unexpected(
                ErrorReport::new("Digest challenge is missing realm or nonce")
                    .detail(format!("WWW-Authenticate: {header}")),
            )),
        }
    }

    /// Compute the `Authorization` header value for one request.
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        nonce_count: u32,
        cnonce: &str,
    ) -> String {
        let ha1 = self
            .algorithm
            .hash(&format!("{username}:{}:{password}", self.realm));
        let ha2 = self.algorithm.hash(&format!("{method}:{uri}"));
        let nc = format!("{nonce_count:08x}");

        let response = match &self.qop {
            Some(qop) => self.algorithm.hash(&format!(
                "{ha1}:{}:{nc}:{cnonce}:{qop}:{ha2}",
                self.nonce
            )),
            None => self.algorithm.hash(&format!("{ha1}:{}:{ha2}", self.nonce)),
        };

        let mut header = format!(
            "Digest username=\"{username}\", realm=\"{}\", nonce=\"{}\", uri=\"{uri}\"",
            self.realm, self.nonce
        );
        if let Some(qop) = &self.qop {
            let _ = write!(header, ", qop={qop}, nc={nc}, cnonce=\"{cnonce}\"");
        }
        let _ = write!(header, ", response=\"{response}\", algorithm={}", self.algorithm.label());
        if let Some(opaque) = &self.opaque {
            let _ = write!(header, ", opaque=\"{opaque}\"");
        }
        header
    }
}

#[derive(Debug)]
struct CachedChallenge {
    challenge: DigestChallenge,
    nonce_count: AtomicU32,
}

/// Per-bound-provider challenge cache keyed by host.
///
/// Lives on the bound provider, so its lifetime equals the bound-provider
/// TTL.
#[derive(Default, Debug)]
pub struct DigestCache {
    entries: DashMap<String, CachedChallenge>,
}

impl DigestCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Authorization for a request whose host already answered a challenge.
    pub fn cached_authorization(
        &self,
        params: &FetchParams,
        username: &str,
        password: &str,
    ) -> Option<String> {
        let (host, uri) = split_url(&params.url)?;
        let entry = self.entries.get(&host)?;
        let nonce_count = entry.nonce_count.fetch_add(1, Ordering::Relaxed) + 1;
        Some(entry.challenge.authorization(
            username,
            password,
            &params.method,
            &uri,
            nonce_count,
            &generate_cnonce(),
        ))
    }

    fn store(&self, host: String, challenge: DigestChallenge) {
        self.entries.insert(
            host,
            CachedChallenge {
                challenge,
                nonce_count: AtomicU32::new(1),
            },
        );
    }
}

/// Answer a 401 challenge once.
///
/// Returns the retried request parameters when the response carries a
/// digest challenge, a digest configuration exists, and the failed request
/// had not already answered one. A second 401 surfaces to the map as a
/// plain HTTP response.
pub(super) fn answer_challenge(
    params: &FetchParams,
    response: &FetchResponse,
    configurations: &[SecurityConfiguration],
    cache: Option<&DigestCache>,
) -> Result<Option<FetchParams>> {
    let Some(SecurityConfiguration::Digest {
        username, password, ..
    }) = configurations
        .iter()
        .find(|configuration| matches!(configuration, SecurityConfiguration::Digest { .. }))
    else {
        return Ok(None);
    };

    // Already answered once: give up and surface the 401
    if params
        .header("Authorization")
        .is_some_and(|value| value.starts_with("Digest"))
    {
        return Ok(None);
    }

    let Some(header) = response.headers.get("www-authenticate") else {
        return Ok(None);
    };
    if !header.trim_start().starts_with("Digest") {
        return Ok(None);
    }

    let challenge = DigestChallenge::parse(header)?;
    let Some((host, uri)) = split_url(&params.url) else {
        return Ok(None);
    };

    let authorization = challenge.authorization(
        username,
        password,
        &params.method,
        &uri,
        1,
        &generate_cnonce(),
    );

    if let Some(cache) = cache {
        cache.store(host, challenge);
    }

    let mut retry = params.clone();
    retry.set_header("Authorization", authorization);
    Ok(Some(retry))
}

/// Split a URL into its cache key (`host[:port]`) and request URI
/// (path plus query).
fn split_url(raw: &str) -> Option<(String, String)> {
    let parsed = url::Url::parse(raw).ok()?;
    let host = match parsed.port() {
        Some(port) => format!("{}:{port}", parsed.host_str()?),
        None => parsed.host_str()?.to_string(),
    };
    let uri = match parsed.query() {
        Some(query) => format!("{}?{query}", parsed.path()),
        None => parsed.path().to_string(),
    };
    Some((host, uri))
}

fn generate_cnonce() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}
