//! Built-in authenticators and the registry that selects one by name.

use crate::domain::{AuthConfig, AuthError};
use crate::ports::{Authenticator, Credentials, HeaderMap};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Cookie the notebook server uses for XSRF protection.
pub const XSRF_COOKIE: &str = "_xsrf";
/// Header the XSRF cookie value is mirrored into.
pub const XSRF_HEADER: &str = "X-XSRFToken";

/// Shared credential state for authenticators.
///
/// Mirrors the `_xsrf` cookie into the `X-XSRFToken` header.
#[derive(Default)]
pub struct CredentialCache {
    authenticated: AtomicBool,
    headers: RwLock<HeaderMap>,
    cookies: RwLock<HeaderMap>,
}

impl CredentialCache {
    pub fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::Acquire)
    }

    pub fn store(&self, credentials: Credentials) {
        *self.headers.write() = credentials.headers;
        self.cookies.write().extend(credentials.cookies);
        self.authenticated.store(true, Ordering::Release);
    }

    pub fn headers(&self) -> HeaderMap {
        let mut headers = self.headers.read().clone();
        if let Some(xsrf) = self.cookies.read().get(XSRF_COOKIE) {
            headers.insert(XSRF_HEADER.to_string(), xsrf.clone());
        }
        headers
    }

    pub fn cookies(&self) -> HeaderMap {
        self.cookies.read().clone()
    }

    pub fn update_cookies(&self, cookies: HeaderMap) {
        self.cookies.write().extend(cookies);
    }

    pub fn credentials(&self) -> Credentials {
        Credentials {
            headers: self.headers(),
            cookies: self.cookies(),
        }
    }

    pub fn reset(&self) {
        self.authenticated.store(false, Ordering::Release);
        self.headers.write().clear();
        self.cookies.write().clear();
    }
}

/// No credentials at all; only cookies set by the server are kept.
#[derive(Default)]
pub struct NoAuthAuthenticator {
    cache: CredentialCache,
}

impl NoAuthAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Authenticator for NoAuthAuthenticator {
    fn is_authenticated(&self) -> bool {
        self.cache.is_authenticated()
    }

    async fn authenticate(&self) -> Result<Credentials, AuthError> {
        self.cache.store(Credentials::default());
        Ok(self.cache.credentials())
    }

    fn headers(&self) -> HeaderMap {
        self.cache.headers()
    }

    fn cookies(&self) -> HeaderMap {
        self.cache.cookies()
    }

    fn update_cookies(&self, cookies: HeaderMap) {
        self.cache.update_cookies(cookies);
    }

    fn reset(&self) {
        self.cache.reset();
    }
}

/// Static server token sent as `Authorization: <scheme> <token>`.
pub struct TokenAuthenticator {
    token: String,
    scheme: String,
    cache: CredentialCache,
}

impl TokenAuthenticator {
    /// Authorization scheme used unless `auth.extra.scheme` says otherwise.
    pub const DEFAULT_SCHEME: &'static str = "Token";

    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            scheme: Self::DEFAULT_SCHEME.to_string(),
            cache: CredentialCache::default(),
        }
    }

    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = scheme.into();
        self
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    fn is_authenticated(&self) -> bool {
        self.cache.is_authenticated()
    }

    async fn authenticate(&self) -> Result<Credentials, AuthError> {
        if self.token.is_empty() {
            return Err(AuthError::MissingToken("token".into()));
        }
        let mut headers = HeaderMap::new();
        headers.insert("Authorization".to_string(), format!("{} {}", self.scheme, self.token));
        self.cache.store(Credentials {
            headers,
            cookies: HeaderMap::new(),
        });
        debug!("Token credentials installed");
        Ok(self.cache.credentials())
    }

    fn headers(&self) -> HeaderMap {
        self.cache.headers()
    }

    fn cookies(&self) -> HeaderMap {
        self.cache.cookies()
    }

    fn update_cookies(&self, cookies: HeaderMap) {
        self.cache.update_cookies(cookies);
    }

    fn reset(&self) {
        self.cache.reset();
    }
}

/// Constructor registered under an authenticator kind.
pub type AuthenticatorCtor = Arc<dyn Fn(&AuthConfig) -> Result<Arc<dyn Authenticator>, AuthError> + Send + Sync>;

/// Maps configuration strings to authenticator constructors.
pub struct AuthenticatorRegistry {
    constructors: HashMap<String, AuthenticatorCtor>,
}

impl AuthenticatorRegistry {
    /// Empty registry.
    pub fn empty() -> Self {
        Self {
            constructors: HashMap::new(),
        }
    }

    /// Registry with `none` and `token` (plus their long aliases).
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        let none: AuthenticatorCtor =
            Arc::new(|_: &AuthConfig| Ok::<_, AuthError>(Arc::new(NoAuthAuthenticator::new()) as Arc<dyn Authenticator>));
        registry.register("none", Arc::clone(&none));
        registry.register("NoAuthAuthenticator", none);

        let token: AuthenticatorCtor = Arc::new(|config: &AuthConfig| {
            config
                .token
                .clone()
                .filter(|t| !t.is_empty())
                .map(|token| {
                    let scheme = config
                        .extra
                        .get("scheme")
                        .map_or(TokenAuthenticator::DEFAULT_SCHEME, String::as_str);
                    Arc::new(TokenAuthenticator::new(token).with_scheme(scheme)) as Arc<dyn Authenticator>
                })
                .ok_or_else(|| AuthError::MissingToken(config.kind.clone()))
        });
        registry.register("token", Arc::clone(&token));
        registry.register("SimpleAuthenticator", token);

        registry
    }

    pub fn register(&mut self, kind: impl Into<String>, ctor: AuthenticatorCtor) {
        self.constructors.insert(kind.into(), ctor);
    }

    pub fn create(&self, config: &AuthConfig) -> Result<Arc<dyn Authenticator>, AuthError> {
        let ctor = self
            .constructors
            .get(&config.kind)
            .ok_or_else(|| AuthError::UnknownAuthenticator(config.kind.clone()))?;
        ctor(config)
    }
}

impl Default for AuthenticatorRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
