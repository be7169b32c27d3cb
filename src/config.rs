use std::collections::HashMap;
use std::time::Duration;

use crate::types::Provider;

/// Default replay tolerance for timestamped signatures.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(300);

/// Provider secrets and verification settings.
///
/// Built once at startup and shared read-only with the verifier.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Shared Shopify app secret.
    pub shopify_secret: Option<String>,

    /// Per-shop secret overrides keyed by shop domain.
    pub shopify_shop_secrets: HashMap<String, String>,

    /// Shared WooCommerce secret.
    pub woocommerce_secret: Option<String>,

    /// Per-store secret overrides keyed by source URL.
    pub woocommerce_source_secrets: HashMap<String, String>,

    pub stripe_secret: Option<String>,

    /// Explicit secrets for custom providers, keyed by provider name.
    /// Names absent here fall back to `<NAME>_WEBHOOK_SECRET`.
    pub custom_secrets: HashMap<String, String>,

    /// Maximum clock skew accepted for timestamped schemes.
    pub tolerance: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            shopify_secret: None,
            shopify_shop_secrets: HashMap::new(),
            woocommerce_secret: None,
            woocommerce_source_secrets: HashMap::new(),
            stripe_secret: None,
            custom_secrets: HashMap::new(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

impl IngestConfig {
    /// Read configuration from process environment.
    ///
    /// Recognised variables:
    /// - `SHOPIFY_WEBHOOK_SECRET`
    /// - `SHOPIFY_SHOP_SECRETS` (`shop.myshopify.com=secret;...`)
    /// - `WOOCOMMERCE_WEBHOOK_SECRET`
    /// - `STRIPE_WEBHOOK_SECRET`
    /// - `WEBHOOK_TOLERANCE_SECS`
    pub fn from_env() -> Self {
        let mut config = Self {
            shopify_secret: non_empty_env("SHOPIFY_WEBHOOK_SECRET"),
            woocommerce_secret: non_empty_env("WOOCOMMERCE_WEBHOOK_SECRET"),
            stripe_secret: non_empty_env("STRIPE_WEBHOOK_SECRET"),
            ..Self::default()
        };

        if let Some(raw) = non_empty_env("SHOPIFY_SHOP_SECRETS") {
            config.shopify_shop_secrets = parse_secret_map(&raw);
        }

        if let Some(secs) = non_empty_env("WEBHOOK_TOLERANCE_SECS") {
            match secs.parse::<u64>() {
                Ok(secs) => config.tolerance = Duration::from_secs(secs),
                Err(_) => tracing::warn!(value = %secs, "ignoring invalid WEBHOOK_TOLERANCE_SECS"),
            }
        }

        config
    }

    pub fn with_shopify_secret(mut self, secret: impl Into<String>) -> Self {
        self.shopify_secret = Some(secret.into());
        self
    }

    pub fn with_shop_secret(mut self, shop: impl Into<String>, secret: impl Into<String>) -> Self {
        self.shopify_shop_secrets.insert(shop.into(), secret.into());
        self
    }

    pub fn with_woocommerce_secret(mut self, secret: impl Into<String>) -> Self {
        self.woocommerce_secret = Some(secret.into());
        self
    }

    pub fn with_woocommerce_source_secret(
        mut self,
        source: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.woocommerce_source_secrets.insert(source.into(), secret.into());
        self
    }

    pub fn with_stripe_secret(mut self, secret: impl Into<String>) -> Self {
        self.stripe_secret = Some(secret.into());
        self
    }

    pub fn with_custom_secret(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.custom_secrets.insert(name.into(), secret.into());
        self
    }

    pub fn with_tolerance(mut self, tolerance: Duration) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Resolves the signing secret for a provider and optional source.
pub trait SecretResolver: Send + Sync {
    fn get_secret(&self, provider: &Provider, source_id: Option<&str>) -> Option<String>;
}

impl SecretResolver for IngestConfig {
    fn get_secret(&self, provider: &Provider, source_id: Option<&str>) -> Option<String> {
        match provider {
            Provider::Shopify => source_id
                .and_then(|shop| self.shopify_shop_secrets.get(shop).cloned())
                .or_else(|| self.shopify_secret.clone()),
            Provider::WooCommerce => source_id
                .and_then(|source| self.woocommerce_source_secrets.get(source).cloned())
                .or_else(|| self.woocommerce_secret.clone()),
            Provider::Stripe => self.stripe_secret.clone(),
            Provider::Custom(name) => self
                .custom_secrets
                .get(name)
                .cloned()
                .or_else(|| non_empty_env(&custom_secret_var(name))),
        }
    }
}

/// Environment variable holding a custom provider's secret.
///
/// `"acme-crm"` becomes `ACME_CRM_WEBHOOK_SECRET`.
pub fn custom_secret_var(name: &str) -> String {
    let normalized: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect();
    format!("{normalized}_WEBHOOK_SECRET")
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secret_map(raw: &str) -> HashMap<String, String> {
    raw.split(';')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            let (key, value) = (key.trim(), value.trim());
            if key.is_empty() || value.is_empty() {
                None
            } else {
                Some((key.to_string(), value.to_string()))
            }
        })
        .collect()
}
