//! Environment-derived configuration.
//!
//! The environment is the primary interface (`PORT`, `TARGET_HOST`,
//! `PROXY_TOKEN`, `ALLOWED_ORIGINS`, `APP_ENV`); CLI flags override it for
//! operator convenience. The shared token is environment-only so it never
//! shows up in a process listing.

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use url::Url;

use edge_proxy::GatewayConfig;

use crate::cli::Cli;

const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TARGET: &str = "https://sense-demo.qlik.com";

/// Resolve the gateway configuration from environment and CLI overrides.
///
/// A malformed `PORT` or `TARGET_HOST` is a startup error; everything else
/// degrades to defaults. Allowlist entries are validated later, at compile
/// time in `origin-guard`, where bad entries are skipped rather than fatal.
pub fn load(cli: &Cli) -> anyhow::Result<GatewayConfig> {
    let port = match cli.port {
        Some(port) => port,
        None => match env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("invalid PORT value: {raw}"))?,
            Err(_) => DEFAULT_PORT,
        },
    };
    let listen_addr = SocketAddr::from(([0, 0, 0, 0], port));

    let raw_target = cli
        .target_host
        .clone()
        .or_else(|| env::var("TARGET_HOST").ok())
        .unwrap_or_else(|| DEFAULT_TARGET.to_string());
    let target =
        Url::parse(&raw_target).with_context(|| format!("invalid TARGET_HOST: {raw_target}"))?;

    let shared_token = env::var("PROXY_TOKEN").ok().filter(|token| !token.is_empty());
    let dev_bypass = resolve_dev_bypass(&shared_token, env::var("APP_ENV").ok().as_deref());

    let raw_origins = cli
        .allowed_origins
        .clone()
        .or_else(|| env::var("ALLOWED_ORIGINS").ok())
        .unwrap_or_default();
    let allowed_origins = split_origins(&raw_origins);

    Ok(GatewayConfig {
        listen_addr,
        target,
        shared_token,
        dev_bypass,
        allowed_origins,
    })
}

/// The bypass exists only for local development: it requires both the
/// absence of a configured token and an explicit development marker.
/// Token absence alone never enables it.
fn resolve_dev_bypass(shared_token: &Option<String>, app_env: Option<&str>) -> bool {
    shared_token.is_none() && app_env == Some("development")
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_split_and_trimmed() {
        let origins = split_origins("https://a.test, https://*.b.test ,,https://c.test");
        assert_eq!(
            origins,
            vec!["https://a.test", "https://*.b.test", "https://c.test"]
        );
    }

    #[test]
    fn empty_origin_list_yields_nothing() {
        assert!(split_origins("").is_empty());
        assert!(split_origins(" , ").is_empty());
    }

    #[test]
    fn bypass_requires_development_marker_and_no_token() {
        assert!(resolve_dev_bypass(&None, Some("development")));
        assert!(!resolve_dev_bypass(&None, Some("production")));
        assert!(!resolve_dev_bypass(&None, None));
        assert!(!resolve_dev_bypass(
            &Some("secret".to_string()),
            Some("development")
        ));
    }
}
