//! Building a Signing Authority from config and `TokenArgs`.

use std::sync::Arc;

use pivsign_core::config::AuthorityConfig;
use pivsign_core::{Pin, PinSource, SigningAuthority, SoftToken, Token};
use tracing::warn;

use crate::cli::args::TokenArgs;

/// Command-line flags on top of the loaded config.
pub fn overlay(config: &AuthorityConfig, args: &TokenArgs) -> AuthorityConfig {
    let mut config = config.clone();
    if let Some(slot) = args.slot {
        config.slot = slot;
    }
    if let Some(module) = &args.module {
        config.module = Some(module.clone());
    }
    if let Some(secs) = args.confirm_timeout {
        config.confirmation_timeout_secs = secs.max(1);
    }
    if let Some(secs) = args.touch_timeout {
        config.touch_timeout_secs = secs;
    }
    if args.no_touch || args.soft_key.is_some() {
        config.require_touch = false;
    }
    config
}

pub fn build_authority(
    config: &AuthorityConfig,
    args: &TokenArgs,
) -> anyhow::Result<Arc<SigningAuthority>> {
    let config = overlay(config, args);

    let (token, pin_source): (Arc<dyn Token>, PinSource) = match &args.soft_key {
        Some(path) => {
            warn!(key = %path.display(), "using a software key, not a hardware token");
            (
                Arc::new(SoftToken::from_file(path)?),
                PinSource::Inline(Pin::new("")),
            )
        }
        None => (
            hardware_token(&config)?,
            PinSource::select(std::env::var("PIV_PIN").ok(), args.pin_command.clone()),
        ),
    };

    Ok(Arc::new(SigningAuthority::from_config(
        token,
        pin_source,
        &config,
    )))
}

#[cfg(feature = "pkcs11")]
fn hardware_token(config: &AuthorityConfig) -> anyhow::Result<Arc<dyn Token>> {
    let module = pivsign_core::find_module(config.module.as_deref())?;
    Ok(Arc::new(
        pivsign_core::Pkcs11Token::new(module).with_slot(Some(config.slot)),
    ))
}

#[cfg(not(feature = "pkcs11"))]
fn hardware_token(_config: &AuthorityConfig) -> anyhow::Result<Arc<dyn Token>> {
    anyhow::bail!(pivsign_core::SignError::TokenAbsent {
        reason: "built without PKCS#11 support; use --soft-key".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pivsign_core::authority::PivSlot;
    use std::path::PathBuf;

    #[test]
    fn test_flags_override_config() {
        let args = TokenArgs {
            slot: Some(PivSlot::KeyManagement),
            module: Some(PathBuf::from("/opt/lib/libykcs11.so")),
            confirm_timeout: Some(0),
            no_touch: true,
            ..Default::default()
        };
        let config = overlay(&AuthorityConfig::default(), &args);
        assert_eq!(config.slot, PivSlot::KeyManagement);
        assert_eq!(config.module, Some(PathBuf::from("/opt/lib/libykcs11.so")));
        assert_eq!(config.confirmation_timeout_secs, 1);
        assert!(!config.require_touch);
        // untouched
        assert_eq!(config.touch_timeout_secs, 15);
    }

    #[test]
    fn test_soft_key_never_waits_for_touch() {
        let args = TokenArgs {
            soft_key: Some(PathBuf::from("key.pem")),
            ..Default::default()
        };
        assert!(!overlay(&AuthorityConfig::default(), &args).require_touch);
    }
}
