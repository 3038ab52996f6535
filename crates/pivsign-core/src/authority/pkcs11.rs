//! PKCS#11 token backend (YubiKey PIV through `libykcs11`).
//!
//! Every [`Token::open`] loads and initializes the module, opens a session on
//! the first slot with a token, and [`Drop`] undoes all of it. Handles cached
//! across calls go stale silently when `ykman` or a re-insertion touches the
//! key, so nothing is kept.

use std::path::{Path, PathBuf};

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::error::{Error as CkError, RvError};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, KeyType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use rsa::pkcs8::{EncodePublicKey, LineEnding};
use rsa::{BigUint, RsaPublicKey};
use tracing::debug;

use super::token::{select_unique_key, PivSlot, Token, TokenSession};
use crate::digest::DigestInfo;
use crate::error::{SignError, SignResult};
use crate::pin::Pin;

/// Where `libykcs11` usually lives.
pub const MODULE_CANDIDATES: &[&str] = &[
    "/opt/homebrew/lib/libykcs11.dylib",
    "/usr/local/lib/libykcs11.dylib",
    "/usr/lib/x86_64-linux-gnu/libykcs11.so",
    "/usr/lib/libykcs11.so",
    "/usr/local/lib/libykcs11.so",
];

/// Locate the PKCS#11 module: explicit path, else the first existing candidate.
pub fn find_module(explicit: Option<&Path>) -> SignResult<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    MODULE_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
        .ok_or_else(|| SignError::TokenAbsent {
            reason: "libykcs11 not found. Install yubico-piv-tool or set PKCS11_MODULE".to_string(),
        })
}

/// Hardware token reached through a PKCS#11 module.
#[derive(Debug, Clone)]
pub struct Pkcs11Token {
    module: PathBuf,
    slot: Option<PivSlot>,
}

impl Pkcs11Token {
    pub fn new(module: impl Into<PathBuf>) -> Self {
        Self {
            module: module.into(),
            slot: Some(PivSlot::default()),
        }
    }

    /// Narrow key lookup to a PIV slot (`None` accepts any sign-capable key).
    pub fn with_slot(mut self, slot: Option<PivSlot>) -> Self {
        self.slot = slot;
        self
    }
}

impl Token for Pkcs11Token {
    fn describe(&self) -> String {
        match self.slot {
            Some(slot) => format!("PKCS#11 {} slot {}", self.module.display(), slot),
            None => format!("PKCS#11 {}", self.module.display()),
        }
    }

    fn open(&self) -> SignResult<Box<dyn TokenSession>> {
        let ctx = Pkcs11::new(&self.module).map_err(|e| SignError::TokenAbsent {
            reason: format!("failed to load {}: {}", self.module.display(), e),
        })?;
        ctx.initialize(CInitializeArgs::OsThreads)
            .map_err(|e| map_error("C_Initialize", e))?;

        let slots = ctx
            .get_slots_with_token()
            .map_err(|e| map_error("C_GetSlotList", e))?;
        let slot = slots.first().copied().ok_or_else(|| SignError::TokenAbsent {
            reason: "no YubiKey detected".to_string(),
        })?;

        let session = ctx
            .open_rw_session(slot)
            .map_err(|e| map_error("C_OpenSession", e))?;
        debug!(module = %self.module.display(), "opened PKCS#11 session");

        Ok(Box::new(Pkcs11Session {
            session,
            _ctx: ctx,
            slot: self.slot,
            logged_in: false,
        }))
    }
}

// Field order matters: the session closes before the context finalizes.
struct Pkcs11Session {
    session: Session,
    _ctx: Pkcs11,
    slot: Option<PivSlot>,
    logged_in: bool,
}

impl Pkcs11Session {
    fn find_one(&self, class: ObjectClass, what: &str) -> SignResult<ObjectHandle> {
        let mut template = vec![Attribute::Class(class)];
        if class == ObjectClass::PRIVATE_KEY {
            template.push(Attribute::Sign(true));
        } else {
            template.push(Attribute::KeyType(KeyType::RSA));
        }
        if let Some(slot) = self.slot {
            template.push(Attribute::Id(vec![slot.object_id()]));
        }

        let handles = self
            .session
            .find_objects(&template)
            .map_err(|e| map_error("C_FindObjects", e))?;
        select_unique_key(handles, what)
    }
}

impl TokenSession for Pkcs11Session {
    fn login(&mut self, pin: &Pin) -> SignResult<()> {
        let auth = AuthPin::new(pin.as_str().to_string());
        self.session
            .login(UserType::User, Some(&auth))
            .map_err(|e| map_error("C_Login", e))?;
        self.logged_in = true;
        Ok(())
    }

    fn sign_digest_info(&mut self, digest_info: &DigestInfo) -> SignResult<Vec<u8>> {
        let key = self.find_one(ObjectClass::PRIVATE_KEY, "sign-capable private key")?;
        self.session
            .sign(&Mechanism::RsaPkcs, key, digest_info.as_bytes())
            .map_err(|e| map_error("C_Sign", e))
    }

    fn public_key_pem(&mut self) -> SignResult<String> {
        let handle = self.find_one(ObjectClass::PUBLIC_KEY, "RSA public key")?;
        let attrs = self
            .session
            .get_attributes(
                handle,
                &[AttributeType::Modulus, AttributeType::PublicExponent],
            )
            .map_err(|e| map_error("C_GetAttributeValue", e))?;

        let mut modulus = None;
        let mut exponent = None;
        for attr in attrs {
            match attr {
                Attribute::Modulus(n) => modulus = Some(n),
                Attribute::PublicExponent(e) => exponent = Some(e),
                _ => {}
            }
        }
        let (Some(n), Some(e)) = (modulus, exponent) else {
            return Err(SignError::Token {
                reason: "public key object lacks modulus or exponent".to_string(),
            });
        };

        let key = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e))
            .map_err(|e| SignError::InvalidPublicKey {
                reason: e.to_string(),
            })?;
        key.to_public_key_pem(LineEnding::LF)
            .map_err(|e| SignError::Token {
                reason: format!("failed to encode public key: {e}"),
            })
    }
}

impl Drop for Pkcs11Session {
    fn drop(&mut self) {
        if self.logged_in {
            if let Err(e) = self.session.logout() {
                debug!(error = %e, "C_Logout failed");
            }
        }
    }
}

fn map_error(op: &str, err: CkError) -> SignError {
    match &err {
        CkError::Pkcs11(RvError::PinIncorrect, ..) => SignError::AuthenticationFailure {
            reason: format!("{op} failed: wrong PIN"),
        },
        CkError::Pkcs11(RvError::PinLocked, ..) => SignError::AuthenticationFailure {
            reason: "PIN is locked; reset it with the PUK".to_string(),
        },
        CkError::Pkcs11(RvError::PinLenRange | RvError::PinInvalid, ..) => {
            SignError::AuthenticationFailure {
                reason: format!("{op} failed: PIN has an invalid format"),
            }
        }
        CkError::Pkcs11(
            RvError::TokenNotPresent | RvError::DeviceRemoved | RvError::SlotIdInvalid,
            ..,
        ) => SignError::TokenAbsent {
            reason: format!("{op} failed: {err}"),
        },
        CkError::LibraryLoading(_) => SignError::TokenAbsent {
            reason: format!("{op} failed: {err}"),
        },
        _ => SignError::Token {
            reason: format!("{op} failed: {err}"),
        },
    }
}
