//! Process exit codes.
//!
//! These are part of the CLI contract: `pkg repo` and build scripts only see
//! the exit status of the signing command.

use pivsign_core::SignError;

pub const SUCCESS: i32 = 0;
pub const CONFIG_ERROR: i32 = 1; // Usage, configuration or signing-command contract
pub const AUTH_ERROR: i32 = 2; // PIN or touch
pub const TOKEN_ERROR: i32 = 3; // Token or key
pub const VERIFY_FAILED: i32 = 4; // Signature, fingerprint or signer mismatch
pub const TRANSPORT_ERROR: i32 = 5; // Channel or mailbox
pub const REMOTE_FAILED: i32 = 6; // Remote invocation or trust artifact
pub const IO_ERROR: i32 = 7;

/// Exit code for an error chain: the first [`SignError`] in it decides.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<SignError>())
        .map_or(CONFIG_ERROR, SignError::exit_code)
}
