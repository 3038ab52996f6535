//! Error types for the signing protocol.

/// Signing errors.
///
/// Every variant is fail-fast: the signing layer never retries. Errors that
/// cross the forwarded channel are encoded as `ERR <code>: <detail>` and
/// decoded back with [`SignError::from_wire`].
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    /// Wrong or unavailable PIN. The token may lock after a few of these.
    #[error("authentication failed: {reason}")]
    AuthenticationFailure { reason: String },

    /// Physical confirmation (touch) was not given in time.
    #[error("confirmation timeout: {reason}")]
    ConfirmationTimeout { reason: String },

    /// No token or PKCS#11 module present.
    #[error("token absent: {reason}")]
    TokenAbsent { reason: String },

    /// No sign-capable private key on the token.
    #[error("key not found: {reason}")]
    KeyNotFound { reason: String },

    /// More than one sign-capable private key matched.
    #[error("key ambiguous: {reason}")]
    KeyAmbiguous { reason: String },

    /// Request could not be parsed or has the wrong shape.
    #[error("malformed request: {reason}")]
    MalformedRequest { reason: String },

    /// Channel unreachable, or mailbox response never appeared.
    #[error("transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    /// The repository tool sent something other than one hex hash line.
    #[error("signing command contract violated: {reason}")]
    ToolContractViolation { reason: String },

    /// Response from the bridge could not be parsed.
    #[error("malformed response: {reason}")]
    MalformedResponse { reason: String },

    /// The signature came from a key other than the expected one.
    #[error("unexpected signer: {reason}")]
    UnexpectedSigner { reason: String },

    /// Another signing request is outstanding.
    #[error("signing authority busy: {reason}")]
    Busy { reason: String },

    /// Error reported by the remote signer with an unrecognised code.
    #[error("signer error: {message}")]
    Remote { message: String },

    /// Signature does not verify.
    #[error("signature verification failed: {reason}")]
    SignatureInvalid { reason: String },

    /// Public key fingerprint differs from the pinned one.
    #[error("fingerprint mismatch: expected {expected}, got {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    /// Public key could not be decoded.
    #[error("invalid public key: {reason}")]
    InvalidPublicKey { reason: String },

    /// Other token failure.
    #[error("token error: {reason}")]
    Token { reason: String },

    /// Remote invocation failed or exited nonzero.
    #[error("remote command failed: {reason}")]
    RemoteCommand { reason: String },

    /// Expected trust artifact does not exist after the run.
    #[error("expected artifact missing: {path}")]
    ArtifactMissing { path: String },

    /// Configuration error.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Local I/O error.
    #[error("io error: {message}")]
    Io { message: String },
}

impl SignError {
    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            // Usage / contract
            Self::Config { .. } => 1,
            Self::ToolContractViolation { .. } => 1,
            Self::MalformedRequest { .. } => 1,

            // Authentication
            Self::AuthenticationFailure { .. } => 2,
            Self::ConfirmationTimeout { .. } => 2,

            // Token / key
            Self::TokenAbsent { .. } => 3,
            Self::KeyNotFound { .. } => 3,
            Self::KeyAmbiguous { .. } => 3,
            Self::Token { .. } => 3,
            Self::Busy { .. } => 3,

            // Verification
            Self::SignatureInvalid { .. } => 4,
            Self::FingerprintMismatch { .. } => 4,
            Self::InvalidPublicKey { .. } => 4,
            Self::UnexpectedSigner { .. } => 4,

            // Transport
            Self::TransportUnavailable { .. } => 5,
            Self::MalformedResponse { .. } => 5,
            Self::Remote { .. } => 5,

            // Orchestration
            Self::RemoteCommand { .. } => 6,
            Self::ArtifactMissing { .. } => 6,

            Self::Io { .. } => 7,
        }
    }

    /// Whether the error is retryable. Always false: a higher-level build
    /// may retry the whole operation, the signing layer does not.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Whether the error is reported by the transport rather than the signer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable { .. }
                | Self::MalformedResponse { .. }
                | Self::UnexpectedSigner { .. }
        )
    }

    /// Stable snake_case code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthenticationFailure { .. } => "authentication_failure",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::TokenAbsent { .. } => "token_absent",
            Self::KeyNotFound { .. } => "key_not_found",
            Self::KeyAmbiguous { .. } => "key_ambiguous",
            Self::MalformedRequest { .. } => "malformed_request",
            Self::TransportUnavailable { .. } => "transport_unavailable",
            Self::ToolContractViolation { .. } => "tool_contract_violation",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::UnexpectedSigner { .. } => "unexpected_signer",
            Self::Busy { .. } => "busy",
            Self::Remote { .. } => "remote",
            Self::SignatureInvalid { .. } => "signature_invalid",
            Self::FingerprintMismatch { .. } => "fingerprint_mismatch",
            Self::InvalidPublicKey { .. } => "invalid_public_key",
            Self::Token { .. } => "token_error",
            Self::RemoteCommand { .. } => "remote_command",
            Self::ArtifactMissing { .. } => "artifact_missing",
            Self::Config { .. } => "config",
            Self::Io { .. } => "io",
        }
    }

    /// Encode as the message part of an `ERR` line.
    pub fn to_wire(&self) -> String {
        let detail = match self {
            Self::AuthenticationFailure { reason }
            | Self::ConfirmationTimeout { reason }
            | Self::TokenAbsent { reason }
            | Self::KeyNotFound { reason }
            | Self::KeyAmbiguous { reason }
            | Self::MalformedRequest { reason }
            | Self::TransportUnavailable { reason }
            | Self::ToolContractViolation { reason }
            | Self::MalformedResponse { reason }
            | Self::UnexpectedSigner { reason }
            | Self::Busy { reason }
            | Self::SignatureInvalid { reason }
            | Self::InvalidPublicKey { reason }
            | Self::Token { reason }
            | Self::RemoteCommand { reason } => reason.clone(),
            Self::Remote { message } | Self::Config { message } | Self::Io { message } => {
                message.clone()
            }
            Self::FingerprintMismatch { .. } | Self::ArtifactMissing { .. } => self.to_string(),
        };
        // ERR lines are single-line
        let detail = detail.replace(['\r', '\n'], " ");
        format!("{}: {}", self.code(), detail)
    }

    /// Decode the message part of an `ERR` line.
    ///
    /// Signer-side codes map back to their typed variant; anything else is
    /// kept verbatim as [`SignError::Remote`].
    pub fn from_wire(message: &str) -> Self {
        let Some((code, detail)) = message.split_once(": ") else {
            return Self::Remote {
                message: message.to_string(),
            };
        };
        let reason = detail.to_string();
        match code {
            "authentication_failure" => Self::AuthenticationFailure { reason },
            "confirmation_timeout" => Self::ConfirmationTimeout { reason },
            "token_absent" => Self::TokenAbsent { reason },
            "key_not_found" => Self::KeyNotFound { reason },
            "key_ambiguous" => Self::KeyAmbiguous { reason },
            "malformed_request" => Self::MalformedRequest { reason },
            "busy" => Self::Busy { reason },
            "token_error" => Self::Token { reason },
            _ => Self::Remote {
                message: message.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for SignError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

/// Result type for signing operations.
pub type SignResult<T> = Result<T, SignError>;
