//! Wire constants for the local language-server endpoint.
//!
//! The server speaks Connect-style JSON over HTTPS on loopback with a
//! self-signed certificate. Every request carries the csrf token
//! extracted from the process launch arguments.

/// Loopback host the language server listens on.
pub const LOOPBACK_HOST: &str = "127.0.0.1";

/// Health-check path — an empty unleash-data request; HTTP 200 means the
/// port is the right one.
pub const UNLEASH_DATA_PATH: &str =
    "/exa.language_server_pb.LanguageServerService/GetUnleashData";

/// Quota fetch path — returns the nested user-status payload.
pub const USER_STATUS_PATH: &str =
    "/exa.language_server_pb.LanguageServerService/GetUserStatus";

/// Header carrying the csrf token on every local request.
pub const HEADER_CSRF_TOKEN: &str = "X-Codeium-Csrf-Token";

/// Connect protocol version header, fixed to "1".
pub const HEADER_PROTOCOL_VERSION: &str = "Connect-Protocol-Version";
pub const PROTOCOL_VERSION: &str = "1";
