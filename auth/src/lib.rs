//! Authentication core for the notes service.
//!
//! Two halves:
//! - [`oauth`]: the Authorization Code + PKCE handshake against an external
//!   identity provider (Google by default), with single-use CSRF `state`
//!   values kept in a [`StateStore`].
//! - [`token`]: issuing and validating the service's own HS256 bearer tokens,
//!   with an optional [`BlacklistChecker`] for revocation.

pub mod blacklist;
pub mod error;
pub mod oauth;
pub mod pkce;
pub mod random;
pub mod state;
pub mod token;

pub use blacklist::{BlacklistChecker, BoxError};
pub use error::{Error, ProviderFailure};
pub use oauth::{GoogleConfig, OAuthService, ProviderToken, UserInfo};
pub use pkce::{generate_code_challenge, generate_code_verifier};
pub use state::{MemoryStateStore, StateStore, generate_secure_state};
pub use token::{TokenClaims, TokenConfig, TokenPair, TokenService, TokenUser};
