//! Request authorization.
//!
//! Bearer tokens are verified statelessly, then their subject is resolved
//! through the identity cache. Route-level ownership checks fall back to role
//! precedence. HTTP Basic credentials guard operational endpoints.

mod basic;
mod errors;
mod extractors;
mod gate;
mod password;
mod roles;
mod state;
mod types;

pub use basic::{BasicAuthConfig, BasicPassword, verify_basic};
pub use errors::{ApiAuthError, AuthErrorKind, Challenge};
pub use extractors::{Auth, BasicAuth};
pub use gate::{Rejection, authorize_bearer, parse_authorization, split_scheme};
pub use password::{
    PasswordError, hash_password, is_phc_hash, verify_password, verify_password_or_decoy,
};
pub use roles::{RoleCatalog, RoleError, check_resource_ownership, role_precedence};
pub use state::{HasAuthBackend, HasBasicAuth};
pub use types::AuthenticatedUser;
