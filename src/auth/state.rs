//! Authentication state traits and macros.

use crate::identity::IdentityResolver;
use crate::jwt::JwtConfig;

use super::basic::BasicAuthConfig;

/// Trait for state types that can run the bearer gate.
pub trait HasAuthBackend {
    fn jwt(&self) -> &JwtConfig;
    fn identities(&self) -> &IdentityResolver;
}

/// Trait for state types that can run the basic-auth gate.
pub trait HasBasicAuth {
    fn basic_auth(&self) -> &BasicAuthConfig;
}

/// Macro to implement `HasAuthBackend` for state structs with the standard fields.
///
/// The struct must have these fields:
/// - `jwt: Arc<JwtConfig>`
/// - `identities: IdentityResolver`
///
/// # Example
/// ```ignore
/// use crate::impl_has_auth_backend;
///
/// #[derive(Clone)]
/// pub struct MyState {
///     pub db: Database,
///     pub jwt: Arc<JwtConfig>,
///     pub identities: IdentityResolver,
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn jwt(&self) -> &$crate::jwt::JwtConfig {
                &self.jwt
            }
            fn identities(&self) -> &$crate::identity::IdentityResolver {
                &self.identities
            }
        }
    };
}
