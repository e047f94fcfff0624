//! Credentials, sessions and account provisioning

pub mod jwt;
pub mod middleware;
pub mod password;
pub mod pkce;
pub mod provisioner;
pub mod validation;

pub use jwt::{Claims, JwtError, SessionTokenIssuer};
pub use middleware::{authorize_admin, bearer_token, AdminUser, AuthUser};
pub use password::{validate_password_strength, CredentialHasher, WorkFactor};
pub use pkce::{PkceChallenge, PkceError, PkceStateStore};
pub use provisioner::{
    AccountProvisioner, AdminPreauthorization, EmailAllowList, NoPreauthorization,
    ProvisionError, ProvisionedAccount,
};
