mod credentials;
mod service;

pub use credentials::{
  generate_session_token, hash_password, hash_session_token, verify_password, MIN_PASSWORD_LENGTH,
};
pub use service::{AuthError, AuthService, IssuedSession, Registration};
