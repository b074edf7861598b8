/// Secret handling for stored notification credentials.
///
/// Channel credentials are kept sealed at rest and only opened right before a
/// delivery attempt.
pub mod secret_box;

pub use secret_box::{ChaChaSecretBox, SecretBox, SecretError};
