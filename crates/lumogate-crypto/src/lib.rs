pub mod envelope;
pub mod keys;
pub mod pgp;

pub use envelope::{EnvelopeError, U2lEnvelope};
pub use keys::{KeyError, MasterKey, SpaceKey};
pub use pgp::{PgpEncryptor, PgpError};
