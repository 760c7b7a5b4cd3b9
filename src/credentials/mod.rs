/*!
 * Session credentials.
 *
 * - `model`: the credential record and identity key derivation
 * - `registry`: deduplication, preferred selection and change events
 */

pub mod model;
pub mod registry;

pub use model::{Credential, extract_cookie_key, identity_key};
pub use registry::{CredentialRegistry, CredentialSource, CredentialsChanged};
