//! Type aliases for domain concepts.

/// Remote key identity the plugin is bound to.
///
/// For Cloud KMS: `projects/*/locations/*/keyRings/*/cryptoKeys/*`.
pub type KeyUri = String;

/// IAM permission identifier, e.g. `cloudkms.cryptoKeyVersions.useToEncrypt`.
pub type Permission = String;
