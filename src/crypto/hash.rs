use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

/// Digest algorithms used for data group hashes and fingerprints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

pub const OID_SHA1: &str = "1.3.14.3.2.26";
pub const OID_SHA256: &str = "2.16.840.1.101.3.4.2.1";
pub const OID_SHA384: &str = "2.16.840.1.101.3.4.2.2";
pub const OID_SHA512: &str = "2.16.840.1.101.3.4.2.3";

impl HashAlgorithm {
    /// Map a digest algorithm OID to an algorithm. Unknown OIDs fall back to
    /// SHA-256, the dominant algorithm in issued SODs.
    pub fn from_oid(oid: &str) -> HashAlgorithm {
        match oid {
            OID_SHA1 => HashAlgorithm::Sha1,
            OID_SHA256 => HashAlgorithm::Sha256,
            OID_SHA384 => HashAlgorithm::Sha384,
            OID_SHA512 => HashAlgorithm::Sha512,
            _ => HashAlgorithm::Sha256,
        }
    }

    pub fn from_name(name: &str) -> HashAlgorithm {
        match name.to_ascii_uppercase().replace('-', "").as_str() {
            "SHA1" => HashAlgorithm::Sha1,
            "SHA384" => HashAlgorithm::Sha384,
            "SHA512" => HashAlgorithm::Sha512,
            _ => HashAlgorithm::Sha256,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha1 => "SHA-1",
            HashAlgorithm::Sha256 => "SHA-256",
            HashAlgorithm::Sha384 => "SHA-384",
            HashAlgorithm::Sha512 => "SHA-512",
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            HashAlgorithm::Sha1 => 20,
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

/// Compute the digest of `data` under `algorithm`.
pub fn calculate_hash(data: &[u8], algorithm: HashAlgorithm) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha1 => Sha1::digest(data).to_vec(),
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_oids() {
        assert_eq!(HashAlgorithm::from_oid(OID_SHA1), HashAlgorithm::Sha1);
        assert_eq!(HashAlgorithm::from_oid(OID_SHA256), HashAlgorithm::Sha256);
        assert_eq!(HashAlgorithm::from_oid(OID_SHA384), HashAlgorithm::Sha384);
        assert_eq!(HashAlgorithm::from_oid(OID_SHA512), HashAlgorithm::Sha512);
    }

    #[test]
    fn test_unknown_oid_defaults_to_sha256() {
        assert_eq!(
            HashAlgorithm::from_oid("1.2.3.4.5"),
            HashAlgorithm::Sha256
        );
    }

    #[test]
    fn test_digest_lengths() {
        let data = b"icao pkd";
        for alg in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            assert_eq!(calculate_hash(data, alg).len(), alg.digest_len());
        }
    }

    #[test]
    fn test_sha256_vector() {
        // SHA-256 of the empty string
        let digest = calculate_hash(b"", HashAlgorithm::Sha256);
        assert_eq!(
            hex::encode(digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
