use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkdError {
    #[error("ASN.1 error: {0}")]
    Asn1(String),
    #[error("Certificate error: {0}")]
    Certificate(String),
    #[error("Signature error: {0}")]
    Signature(String),
    #[error("MRZ parsing error: {0}")]
    Mrz(String),
    #[error("Data group error: {0}")]
    DataGroup(String),
    #[error("LDAP error: {0}")]
    Ldap(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Scheduler error: {0}")]
    Scheduler(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for PkdError {
    fn from(err: std::io::Error) -> Self {
        PkdError::Io(err.to_string())
    }
}

impl From<postgres::Error> for PkdError {
    fn from(err: postgres::Error) -> Self {
        PkdError::Database(err.to_string())
    }
}

impl From<ldap3::LdapError> for PkdError {
    fn from(err: ldap3::LdapError) -> Self {
        PkdError::Ldap(err.to_string())
    }
}
