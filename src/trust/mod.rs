//! Trust store lookup for the PA pipeline
//!
//! `CscaProvider` and `CrlProvider` are capability traits; the production
//! implementations search the public LDAP tree, while `FixedTrustStore`
//! serves file-based offline verification and the test suites.

pub mod ldap;
pub mod providers;

pub use ldap::{LdapCrlProvider, LdapCscaProvider, LdapSettings, LdapTree};
pub use providers::{select_csca_candidate, CrlProvider, CscaProvider, FixedTrustStore};
