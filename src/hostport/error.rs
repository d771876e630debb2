use crate::iptables::{IpFamily, IptablesError};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, HostportError>;

#[derive(Error, Debug)]
pub enum HostportError {
    #[error("Invalid or missing IP for pod '{pod}'")]
    UnsupportedFamily { pod: String },

    #[error("Pod '{pod}' has an {actual} address but this manager programs {expected}")]
    FamilyMismatch {
        pod: String,
        expected: IpFamily,
        actual: IpFamily,
    },

    #[error("Failed to prepare hostport dispatch chains ({family})")]
    BaseChains {
        family: IpFamily,
        #[source]
        source: IptablesError,
    },

    #[error("Failed to program hostports for pod '{pod}' ({family})")]
    Apply {
        pod: String,
        family: IpFamily,
        #[source]
        source: IptablesError,
    },

    #[error("Failed to tear down hostport chain '{chain}' for pod '{pod}' ({family})")]
    Teardown {
        pod: String,
        family: IpFamily,
        chain: String,
        #[source]
        source: IptablesError,
    },

    #[error("Failed to ensure localhost masquerade rule on '{interface}' ({family})")]
    LocalhostMasquerade {
        family: IpFamily,
        interface: String,
        #[source]
        source: IptablesError,
    },

    #[error("Failed to dump nat table ({family})")]
    Dump {
        family: IpFamily,
        #[source]
        source: IptablesError,
    },
}

impl HostportError {
    pub fn unsupported_family(pod: impl Into<String>) -> Self {
        Self::UnsupportedFamily { pod: pod.into() }
    }

    pub fn family_mismatch(pod: impl Into<String>, expected: IpFamily, actual: IpFamily) -> Self {
        Self::FamilyMismatch {
            pod: pod.into(),
            expected,
            actual,
        }
    }

    pub fn base_chains(family: IpFamily, source: IptablesError) -> Self {
        Self::BaseChains { family, source }
    }

    pub fn apply(pod: impl Into<String>, family: IpFamily, source: IptablesError) -> Self {
        Self::Apply {
            pod: pod.into(),
            family,
            source,
        }
    }

    pub fn teardown(
        pod: impl Into<String>,
        family: IpFamily,
        chain: impl Into<String>,
        source: IptablesError,
    ) -> Self {
        Self::Teardown {
            pod: pod.into(),
            family,
            chain: chain.into(),
            source,
        }
    }

    pub fn localhost_masquerade(
        family: IpFamily,
        interface: impl Into<String>,
        source: IptablesError,
    ) -> Self {
        Self::LocalhostMasquerade {
            family,
            interface: interface.into(),
            source,
        }
    }

    pub fn dump(family: IpFamily, source: IptablesError) -> Self {
        Self::Dump { family, source }
    }
}
