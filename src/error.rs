use thiserror::Error;

use crate::netlink::netns::NetnsError;
use crate::netlink::LinkError;
use crate::types::ErrorResult;

/// Everything that can abort a CNI invocation.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid network config: {0}")]
    Config(String),

    #[error("failed to decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0}")]
    Protocol(String),

    #[error(transparent)]
    Dependency(#[from] LinkError),

    #[error(transparent)]
    Namespace(#[from] NetnsError),

    #[error("delegation failed: {0}")]
    Delegation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// CNI error code: 1-99 are reserved by the CNI spec, 100+ are ours.
    pub fn code(&self) -> u32 {
        match self {
            Error::Protocol(_) => 4,
            Error::Io(_) => 5,
            Error::Decode(_) => 6,
            Error::Config(_) => 7,
            Error::Dependency(_) | Error::Namespace(_) => 100,
            Error::Delegation(_) => 101,
        }
    }

    fn msg(&self) -> &'static str {
        match self {
            Error::Protocol(_) => "Invalid Required Environment Variables",
            Error::Io(_) => "I/O Error",
            Error::Decode(_) => "Decoding Failure",
            Error::Config(_) => "Invalid Network Config",
            Error::Dependency(_) => "Netlink Error",
            Error::Namespace(_) => "Network Namespace Error",
            Error::Delegation(_) => "Address Assignment Failed",
        }
    }

    pub fn into_response(self, cni_version: &str) -> ErrorResult {
        ErrorResult {
            cni_version: cni_version.to_string(),
            code: self.code(),
            msg: self.msg().to_string(),
            details: self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_carries_code_and_details() {
        let resp = Error::Protocol("K8S_POD_NAME is required in CNI args".into())
            .into_response("0.3.1");
        assert_eq!(resp.code, 4);
        assert_eq!(resp.cni_version, "0.3.1");
        assert_eq!(resp.details, "K8S_POD_NAME is required in CNI args");
    }
}
