use crate::error::Error;

pub const POD_NAME_KEY: &str = "K8S_POD_NAME";
pub const POD_NAMESPACE_KEY: &str = "K8S_POD_NAMESPACE";

/// The pod an ADD is performed for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodIdentity {
    pub name: String,
    pub namespace: String,
}

impl PodIdentity {
    /// Extract the pod name and namespace from a `KEY=VALUE;...` string.
    pub fn from_args(args: &str) -> Result<Self, Error> {
        Ok(Self {
            name: value_from_args(POD_NAME_KEY, args)?,
            namespace: value_from_args(POD_NAMESPACE_KEY, args)?,
        })
    }
}

/// Return the value of `key`, which must appear exactly once in `args`.
pub fn value_from_args(key: &str, args: &str) -> Result<String, Error> {
    if args.is_empty() {
        return Err(Error::Protocol("CNI args is required".to_string()));
    }

    let mut values = args
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(k, _)| *k == key)
        .map(|(_, v)| v);

    match (values.next(), values.next()) {
        (Some(value), None) => Ok(value.to_string()),
        (None, _) => Err(Error::Protocol(format!("{} is required in CNI args", key))),
        (Some(_), Some(_)) => Err(Error::Protocol(format!(
            "{} is given more than once in CNI args",
            key
        ))),
    }
}
