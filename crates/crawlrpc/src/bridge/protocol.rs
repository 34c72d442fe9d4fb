//! Wire protocol types for node RPC.
//!
//! A single envelope shape travels in both directions on a node's queue:
//! - **Request**: fresh `id`, `method`, `params`, empty `result`
//! - **Reply**: same `id`, `method` and `params`, with `result` populated
//!   and `reply` set
//!
//! Field names are the compatibility surface with peers that have not been
//! migrated, so they are kept verbatim. Handlers work with [`Request`], the
//! typed view decoded from the generic envelope at the registry boundary.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

/// String-keyed parameter map carried by every envelope.
///
/// Ordered so encoded payloads are stable (matches the key order other
/// peers emit).
pub type Params = BTreeMap<String, String>;

pub const PARAM_LANG: &str = "lang";
pub const PARAM_DEP_NAME: &str = "dep_name";

/// Opaque request identifier.
///
/// Generated as a UUID v4 string, but any string a peer sends is accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The RPC envelope.
///
/// Missing fields decode to their empty value and `"params": null` decodes
/// to an empty map, which is what peers emit for requests without params.
///
/// `reply` is only written when set, so requests keep the four-field shape
/// older peers expect. It lets a caller tell a reply with an empty result
/// from its own request when both sit on the same queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(default)]
    pub id: RequestId,
    #[serde(default)]
    pub method: String,
    #[serde(default, deserialize_with = "deserialize_params")]
    pub params: Params,
    #[serde(default)]
    pub result: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub reply: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

fn deserialize_params<'de, D>(deserializer: D) -> Result<Params, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Params>::deserialize(deserializer)?.unwrap_or_default())
}

impl RpcMessage {
    /// Build a request with a fresh id and an empty result.
    pub fn request(method: impl Into<String>, params: Params) -> Self {
        Self {
            id: RequestId::new(),
            method: method.into(),
            params,
            result: String::new(),
            reply: false,
        }
    }

    /// Parameter value by key; absent keys read as the empty string.
    pub fn param(&self, key: &str) -> &str {
        self.params.get(key).map(String::as_str).unwrap_or("")
    }

    /// Turn a received request into its reply, keeping id, method and params.
    pub fn into_reply(mut self, result: impl Into<String>) -> Self {
        self.result = result.into();
        self.reply = true;
        self
    }
}

/// Built-in remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    InstallLang,
    InstallDep,
    UninstallDep,
    GetInstalledDepList,
}

impl Method {
    pub const ALL: [Method; 4] = [
        Method::InstallLang,
        Method::InstallDep,
        Method::UninstallDep,
        Method::GetInstalledDepList,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InstallLang => "install_lang",
            Self::InstallDep => "install_dep",
            Self::UninstallDep => "uninstall_dep",
            Self::GetInstalledDepList => "get_installed_dep_list",
        }
    }

    /// Recommended client-side wait for a reply.
    pub fn default_timeout(&self) -> Duration {
        match self {
            Self::InstallLang => Duration::from_secs(600),
            Self::InstallDep => Duration::from_secs(10),
            Self::UninstallDep => Duration::from_secs(60),
            Self::GetInstalledDepList => Duration::from_secs(10),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ParamError::UnknownMethod(s.to_string()))
    }
}

/// Language runtime named by the `lang` parameter.
///
/// Unknown names are preserved so they can be passed through to installers
/// and echoed back unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Lang {
    Python,
    Nodejs,
    Other(String),
}

impl Lang {
    pub fn parse(s: &str) -> Self {
        match s {
            "python" => Self::Python,
            // "node" is what older controllers send
            "nodejs" | "node" => Self::Nodejs,
            other => Self::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Python => "python",
            Self::Nodejs => "nodejs",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for Lang {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed view of a built-in request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    InstallLang { lang: Lang },
    InstallDep { lang: Lang, dep_name: String },
    UninstallDep { lang: Lang, dep_name: String },
    GetInstalledDepList { lang: Lang },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParamError {
    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("missing parameter '{key}' for {method}")]
    Missing { method: Method, key: &'static str },
}

impl Request {
    pub fn method(&self) -> Method {
        match self {
            Self::InstallLang { .. } => Method::InstallLang,
            Self::InstallDep { .. } => Method::InstallDep,
            Self::UninstallDep { .. } => Method::UninstallDep,
            Self::GetInstalledDepList { .. } => Method::GetInstalledDepList,
        }
    }

    pub fn to_params(&self) -> Params {
        let mut params = Params::new();
        match self {
            Self::InstallLang { lang } | Self::GetInstalledDepList { lang } => {
                params.insert(PARAM_LANG.to_string(), lang.to_string());
            }
            Self::InstallDep { lang, dep_name } | Self::UninstallDep { lang, dep_name } => {
                params.insert(PARAM_LANG.to_string(), lang.to_string());
                params.insert(PARAM_DEP_NAME.to_string(), dep_name.clone());
            }
        }
        params
    }

    pub fn into_message(self) -> RpcMessage {
        RpcMessage::request(self.method().as_str(), self.to_params())
    }

    /// Decode the typed request from a generic envelope.
    ///
    /// Empty parameter values count as missing.
    pub fn from_message(msg: &RpcMessage) -> Result<Self, ParamError> {
        let method: Method = msg.method.parse()?;
        let required = |key| required_param(msg, method, key);

        let request = match method {
            Method::InstallLang => Self::InstallLang {
                lang: Lang::parse(required(PARAM_LANG)?),
            },
            Method::InstallDep => Self::InstallDep {
                lang: Lang::parse(required(PARAM_LANG)?),
                dep_name: required(PARAM_DEP_NAME)?.to_string(),
            },
            Method::UninstallDep => Self::UninstallDep {
                lang: Lang::parse(required(PARAM_LANG)?),
                dep_name: required(PARAM_DEP_NAME)?.to_string(),
            },
            Method::GetInstalledDepList => Self::GetInstalledDepList {
                lang: Lang::parse(required(PARAM_LANG)?),
            },
        };
        Ok(request)
    }
}

fn required_param<'a>(
    msg: &'a RpcMessage,
    method: Method,
    key: &'static str,
) -> Result<&'a str, ParamError> {
    match msg.param(key) {
        "" => Err(ParamError::Missing { method, key }),
        value => Ok(value),
    }
}
