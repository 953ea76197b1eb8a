//! Command façade for host runtimes.
//!
//! Maps plugin invocations onto gateway and configuration operations and
//! marshals the outcome. Action and field names follow the host plugin API.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::gateway::AttestationGateway;
use crate::result::{Failure, FailureKind, MediationResult};

/// A plugin invocation.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum Command {
    Initialize {
        config: String,
    },
    SetProceedOnNetworkFail,
    SetTokenHeader {
        header: String,
        #[serde(default)]
        prefix: String,
    },
    SetBindingHeader {
        header: String,
    },
    AddSubstitutionHeader {
        header: String,
        #[serde(default)]
        required_prefix: Option<String>,
    },
    RemoveSubstitutionHeader {
        header: String,
    },
    AddSubstitutionQueryParam {
        key: String,
    },
    RemoveSubstitutionQueryParam {
        key: String,
    },
    #[serde(rename = "addExclusionURLRegex")]
    AddExclusionUrlRegex {
        url_regex: String,
    },
    #[serde(rename = "removeExclusionURLRegex")]
    RemoveExclusionUrlRegex {
        url_regex: String,
    },
    Prefetch,
    Precheck,
    #[serde(rename = "getDeviceID")]
    GetDeviceId,
    SetDataHashInToken {
        data: String,
    },
    FetchToken {
        url: String,
    },
    GetMessageSignature {
        message: String,
    },
    FetchSecureString {
        key: String,
        #[serde(default)]
        new_def: Option<String>,
    },
    #[serde(rename = "fetchCustomJWT")]
    FetchCustomJwt {
        payload: String,
    },
}

impl Command {
    /// Action name as the host sends it.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Initialize { .. } => "initialize",
            Self::SetProceedOnNetworkFail => "setProceedOnNetworkFail",
            Self::SetTokenHeader { .. } => "setTokenHeader",
            Self::SetBindingHeader { .. } => "setBindingHeader",
            Self::AddSubstitutionHeader { .. } => "addSubstitutionHeader",
            Self::RemoveSubstitutionHeader { .. } => "removeSubstitutionHeader",
            Self::AddSubstitutionQueryParam { .. } => "addSubstitutionQueryParam",
            Self::RemoveSubstitutionQueryParam { .. } => "removeSubstitutionQueryParam",
            Self::AddExclusionUrlRegex { .. } => "addExclusionURLRegex",
            Self::RemoveExclusionUrlRegex { .. } => "removeExclusionURLRegex",
            Self::Prefetch => "prefetch",
            Self::Precheck => "precheck",
            Self::GetDeviceId => "getDeviceID",
            Self::SetDataHashInToken { .. } => "setDataHashInToken",
            Self::FetchToken { .. } => "fetchToken",
            Self::GetMessageSignature { .. } => "getMessageSignature",
            Self::FetchSecureString { .. } => "fetchSecureString",
            Self::FetchCustomJwt { .. } => "fetchCustomJWT",
        }
    }
}

// Arguments may carry secret definitions, so only the action is shown.
impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("action", &self.action())
            .finish_non_exhaustive()
    }
}

/// Marshaled outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CommandResponse {
    Error {
        #[serde(rename = "type")]
        kind: FailureKind,
        message: String,
        #[serde(rename = "rejectionARC", skip_serializing_if = "Option::is_none")]
        rejection_arc: Option<String>,
        #[serde(rename = "rejectionReasons", skip_serializing_if = "Option::is_none")]
        rejection_reasons: Option<String>,
    },
    Success {
        result: Option<String>,
    },
}

impl CommandResponse {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn to_json(&self) -> String {
        // Plain strings and options only, so serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl From<Failure> for CommandResponse {
    fn from(failure: Failure) -> Self {
        Self::Error {
            kind: failure.kind(),
            message: failure.message().to_string(),
            rejection_arc: failure.rejection_arc().map(str::to_string),
            rejection_reasons: failure.rejection_reasons().map(str::to_string),
        }
    }
}

impl From<MediationResult> for CommandResponse {
    fn from(result: MediationResult) -> Self {
        match result {
            Ok(result) => Self::Success { result },
            Err(failure) => failure.into(),
        }
    }
}

/// Dispatches host commands to a gateway.
#[derive(Debug, Clone)]
pub struct CommandFacade {
    gateway: AttestationGateway,
}

impl CommandFacade {
    pub fn new(gateway: AttestationGateway) -> Self {
        Self { gateway }
    }

    pub fn gateway(&self) -> &AttestationGateway {
        &self.gateway
    }

    pub async fn dispatch(&self, command: Command) -> CommandResponse {
        debug!(action = command.action(), "dispatching command");
        let gateway = &self.gateway;
        let config = gateway.config();

        let result: MediationResult = match command {
            Command::Initialize { config: initial } => gateway.initialize(&initial),
            Command::SetProceedOnNetworkFail => {
                config.set_proceed_on_network_fail(true);
                Ok(None)
            }
            Command::SetTokenHeader { header, prefix } => {
                config.set_token_header(&header, &prefix);
                Ok(None)
            }
            Command::SetBindingHeader { header } => {
                config.set_binding_header(&header);
                Ok(None)
            }
            Command::AddSubstitutionHeader {
                header,
                required_prefix,
            } => {
                config.add_substitution_header(&header, required_prefix.as_deref());
                Ok(None)
            }
            Command::RemoveSubstitutionHeader { header } => {
                config.remove_substitution_header(&header);
                Ok(None)
            }
            Command::AddSubstitutionQueryParam { key } => {
                config.add_substitution_query_param(&key);
                Ok(None)
            }
            Command::RemoveSubstitutionQueryParam { key } => {
                config.remove_substitution_query_param(&key);
                Ok(None)
            }
            Command::AddExclusionUrlRegex { url_regex } => {
                config.add_exclusion_url_regex(&url_regex).map(|()| None)
            }
            Command::RemoveExclusionUrlRegex { url_regex } => {
                config.remove_exclusion_url_regex(&url_regex);
                Ok(None)
            }
            Command::Prefetch => gateway.prefetch(),
            Command::Precheck => gateway.precheck().await,
            Command::GetDeviceId => gateway.get_device_id(),
            Command::SetDataHashInToken { data } => gateway.set_data_hash_in_token(&data),
            Command::FetchToken { url } => gateway.fetch_token(&url).await,
            Command::GetMessageSignature { message } => gateway.get_message_signature(&message),
            Command::FetchSecureString { key, new_def } => {
                gateway.fetch_secure_string(&key, new_def.as_deref()).await
            }
            Command::FetchCustomJwt { payload } => gateway.fetch_custom_jwt(&payload).await,
        };

        result.into()
    }

    /// Parse and dispatch a JSON command. Malformed input is a `general`
    /// failure.
    pub async fn dispatch_json(&self, json: &str) -> CommandResponse {
        match serde_json::from_str::<Command>(json) {
            Ok(command) => self.dispatch(command).await,
            Err(e) => Failure::general(format!("invalid command: {}", e)).into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_actions() {
        let command: Command =
            serde_json::from_str(r#"{"action":"addExclusionURLRegex","urlRegex":"^https://cdn"}"#)
                .unwrap();
        assert_eq!(
            command,
            Command::AddExclusionUrlRegex {
                url_regex: "^https://cdn".into()
            }
        );

        let command: Command = serde_json::from_str(r#"{"action":"getDeviceID"}"#).unwrap();
        assert_eq!(command, Command::GetDeviceId);

        let command: Command =
            serde_json::from_str(r#"{"action":"fetchSecureString","key":"api","newDef":"v"}"#)
                .unwrap();
        assert_eq!(
            command,
            Command::FetchSecureString {
                key: "api".into(),
                new_def: Some("v".into())
            }
        );

        let command: Command =
            serde_json::from_str(r#"{"action":"addSubstitutionHeader","header":"Api-Key"}"#)
                .unwrap();
        assert_eq!(
            command,
            Command::AddSubstitutionHeader {
                header: "Api-Key".into(),
                required_prefix: None
            }
        );
    }

    #[test]
    fn test_debug_hides_arguments() {
        let command = Command::FetchSecureString {
            key: "api".into(),
            new_def: Some("new-secret".into()),
        };
        assert!(!format!("{:?}", command).contains("new-secret"));
    }

    #[test]
    fn test_response_json() {
        let ok: CommandResponse = Ok(Some("token".to_string())).into();
        assert_eq!(ok.to_json(), r#"{"result":"token"}"#);

        let empty: CommandResponse = Ok(None).into();
        assert_eq!(empty.to_json(), r#"{"result":null}"#);

        let network: CommandResponse = Failure::network("fetchToken: NO_NETWORK").into();
        assert_eq!(
            network.to_json(),
            r#"{"type":"network","message":"fetchToken: NO_NETWORK"}"#
        );

        let rejected: CommandResponse =
            Failure::rejection("precheck: REJECTED: abc jailbroken", "abc", "jailbroken").into();
        assert_eq!(
            rejected.to_json(),
            r#"{"type":"rejection","message":"precheck: REJECTED: abc jailbroken","rejectionARC":"abc","rejectionReasons":"jailbroken"}"#
        );
    }
}
