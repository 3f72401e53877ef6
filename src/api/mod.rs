//! Operation envelope shared by every transport.
//!
//! Requests are tagged JSON objects; every response carries `success` plus an
//! optional `message` and the operation's payload inlined. Transports decode a
//! [`Request`], call [`Gateway::handle`], and encode the [`Response`]; no
//! gateway semantics live here.

use crate::core::connections::Connection;
use crate::core::dispatcher::Completion;
use crate::core::error::GatewayError;
use crate::core::gateway::Gateway;
use crate::core::metrics::MetricsSnapshot;
use crate::core::registry::{Model, Provider, ProviderKind};
use crate::core::routes::{RouteRule, RouteTarget};
use crate::core::stream::ReplyChunk;
use crate::llm::{ChatMessage, EmbedResponse, OauthChallenge, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Client → Gateway: one operation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    ListProviders {
        #[serde(default)]
        name_filter: Option<String>,
    },
    GetProvider {
        provider_id: String,
    },
    AddProvider {
        name: String,
        #[serde(flatten)]
        kind: ProviderKind,
    },
    DeleteProvider {
        provider_id: String,
    },
    SetProviderEnabled {
        provider_id: String,
        enabled: bool,
    },
    GetModels {
        #[serde(default)]
        name_filter: Option<String>,
    },
    SetModels {
        models: Vec<Model>,
    },
    SetAliasList {
        aliases: Vec<String>,
    },
    GetAliasList,
    SetRouteRules {
        alias: String,
        targets: Vec<RouteTarget>,
    },
    GetRouteRules {
        alias: String,
    },
    CompleteChat {
        alias: String,
        messages: Vec<ChatMessage>,
        #[serde(default)]
        tools: Vec<ToolDefinition>,
    },
    EmbedContent {
        file_path: String,
    },
    CreateStream {
        alias: String,
    },
    AskStream {
        stream_id: String,
        message: String,
        #[serde(default)]
        tools: Vec<ToolDefinition>,
    },
    StreamReply {
        stream_id: String,
        #[serde(default)]
        wait_ms: Option<u64>,
    },
    CancelStream {
        stream_id: String,
    },
    RegisterConnection {
        program_name: String,
        #[serde(default)]
        program_path: Option<String>,
    },
    ListConnections,
    CloseConnection {
        connection_id: String,
    },
    GetMetricsSnapshot,
    GetMetricsRange {
        start_ms: u64,
        end_ms: u64,
    },
}

/// Gateway → Client: result envelope.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub data: Option<ResponseData>,
}

/// Operation payloads, inlined into the envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResponseData {
    Providers {
        providers: Vec<Provider>,
    },
    SingleProvider {
        provider: Provider,
    },
    ProviderAdded {
        provider: Provider,
        #[serde(skip_serializing_if = "Option::is_none")]
        oauth: Option<OauthChallenge>,
    },
    Models {
        models: Vec<Model>,
    },
    Aliases {
        aliases: Vec<String>,
    },
    Rule {
        rule: RouteRule,
    },
    Completion {
        completion: Completion,
    },
    Embedding {
        embeddings: Vec<Vec<f64>>,
        prompt_tokens: u64,
    },
    StreamCreated {
        stream_id: String,
    },
    Chunk(ReplyChunk),
    Connections {
        connections: Vec<Connection>,
    },
    ConnectionClosed {
        connection: Connection,
    },
    Metrics {
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<MetricsSnapshot>,
    },
    MetricsRange {
        buckets: Vec<MetricsSnapshot>,
    },
}

impl Response {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }

    pub fn with_data(data: ResponseData) -> Self {
        Self {
            success: true,
            message: None,
            data: Some(data),
        }
    }

    pub fn error(err: GatewayError) -> Self {
        Self {
            success: false,
            message: Some(err.to_string()),
            data: None,
        }
    }
}

impl From<EmbedResponse> for ResponseData {
    fn from(response: EmbedResponse) -> Self {
        ResponseData::Embedding {
            embeddings: response.embeddings,
            prompt_tokens: response.usage.prompt_tokens,
        }
    }
}

impl Gateway {
    /// Serve one decoded request on behalf of `connection_id`.
    ///
    /// Every outcome becomes a response; errors are envelope-level, never
    /// transport-level. Request-serving operations (chat, streams, embeds)
    /// count against the connection.
    pub async fn handle(&self, connection_id: &str, request: Request) -> Response {
        match request {
            Request::ListProviders { name_filter } => {
                Response::with_data(ResponseData::Providers {
                    providers: self.list_providers(name_filter.as_deref()),
                })
            }
            Request::GetProvider { provider_id } => match self.get_provider(&provider_id) {
                Ok(provider) => Response::with_data(ResponseData::SingleProvider { provider }),
                Err(e) => Response::error(e),
            },
            Request::AddProvider { name, kind } => {
                match self.add_provider(&name, kind).await {
                    Ok((provider, oauth)) => {
                        Response::with_data(ResponseData::ProviderAdded { provider, oauth })
                    }
                    Err(e) => Response::error(e),
                }
            }
            Request::DeleteProvider { provider_id } => {
                match self.delete_provider(&provider_id) {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::error(e),
                }
            }
            Request::SetProviderEnabled {
                provider_id,
                enabled,
            } => match self.set_provider_enabled(&provider_id, enabled) {
                Ok(()) => Response::ok(),
                Err(e) => Response::error(e),
            },
            Request::GetModels { name_filter } => Response::with_data(ResponseData::Models {
                models: self.get_models(name_filter.as_deref()),
            }),
            Request::SetModels { models } => {
                self.set_models(models);
                Response::ok()
            }
            Request::SetAliasList { aliases } => {
                self.set_alias_list(aliases);
                Response::ok()
            }
            Request::GetAliasList => Response::with_data(ResponseData::Aliases {
                aliases: self.get_alias_list(),
            }),
            Request::SetRouteRules { alias, targets } => {
                match self.set_route_rules(&alias, targets) {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::error(e),
                }
            }
            Request::GetRouteRules { alias } => match self.get_route_rules(&alias) {
                Ok(rule) => Response::with_data(ResponseData::Rule { rule }),
                Err(e) => Response::error(e),
            },
            Request::CompleteChat {
                alias,
                messages,
                tools,
            } => {
                self.touch_connection(connection_id);
                match self.complete_chat(&alias, messages, tools).await {
                    Ok(completion) => {
                        Response::with_data(ResponseData::Completion { completion })
                    }
                    Err(e) => Response::error(e),
                }
            }
            Request::EmbedContent { file_path } => {
                self.touch_connection(connection_id);
                match self.embed_content(&file_path).await {
                    Ok(response) => Response::with_data(response.into()),
                    Err(e) => Response::error(e),
                }
            }
            Request::CreateStream { alias } => {
                self.touch_connection(connection_id);
                match self.create_stream(&alias, Some(connection_id.to_string())) {
                    Ok(stream_id) => {
                        Response::with_data(ResponseData::StreamCreated { stream_id })
                    }
                    Err(e) => Response::error(e),
                }
            }
            Request::AskStream {
                stream_id,
                message,
                tools,
            } => {
                self.touch_connection(connection_id);
                match self.ask_stream(&stream_id, message, tools).await {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::error(e),
                }
            }
            Request::StreamReply { stream_id, wait_ms } => {
                self.touch_connection(connection_id);
                match self.stream_reply(&stream_id, wait_ms).await {
                    Ok(chunk) => Response::with_data(ResponseData::Chunk(chunk)),
                    Err(e) => Response::error(e),
                }
            }
            Request::CancelStream { stream_id } => {
                self.touch_connection(connection_id);
                match self.cancel_stream(&stream_id).await {
                    Ok(()) => Response::ok(),
                    Err(e) => Response::error(e),
                }
            }
            Request::RegisterConnection {
                program_name,
                program_path,
            } => {
                self.register_connection(connection_id, &program_name, program_path);
                Response::ok()
            }
            Request::ListConnections => Response::with_data(ResponseData::Connections {
                connections: self.list_connections(),
            }),
            Request::CloseConnection {
                connection_id: target,
            } => match self.close_connection(&target).await {
                Ok(connection) => {
                    Response::with_data(ResponseData::ConnectionClosed { connection })
                }
                Err(e) => Response::error(e),
            },
            Request::GetMetricsSnapshot => Response::with_data(ResponseData::Metrics {
                metrics: self.metrics_snapshot(),
            }),
            Request::GetMetricsRange { start_ms, end_ms } => {
                Response::with_data(ResponseData::MetricsRange {
                    buckets: self.metrics_range(start_ms, end_ms),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_tag_decoding() {
        let request: Request = serde_json::from_str(r#"{"op":"get_alias_list"}"#).unwrap();
        assert!(matches!(request, Request::GetAliasList));

        let request: Request = serde_json::from_str(
            r#"{"op":"add_provider","name":"OpenAI","type":"api_key","api_key":"sk-1"}"#,
        )
        .unwrap();
        match request {
            Request::AddProvider { name, kind } => {
                assert_eq!(name, "OpenAI");
                assert!(matches!(kind, ProviderKind::ApiKey { .. }));
            }
            other => panic!("wrong decode: {:?}", other),
        }
    }

    #[test]
    fn test_response_envelope_shape() {
        let ok = serde_json::to_value(Response::with_data(ResponseData::StreamCreated {
            stream_id: "s1".into(),
        }))
        .unwrap();
        assert_eq!(ok["success"], true);
        assert_eq!(ok["stream_id"], "s1");
        assert!(ok.get("message").is_none());

        let err = serde_json::to_value(Response::error(GatewayError::NotFound(
            "stream 's1'".into(),
        )))
        .unwrap();
        assert_eq!(err["success"], false);
        assert_eq!(err["message"], "not found: stream 's1'");
    }

    #[test]
    fn test_stream_reply_defaults_wait() {
        let request: Request =
            serde_json::from_str(r#"{"op":"stream_reply","stream_id":"s1"}"#).unwrap();
        match request {
            Request::StreamReply { wait_ms, .. } => assert!(wait_ms.is_none()),
            other => panic!("wrong decode: {:?}", other),
        }
    }
}
