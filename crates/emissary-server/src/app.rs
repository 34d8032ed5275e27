//! Service wiring: every shared singleton lives on one `Services` struct
//! built once at startup and passed through request handling.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use emissary_adapters::gemini::{GeminiAdapter, HttpGeminiTransport};
use emissary_adapters::grok::{GrokAdapter, HttpChatTransport};
use emissary_adapters::mock::MockAdapter;
use emissary_adapters::openai::{HttpResponsesTransport, ResponsesAdapter};
use emissary_adapters::Adapter;
use emissary_cache::StableListCache;
use emissary_context::ContextPacker;
use emissary_core::config::EmissaryConfig;
use emissary_core::{EmissaryError, Result};
use emissary_memory::{MemorySearch, MemoryStores, SearchDeduplicator};
use emissary_sessions::{CliSessionBridge, SessionCache};
use emissary_stores::{LoiterKillerClient, VectorStoreClient, VectorStoreManager};

use crate::ops::OperationManager;
use crate::spec::{ProviderKind, ToolSpec};

pub struct Services {
    pub config: EmissaryConfig,
    pub sessions: Arc<SessionCache>,
    pub cli_bridge: Arc<CliSessionBridge>,
    pub stable_list: Arc<StableListCache>,
    pub packer: Arc<ContextPacker>,
    pub store_client: Option<Arc<VectorStoreClient>>,
    pub store_manager: Arc<VectorStoreManager>,
    pub memory: Option<Arc<MemoryStores>>,
    pub memory_search: Option<Arc<MemorySearch>>,
    pub dedup: Arc<SearchDeduplicator>,
    pub ops: Arc<OperationManager>,
    adapters: DashMap<&'static str, Arc<dyn Adapter>>,
}

impl Services {
    pub async fn init(config: EmissaryConfig) -> Result<Arc<Self>> {
        let state_dir = config.state_dir();
        let mock = config.dev.adapter_mock;
        let ttl = config.session.ttl_secs;
        let purge_p = config.session.purge_probability;

        let sessions = Arc::new(
            SessionCache::open(&state_dir.join("sessions.sqlite3"), ttl, purge_p)
                .map_err(|e| EmissaryError::Database(e.to_string()))?,
        );
        let cli_bridge = Arc::new(
            CliSessionBridge::open(&state_dir.join("sessions.sqlite3"), purge_p)
                .map_err(|e| EmissaryError::Database(e.to_string()))?,
        );
        let stable_list = Arc::new(
            StableListCache::open(&state_dir.join("sessions.sqlite3"), ttl, purge_p)
                .map_err(|e| EmissaryError::Database(e.to_string()))?,
        );
        let packer = Arc::new(ContextPacker::new(
            Arc::clone(&stable_list),
            config.context.inline_budget_ratio,
        ));

        let store_client = config.providers.openai.as_ref().map(|cfg| {
            Arc::new(VectorStoreClient::new(
                cfg.api_key.clone(),
                cfg.base_url.clone(),
            ))
        });
        let loiter = Arc::new(
            LoiterKillerClient::connect(&config.services.loiter_killer_url, mock).await,
        );
        let store_manager = Arc::new(VectorStoreManager::new(
            store_client.clone(),
            Arc::clone(&loiter),
            mock,
            config.services.attachment_search_all_stores,
        ));

        let dedup = Arc::new(SearchDeduplicator::new("search"));
        let (memory, memory_search) = if config.memory.enabled {
            let stores = Arc::new(
                MemoryStores::open(
                    &state_dir.join("memory.sqlite3"),
                    store_client.clone(),
                    Arc::clone(&loiter),
                    mock,
                    config.memory.rollover_limit,
                )
                .map_err(|e| EmissaryError::Database(e.to_string()))?,
            );
            let search = Arc::new(MemorySearch::new(
                Arc::clone(&stores),
                store_client.clone(),
                Arc::clone(&dedup),
                mock,
            ));
            (Some(stores), Some(search))
        } else {
            (None, None)
        };

        info!(
            state = %state_dir.display(),
            mock,
            memory = config.memory.enabled,
            "services initialised"
        );

        Ok(Arc::new(Self {
            config,
            sessions,
            cli_bridge,
            stable_list,
            packer,
            store_client,
            store_manager,
            memory,
            memory_search,
            dedup,
            ops: Arc::new(OperationManager::new()),
            adapters: DashMap::new(),
        }))
    }

    /// Lazily build (and cache) the adapter behind a chat tool.
    pub fn adapter_for(&self, spec: &'static ToolSpec) -> Result<Arc<dyn Adapter>> {
        if let Some(existing) = self.adapters.get(spec.name) {
            return Ok(Arc::clone(existing.value()));
        }

        let mock = self.config.dev.adapter_mock;
        let adapter: Arc<dyn Adapter> = match spec.provider {
            ProviderKind::Responses => {
                if mock {
                    Arc::new(MockAdapter::new(
                        "responses",
                        spec.model,
                        spec.context_window,
                        true,
                        Arc::clone(&self.sessions),
                    ))
                } else {
                    let cfg = self.config.providers.openai.as_ref().ok_or_else(|| {
                        EmissaryError::Config("providers.openai is not configured".into())
                    })?;
                    Arc::new(ResponsesAdapter::new(
                        Arc::new(HttpResponsesTransport::new(
                            cfg.api_key.clone(),
                            cfg.base_url.clone(),
                        )),
                        spec.model,
                        spec.context_window,
                        Arc::clone(&self.sessions),
                    ))
                }
            }
            ProviderKind::Gemini => {
                if mock {
                    Arc::new(MockAdapter::new(
                        "gemini",
                        spec.model,
                        spec.context_window,
                        false,
                        Arc::clone(&self.sessions),
                    ))
                } else {
                    let cfg = self.config.providers.vertex.as_ref().ok_or_else(|| {
                        EmissaryError::Config("providers.vertex is not configured".into())
                    })?;
                    let transport = HttpGeminiTransport::from_file(
                        &cfg.service_account_path,
                        cfg.project.clone(),
                        Some(cfg.location.clone()),
                        std::time::Duration::from_secs(cfg.token_refresh_leeway_secs),
                    )
                    .map_err(|e| EmissaryError::Config(e.to_string()))?;
                    Arc::new(GeminiAdapter::new(
                        Arc::new(transport),
                        spec.model,
                        spec.context_window,
                        Arc::clone(&self.sessions),
                    ))
                }
            }
            ProviderKind::Grok => {
                if mock {
                    Arc::new(MockAdapter::new(
                        "chat",
                        spec.model,
                        spec.context_window,
                        false,
                        Arc::clone(&self.sessions),
                    ))
                } else {
                    let cfg = self.config.providers.xai.as_ref().ok_or_else(|| {
                        EmissaryError::Config("providers.xai is not configured".into())
                    })?;
                    Arc::new(GrokAdapter::new(
                        Arc::new(HttpChatTransport::new(
                            cfg.api_key.clone(),
                            cfg.base_url.clone(),
                        )),
                        spec.model,
                        spec.context_window,
                        Arc::clone(&self.sessions),
                    ))
                }
            }
            ProviderKind::Builtin(_) => {
                return Err(EmissaryError::Internal(format!(
                    "tool {} has no adapter",
                    spec.name
                )))
            }
        };

        self.adapters.insert(spec.name, Arc::clone(&adapter));
        Ok(adapter)
    }
}
