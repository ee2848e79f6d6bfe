//! The `Provider` type (spec §4.8, Component H): the lifecycle
//! operations a host calls over its RPC boundary, realized here as
//! plain async methods — the transport itself is out of scope (spec.md
//! §1).

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use convert::Convertor;
use diagnostics::{Diagnostics, ErrorHandlerMeta};
use schema::Table;
use storage::Storage;

use crate::client_meta::{ClientMetaFactory, DefaultClientMetaFactory};
use crate::config::{self, StorageDescriptor};
use crate::pull::{PullTablesProgress, PullTablesRequest, ProgressSender};
use crate::resolve;
use crate::result_handler::ProviderResultHandler;
use crate::runtime::{self, ProviderInformation, ProviderRuntime};
use crate::storage_factory::StorageFactory;
use crate::transformer_meta::TransformerMeta;

/// Reference diagnostics-channel capacity (spec §5, "reference uses
/// 1000"); left a named constant rather than a request field per the
/// open question in spec.md §9 ("make them configurable" — decided in
/// DESIGN.md to keep this a tuning knob internal to the crate rather
/// than externally-visible RPC surface, since spec.md §6 doesn't list it
/// among `PullTables`'s request fields).
const DIAGNOSTICS_CHANNEL_CAPACITY: usize = 1000;

/// `Init`'s request (spec §6): storage descriptor, workspace path,
/// provider-config YAML string, install-init flag.
pub struct InitRequest {
    pub storage: Option<StorageDescriptor>,
    pub workspace: String,
    pub config: String,
    pub is_install_init: bool,
}

/// `GetProviderInformation` / init-time config-template hook (spec
/// §4.8).
#[derive(Default)]
pub struct ConfigMeta {
    pub default_config_template: Option<String>,
}

pub type LifecycleCallback = Arc<dyn Fn() -> Diagnostics + Send + Sync>;

/// Provider-supplied lifecycle hooks (spec §4.8: `Init`'s `AfterInstallInit`
/// / `Init` callbacks).
#[derive(Default, Clone)]
pub struct EventCallback {
    pub on_init: Option<LifecycleCallback>,
    pub after_install_init: Option<LifecycleCallback>,
}

/// A named unit declaring a set of tables plus their data sources (spec
/// GLOSSARY, "Provider"). Construct with `Provider::new`, configure with
/// the `with_*` builders, then drive it through the lifecycle ops below.
///
/// Every lifecycle method takes `self: &Arc<Self>` so that a panic inside
/// it can be recovered at this RPC boundary (spec §7): the call is run
/// on its own task and a `JoinError` is converted into a diagnostic
/// instead of propagating, the same recovery idiom `executor::pool` uses
/// for worker tasks.
pub struct Provider {
    pub name: String,
    pub version: String,
    pub description: String,
    tables: Vec<Table>,
    pub config_meta: ConfigMeta,
    pub event_callback: EventCallback,
    pub client_meta_factory: Arc<dyn ClientMetaFactory>,
    pub transformer_meta: TransformerMeta,
    pub error_handler: ErrorHandlerMeta,
    pub storage_factory: Arc<dyn StorageFactory>,
    runtime: tokio::sync::RwLock<Option<ProviderRuntime>>,
}

impl Provider {
    pub fn new(name: impl Into<String>, version: impl Into<String>, tables: Vec<Table>, storage_factory: Arc<dyn StorageFactory>) -> Self {
        Provider {
            name: name.into(),
            version: version.into(),
            description: String::new(),
            tables,
            config_meta: ConfigMeta::default(),
            event_callback: EventCallback::default(),
            client_meta_factory: Arc::new(DefaultClientMetaFactory),
            transformer_meta: TransformerMeta::default(),
            error_handler: ErrorHandlerMeta::default(),
            storage_factory,
            runtime: tokio::sync::RwLock::new(None),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_config_meta(mut self, config_meta: ConfigMeta) -> Self {
        self.config_meta = config_meta;
        self
    }

    pub fn with_event_callback(mut self, event_callback: EventCallback) -> Self {
        self.event_callback = event_callback;
        self
    }

    pub fn with_client_meta_factory(mut self, factory: Arc<dyn ClientMetaFactory>) -> Self {
        self.client_meta_factory = factory;
        self
    }

    pub fn with_transformer_meta(mut self, transformer_meta: TransformerMeta) -> Self {
        self.transformer_meta = transformer_meta;
        self
    }

    pub fn with_error_handler(mut self, error_handler: ErrorHandlerMeta) -> Self {
        self.error_handler = error_handler;
        self
    }

    pub async fn init(self: &Arc<Self>, req: InitRequest) -> Diagnostics {
        let this = self.clone();
        run_recovering("Init", async move { this.init_inner(req).await }).await.unwrap_or_else(|d| d)
    }

    pub async fn get_provider_information(self: &Arc<Self>) -> (Option<ProviderInformation>, Diagnostics) {
        let this = self.clone();
        run_recovering("GetProviderInformation", async move { this.get_provider_information_inner().await })
            .await
            .unwrap_or_else(|d| (None, d))
    }

    pub async fn get_provider_config(self: &Arc<Self>) -> (Option<String>, Diagnostics) {
        let this = self.clone();
        run_recovering("GetProviderConfig", async move { this.get_provider_config_inner().await })
            .await
            .unwrap_or_else(|d| (None, d))
    }

    pub async fn set_provider_config(self: &Arc<Self>, config: String, storage: Option<StorageDescriptor>) -> Diagnostics {
        let this = self.clone();
        run_recovering("SetProviderConfig", async move { this.set_provider_config_inner(config, storage).await })
            .await
            .unwrap_or_else(|d| d)
    }

    pub async fn create_all_tables(self: &Arc<Self>) -> Diagnostics {
        let this = self.clone();
        run_recovering("CreateAllTables", async move { this.create_all_tables_inner().await })
            .await
            .unwrap_or_else(|d| d)
    }

    pub async fn drop_table_all(self: &Arc<Self>) -> Diagnostics {
        let this = self.clone();
        run_recovering("DropTableAll", async move { this.drop_table_all_inner().await })
            .await
            .unwrap_or_else(|d| d)
    }

    pub async fn pull_tables(self: &Arc<Self>, req: PullTablesRequest, sender: Arc<dyn ProgressSender>) -> Diagnostics {
        let this = self.clone();
        run_recovering("PullTables", async move { this.pull_tables_inner(req, sender).await })
            .await
            .unwrap_or_else(|d| d)
    }

    async fn init_inner(&self, req: InitRequest) -> Diagnostics {
        let mut diags = Diagnostics::new();

        if req.workspace.trim().is_empty() {
            diags.error("workspace must not be empty");
            return diags;
        }

        let config = match config::parse_config(&req.config) {
            Ok(value) => value,
            Err(d) => {
                diags.merge(d);
                return diags;
            }
        };

        let client_meta = match self.client_meta_factory.build(&req.workspace, &self.name, &config) {
            Ok(c) => c,
            Err(d) => {
                diags.merge(d);
                return diags;
            }
        };

        let storage: Arc<dyn Storage> = match &req.storage {
            Some(descriptor) => match self.storage_factory.create(descriptor).await {
                Ok(s) => s,
                Err(d) => {
                    diags.merge(d);
                    return diags;
                }
            },
            None => {
                diags.error("storage descriptor is required to initialize a provider");
                return diags;
            }
        };

        let (table_map, root_order) = match runtime::build_table_map(&self.tables) {
            Ok(pair) => pair,
            Err(d) => {
                diags.merge(d);
                return diags;
            }
        };

        let convertor = self.choose_convertor(&storage);

        diags.merge(runtime::validate_all(&table_map));
        if diags.has_error() {
            return diags;
        }

        let namespace = config::namespace_from_config(&config);

        let built = ProviderRuntime {
            workspace: req.workspace,
            table_map,
            root_order,
            storage,
            convertor,
            client_meta,
            config,
            config_raw: req.config,
            namespace,
        };

        {
            let mut guard = self.runtime.write().await;
            *guard = Some(built);
        }

        if req.is_install_init {
            diags.merge(self.create_all_tables_inner().await);
            if let Some(callback) = &self.event_callback.after_install_init {
                diags.merge(callback());
            }
        } else if let Some(callback) = &self.event_callback.on_init {
            diags.merge(callback());
        }

        diags
    }

    /// Convertor-choice priority (spec §4.8): user override > default
    /// convertor with a configured blacklist > storage-provided > the
    /// hard-coded default.
    fn choose_convertor(&self, storage: &Arc<dyn Storage>) -> Arc<dyn Convertor> {
        if let Some(convertor) = &self.transformer_meta.convertor_override {
            return convertor.clone();
        }
        if self.transformer_meta.use_default_convertor {
            return match &self.transformer_meta.blacklist_override {
                Some(blacklist) => Arc::new(convert::DefaultConvertor::with_blacklist(blacklist.iter().cloned())),
                None => Arc::new(convert::DefaultConvertor::new()),
            };
        }
        if let Some(convertor) = storage.convertor() {
            return convertor;
        }
        Arc::new(convert::DefaultConvertor::new())
    }

    async fn get_provider_information_inner(&self) -> (Option<ProviderInformation>, Diagnostics) {
        let guard = self.runtime.read().await;
        match guard.as_ref() {
            Some(rt) => (
                Some(ProviderInformation {
                    name: self.name.clone(),
                    version: self.version.clone(),
                    tables: rt.table_map.clone(),
                    default_config_template: self.config_meta.default_config_template.clone(),
                }),
                Diagnostics::new(),
            ),
            None => (None, Diagnostics::from_error("provider runtime not initialized")),
        }
    }

    async fn get_provider_config_inner(&self) -> (Option<String>, Diagnostics) {
        let guard = self.runtime.read().await;
        match guard.as_ref() {
            Some(rt) => (Some(rt.config_raw.clone()), Diagnostics::new()),
            None => (None, Diagnostics::from_error("provider runtime not initialized")),
        }
    }

    async fn set_provider_config_inner(&self, config: String, storage_descriptor: Option<StorageDescriptor>) -> Diagnostics {
        let mut diags = Diagnostics::new();

        let (workspace, existing_storage) = {
            let guard = self.runtime.read().await;
            match guard.as_ref() {
                Some(rt) => (rt.workspace.clone(), rt.storage.clone()),
                None => {
                    diags.error("provider runtime not initialized");
                    return diags;
                }
            }
        };

        let parsed = match config::parse_config(&config) {
            Ok(value) => value,
            Err(d) => {
                diags.merge(d);
                return diags;
            }
        };

        let client_meta = match self.client_meta_factory.build(&workspace, &self.name, &parsed) {
            Ok(c) => c,
            Err(d) => {
                diags.merge(d);
                return diags;
            }
        };

        let storage = match storage_descriptor {
            Some(descriptor) => match self.storage_factory.create(&descriptor).await {
                Ok(s) => s,
                Err(d) => {
                    diags.merge(d);
                    return diags;
                }
            },
            None => existing_storage,
        };

        let namespace = config::namespace_from_config(&parsed);

        let mut guard = self.runtime.write().await;
        if let Some(rt) = guard.as_mut() {
            rt.client_meta = client_meta;
            rt.storage = storage;
            rt.namespace = namespace;
            rt.config = parsed;
            rt.config_raw = config;
        }

        diags
    }

    async fn create_all_tables_inner(&self) -> Diagnostics {
        let guard = self.runtime.read().await;
        match guard.as_ref() {
            Some(rt) => {
                let tables: Vec<Table> = rt.table_map.values().map(|t| (**t).clone()).collect();
                rt.storage.tables_create(&rt.namespace, &tables).await
            }
            None => Diagnostics::from_error("provider runtime not initialized"),
        }
    }

    async fn drop_table_all_inner(&self) -> Diagnostics {
        let guard = self.runtime.read().await;
        match guard.as_ref() {
            Some(rt) => {
                let names: Vec<String> = rt.table_map.keys().cloned().collect();
                rt.storage.tables_drop(&rt.namespace, &names).await
            }
            None => Diagnostics::from_error("provider runtime not initialized"),
        }
    }

    /// §4.8 `PullTables`: compute root tables (§4.9), run them through a
    /// disposable pull executor, stream progress, and quiesce.
    async fn pull_tables_inner(&self, req: PullTablesRequest, sender: Arc<dyn ProgressSender>) -> Diagnostics {
        let mut diags = Diagnostics::new();

        let (table_map, root_order, client_meta, convertor, storage, namespace, error_handler) = {
            let guard = self.runtime.read().await;
            match guard.as_ref() {
                Some(rt) => (
                    rt.table_map.clone(),
                    rt.root_order.clone(),
                    rt.client_meta.clone(),
                    rt.convertor.clone(),
                    rt.storage.clone(),
                    rt.namespace.clone(),
                    self.error_handler.clone(),
                ),
                None => {
                    diags.error("provider runtime not initialized");
                    return diags;
                }
            }
        };

        let (roots, resolve_diags) = resolve::resolve_root_tables(&table_map, &root_order, &req.tables);
        diags.merge(resolve_diags);

        let total_table_count: u64 = roots.iter().map(|t| t.subtree_count() as u64).sum();
        // Shared by the task-done callback (writer) and both progress
        // drainers (readers) for the life of this request (spec §5,
        // "finishedTables map... guarded by RW-locks").
        let finished_tables: Arc<std::sync::RwLock<HashMap<String, bool>>> = Arc::new(std::sync::RwLock::new(HashMap::new()));

        let (diag_tx, mut diag_rx) = tokio::sync::mpsc::channel::<Diagnostics>(DIAGNOSTICS_CHANNEL_CAPACITY);
        let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel::<String>();

        let diag_sender = sender.clone();
        let diag_finished = finished_tables.clone();
        let diag_handle = tokio::spawn(async move {
            while let Some(task_diags) = diag_rx.recv().await {
                if task_diags.is_empty() {
                    continue;
                }
                let snapshot = diag_finished.read().unwrap().clone();
                if let Err(err) = diag_sender
                    .send(PullTablesProgress {
                        finished_tables: snapshot,
                        total_table_count,
                        current_table: String::new(),
                        diagnostics: task_diags,
                    })
                    .await
                {
                    tracing::warn!(error = %err, "progress transport failed while streaming diagnostics");
                }
            }
        });

        let done_sender = sender.clone();
        let done_finished = finished_tables.clone();
        let done_handle = tokio::spawn(async move {
            while let Some(table_name) = done_rx.recv().await {
                let snapshot = done_finished.read().unwrap().clone();
                if let Err(err) = done_sender
                    .send(PullTablesProgress {
                        finished_tables: snapshot,
                        total_table_count,
                        current_table: table_name,
                        diagnostics: Diagnostics::new(),
                    })
                    .await
                {
                    tracing::warn!(error = %err, "progress transport failed while streaming table completion");
                }
            }
        });

        let cancel = schema::CancelToken::new();
        let timeout_handle = req.timeout.map(|timeout| {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                cancel.cancel();
            })
        });

        let result_handler: Arc<dyn executor::ResultHandler> = Arc::new(ProviderResultHandler {
            storage,
            convertor,
            error_handler: Arc::new(error_handler.clone()),
            auto_expand: self.transformer_meta.auto_expand,
            namespace,
        });

        let executor_pool = executor::PullExecutor::new(req.max_workers, error_handler);

        {
            let finished_for_callback = finished_tables.clone();
            let callback: executor::TaskDoneCallback = Arc::new(move |task: &executor::DataSourcePullTask| {
                finished_for_callback.write().unwrap().insert(task.table.name.clone(), true);
                let _ = done_tx.send(task.table.name.clone());
                Diagnostics::new()
            });

            for root in &roots {
                let task_id = uuid::Uuid::new_v4().to_string();
                let task = executor::DataSourcePullTask::root(
                    task_id,
                    root.clone(),
                    client_meta.clone(),
                    cancel.clone(),
                    diag_tx.clone(),
                    result_handler.clone(),
                    Some(callback.clone()),
                );
                executor_pool.submit(task);
            }
        }

        drop(diag_tx);
        executor_pool.shutdown_and_await_termination().await;

        if let Some(handle) = timeout_handle {
            handle.abort();
        }

        let _ = diag_handle.await;
        let _ = done_handle.await;

        if !diags.is_empty() {
            let _ = sender
                .send(PullTablesProgress {
                    finished_tables: finished_tables.read().unwrap().clone(),
                    total_table_count,
                    current_table: String::new(),
                    diagnostics: diags.clone(),
                })
                .await;
        }

        diags
    }
}

/// Panic recovery at the provider RPC boundary (spec §7): run `fut` on
/// its own task and turn a `JoinError` (panic) into `Err` instead of
/// letting it unwind into the caller.
async fn run_recovering<T, Fut>(scope: &'static str, fut: Fut) -> Result<T, Diagnostics>
where
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(fut).await.map_err(|join_err| {
        tracing::error!(scope, error = %join_err, "recovered panic at provider RPC boundary");
        Diagnostics::from_error(format!("panic in {scope}: {join_err}"))
    })
}
