use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Duration;

use trestle_core::{ApprovalRegistry, SessionTable, DEFAULT_SESSION_TIMEOUT_MINS};
use trestle_providers::ProviderCatalog;

mod gateway;
mod http;
mod ipc;
mod router;

pub use gateway::{ExtensionGateway, ExtensionRegistry, WebGateway, WebRegistry};
pub use http::serve;
pub use ipc::ExtensionLink;
pub use router::{error_envelope, ExtensionSignal, MessageRouter, WebCommand};

/// Everything a request handler needs, cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub catalog: ProviderCatalog,
    pub sessions: SessionTable,
    pub approvals: ApprovalRegistry,
    pub web: Arc<WebRegistry>,
    pub extension: Arc<ExtensionRegistry>,
    pub router: Arc<MessageRouter>,
    pub extension_addr: SocketAddr,
    pub session_timeout: Duration,
}

impl AppState {
    pub fn new(extension_addr: SocketAddr) -> Self {
        Self::with_session_timeout(
            extension_addr,
            Duration::minutes(DEFAULT_SESSION_TIMEOUT_MINS),
        )
    }

    pub fn with_session_timeout(extension_addr: SocketAddr, session_timeout: Duration) -> Self {
        let catalog = ProviderCatalog::new();
        let sessions = SessionTable::new();
        let approvals = ApprovalRegistry::new();
        let web = Arc::new(WebRegistry::new());
        let extension = Arc::new(ExtensionRegistry::new());
        let router = Arc::new(MessageRouter::new(
            catalog.clone(),
            sessions.clone(),
            approvals.clone(),
            web.clone(),
            extension.clone(),
        ));
        Self {
            catalog,
            sessions,
            approvals,
            web,
            extension,
            router,
            extension_addr,
            session_timeout,
        }
    }
}
