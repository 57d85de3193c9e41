use std::sync::Arc;

use cadenza_core::{
    AuditStore, Config, Dispatcher, RequestStore, SanitizedConfig, SubmissionService,
};

use crate::api::WsBroadcaster;

/// Shared application state
pub struct AppState {
    config: Config,
    audit_store: Arc<dyn AuditStore>,
    request_store: Arc<dyn RequestStore>,
    submission: Arc<SubmissionService>,
    dispatcher: Arc<Dispatcher>,
    ws_broadcaster: WsBroadcaster,
}

impl AppState {
    pub fn new(
        config: Config,
            audit_store: Arc<dyn AuditStore>,
        request_store: Arc<dyn RequestStore>,
        submission: Arc<SubmissionService>,
        dispatcher: Arc<Dispatcher>,
        ws_broadcaster: WsBroadcaster,
    ) -> Self {
        Self {
            config,
            audit_store,
            request_store,
            submission,
            dispatcher,
            ws_broadcaster,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn audit_store(&self) -> &dyn AuditStore {
        self.audit_store.as_ref()
    }

    pub fn request_store(&self) -> &dyn RequestStore {
        self.request_store.as_ref()
    }

    pub fn submission(&self) -> &SubmissionService {
        &self.submission
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn ws_broadcaster(&self) -> &WsBroadcaster {
        &self.ws_broadcaster
    }
}
