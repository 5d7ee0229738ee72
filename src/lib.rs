// Snap2SNOMED library - mapping workflow rules, API client and curator tooling
// This exposes the core components for testing and integration

pub mod api;
pub mod auth;
pub mod automap;
pub mod config;
pub mod import;
pub mod mapping;
pub mod observability;
pub mod shutdown;
pub mod telemetry;
pub mod workflow;

// Re-export key types for easy access
pub use api::{ApiError, MappingApi, Notification, Severity, Snap2SnomedClient};
pub use auth::{AuthError, OAuthClient, SessionStore, SessionTokenProvider, TokenProvider};
pub use automap::{AutomapProgress, AutomapReport, AutomapRunner};
pub use config::{config, init_config, Snap2SnomedConfig};
pub use import::{parse_source, parse_source_file, ImportError, ImportOptions, ImportedCodeSet};
pub use mapping::{
    available_status_options, is_edit_disabled, is_flagging_disabled, is_status_option_disabled,
    is_status_selection_disabled, MappingRowView, MappingStatus, Role,
};
pub use observability::{api_metrics, ApiEvent, OperationTimer};
pub use shutdown::{cancel_on_ctrl_c, CancellationToken};
pub use telemetry::{create_mapping_span, generate_correlation_id, init_telemetry};
pub use workflow::{reduce, AppEvent, AppState, MappingStore, ViewSource, WorkflowError};
