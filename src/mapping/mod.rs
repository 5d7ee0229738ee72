// Mapping row workflow: status rules, write permissions and row change tracking

pub mod permissions;
pub mod row_view;
pub mod status;
pub mod types;

pub use permissions::{is_edit_disabled, is_flagging_disabled, is_status_selection_disabled};
pub use row_view::{MappingRowView, RowField, RowSnapshot};
pub use status::{
    available_status_options, in_authored_state, in_reviewed_state, is_status_option_disabled,
    is_status_option_disabled_raw, MappingStatus, ParseEnumError, Role, AUTHOR_STATUSES,
    REVIEW_STATUSES,
};
pub use types::{
    BulkUpdate, BulkUpdateResult, Concept, ExportFormat, MapRow, MapViewFilter, Mapping, Page,
    PageInfo, Project, Relationship, Sort, SortDirection, TargetRow, Task, User,
};
