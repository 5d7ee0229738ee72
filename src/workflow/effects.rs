// Operations that talk to the backend and feed the results back through the
// reducer. Permission checks run first and never touch the network.

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::state::{reduce, AppEvent, AppState, ViewSource};
use crate::api::{ApiError, MappingApi, Notification};
use crate::automap::{AutomapProgress, AutomapReport, AutomapRunner};
use crate::config::AutomapConfig;
use crate::mapping::{
    is_edit_disabled, is_flagging_disabled, is_status_option_disabled,
    is_status_selection_disabled, BulkUpdate, MapViewFilter, MappingRowView, MappingStatus,
    Relationship, Role, RowField,
};
use crate::shutdown::CancellationToken;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Not permitted: {0}")]
    NotPermitted(String),

    #[error("Row {0} is not loaded")]
    UnknownRow(u64),

    #[error("Automap needs a task; the current view is map {0}")]
    NoTask(u64),

    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Owns the application state and the API handle. Every state change goes
/// through [`reduce`].
pub struct MappingStore<A: MappingApi> {
    api: Arc<A>,
    state: AppState,
}

impl<A: MappingApi> MappingStore<A> {
    pub fn new(api: Arc<A>, source: ViewSource, role: Option<Role>) -> Self {
        Self {
            api,
            state: AppState::new(source, role),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn dispatch(&mut self, event: AppEvent) {
        reduce(&mut self.state, event);
    }

    fn row(&self, row_id: u64) -> Result<&MappingRowView> {
        self.state.row(row_id).ok_or(WorkflowError::UnknownRow(row_id))
    }

    pub async fn set_filter(&mut self, filter: MapViewFilter) -> Result<()> {
        self.dispatch(AppEvent::FilterChanged(filter));
        self.load_page().await
    }

    pub async fn load_page(&mut self) -> Result<()> {
        self.dispatch(AppEvent::PageRequested);
        let filter = &self.state.filter;
        let result = match self.state.source {
            ViewSource::Map(map_id) => self.api.map_view(map_id, filter).await,
            ViewSource::Task { task_id, .. } => self.api.task_view(task_id, filter).await,
        };

        match result {
            Ok(page) => {
                debug!(
                    rows = page.content.len(),
                    total = page.page.total_elements,
                    "Page loaded"
                );
                self.dispatch(AppEvent::PageLoaded {
                    rows: page.content,
                    page: page.page,
                });
                Ok(())
            }
            Err(e) => {
                self.dispatch(AppEvent::PageFailed(Notification::from(&e)));
                Err(e.into())
            }
        }
    }

    /// Commit the new status right away and undo it if the backend refuses.
    pub async fn change_status(&mut self, row_id: u64, status: MappingStatus) -> Result<()> {
        let row = self.row(row_id)?;
        let current = row.status();
        let role = self.state.role;
        if is_status_selection_disabled(role, Some(current))
            || role.is_some_and(|role| is_status_option_disabled(role, current, status))
        {
            return Err(WorkflowError::NotPermitted(format!(
                "status {current} cannot change to {status}"
            )));
        }
        if current == status {
            return Ok(());
        }

        let previous = row.committed().clone();
        self.dispatch(AppEvent::StatusSaved { row_id, status });
        if let Err(e) = self.api.update_status(row_id, status).await {
            warn!(row_id, error = %e, "Status change rejected, rolling back");
            self.dispatch(AppEvent::RowReverted {
                row_id,
                previous,
                notification: Notification::from(&e),
            });
            return Err(e.into());
        }
        info!(row_id, from = %current, to = %status, "Status changed");
        Ok(())
    }

    pub async fn change_no_map(&mut self, row_id: u64, no_map: bool) -> Result<()> {
        let row = self.row(row_id)?;
        if is_edit_disabled(self.state.role, Some(row.status())) {
            return Err(WorkflowError::NotPermitted(format!(
                "row {row_id} is read-only"
            )));
        }
        if row.committed().no_map == no_map {
            return Ok(());
        }

        let previous = row.committed().clone();
        self.dispatch(AppEvent::NoMapSaved { row_id, no_map });
        if let Err(e) = self.api.update_no_map(row_id, no_map).await {
            warn!(row_id, error = %e, "No-map change rejected, rolling back");
            self.dispatch(AppEvent::RowReverted {
                row_id,
                previous,
                notification: Notification::from(&e),
            });
            return Err(e.into());
        }
        Ok(())
    }

    /// Live edit only; call [`MappingStore::save_target`] to persist it.
    pub fn edit_target(
        &mut self,
        row_id: u64,
        target_code: Option<String>,
        target_display: Option<String>,
        relationship: Option<Relationship>,
    ) -> Result<()> {
        let row = self.row(row_id)?;
        if is_edit_disabled(self.state.role, Some(row.status())) {
            return Err(WorkflowError::NotPermitted(format!(
                "row {row_id} is read-only"
            )));
        }
        self.dispatch(AppEvent::TargetEdited {
            row_id,
            target_code,
            target_display,
            relationship,
        });
        Ok(())
    }

    pub async fn toggle_flag(&mut self, row_id: u64) -> Result<()> {
        let row = self.row(row_id)?;
        if is_flagging_disabled(self.state.role, Some(row.status())) {
            return Err(WorkflowError::NotPermitted(format!(
                "row {row_id} cannot be flagged at status {}",
                row.status()
            )));
        }
        let flagged = !row.live.flagged;
        self.dispatch(AppEvent::FlagEdited { row_id, flagged });
        self.save_target(row_id).await
    }

    /// Persist live target edits. A changed target or relationship sends the
    /// row back to DRAFT. A failed target write discards the live edits; if
    /// only the status write after it fails, the pending status stays live
    /// and is sent on the next save.
    pub async fn save_target(&mut self, row_id: u64) -> Result<()> {
        let row = self.row(row_id)?;
        let target_changed = row.has_target_or_relationship_changed();
        if target_changed && is_edit_disabled(self.state.role, Some(row.committed().status)) {
            self.dispatch(AppEvent::RowSaveFailed {
                row_id,
                notification: Notification::info("Not saved", "This row is read-only."),
            });
            return Err(WorkflowError::NotPermitted(format!(
                "row {row_id} is read-only"
            )));
        }
        if !row.has_changed() {
            return Ok(());
        }
        if target_changed && row.status() != MappingStatus::Draft {
            self.dispatch(AppEvent::StatusEdited {
                row_id,
                status: MappingStatus::Draft,
            });
        }

        let row = self.row(row_id)?;
        let target = row.to_target_row();
        let status = row.status();
        let status_changed = status != row.committed().status;
        let target_dirty = row
            .diff()
            .iter()
            .any(|field| !matches!(field, RowField::Status | RowField::NoMap));

        if target_dirty {
            let saved = if target.id.is_some() {
                self.api.update_target(&target).await
            } else {
                self.api.create_target(&target).await
            };
            match saved {
                Ok(saved) => self.dispatch(AppEvent::TargetSaved(saved)),
                Err(e) => return Err(self.save_failed(row_id, e)),
            }
        }

        if status_changed {
            if let Err(e) = self.api.update_status(row_id, status).await {
                if target_dirty {
                    return Err(self.status_deferred(row_id, status, e));
                }
                return Err(self.save_failed(row_id, e));
            }
            self.dispatch(AppEvent::StatusSaved { row_id, status });
        }
        debug!(row_id, target_dirty, status_changed, "Row saved");
        Ok(())
    }

    fn save_failed(&mut self, row_id: u64, error: ApiError) -> WorkflowError {
        warn!(row_id, error = %error, "Save failed, discarding edits");
        self.dispatch(AppEvent::RowSaveFailed {
            row_id,
            notification: Notification::from(&error),
        });
        error.into()
    }

    fn status_deferred(
        &mut self,
        row_id: u64,
        status: MappingStatus,
        error: ApiError,
    ) -> WorkflowError {
        warn!(row_id, %status, error = %error, "Target saved, status update failed");
        self.dispatch(AppEvent::StatusSaveDeferred {
            row_id,
            notification: Notification::warning(
                "Status not saved",
                format!(
                    "The target was saved but the row is not yet {status}. Save again to retry."
                ),
            ),
        });
        error.into()
    }

    /// Apply `update` to every row matching the current filter, then reload.
    pub async fn bulk_update(&mut self, update: &BulkUpdate) -> Result<u64> {
        if let (Some(role), Some(status)) = (self.state.role, update.status) {
            let allowed = match role {
                Role::Author => status.is_author_status(),
                Role::Review => status.is_review_status(),
            };
            if !allowed {
                return Err(WorkflowError::NotPermitted(format!(
                    "{role} cannot set status {status}"
                )));
            }
        }
        let content_change = update.no_map.is_some() || update.relationship.is_some();
        if content_change && self.state.role == Some(Role::Review) {
            return Err(WorkflowError::NotPermitted(
                "reviewers cannot change mapping content".to_string(),
            ));
        }

        let map_id = self.state.source.map_id();
        let updated = self
            .api
            .bulk_update(map_id, &self.state.filter, update)
            .await
            .inspect_err(|e| self.state.notifications.push(Notification::from(e)))?;
        info!(map_id, updated, "Bulk update applied");
        self.state
            .notifications
            .push(Notification::info("Bulk update", format!("{updated} rows updated")));
        self.load_page().await?;
        Ok(updated)
    }

    /// Run automap over the task's unmapped rows, folding progress and the
    /// created targets into the state.
    pub async fn automap(
        &mut self,
        config: AutomapConfig,
        cancel: CancellationToken,
    ) -> Result<AutomapReport> {
        let ViewSource::Task { map_id, task_id } = self.state.source else {
            return Err(WorkflowError::NoTask(self.state.source.map_id()));
        };
        if self.state.role == Some(Role::Review) {
            return Err(WorkflowError::NotPermitted(
                "automap is only available to authors".to_string(),
            ));
        }

        let mapping = self.api.mapping(map_id).await?;
        let runner = AutomapRunner::new(Arc::clone(&self.api), config, cancel);
        let candidates = runner.collect_candidates(task_id).await?;
        self.dispatch(AppEvent::AutomapStarted {
            total: candidates.len(),
        });

        let (sender, mut receiver) = mpsc::unbounded_channel::<AutomapProgress>();
        let run = async move {
            let on_progress = move |progress: AutomapProgress| {
                let _ = sender.send(progress);
            };
            runner.run(&mapping, candidates, Some(&on_progress)).await
        };
        let state = &mut self.state;
        let drain = async {
            while let Some(progress) = receiver.recv().await {
                reduce(&mut *state, AppEvent::AutomapProgressed(progress));
            }
        };
        let (report, ()) = tokio::join!(run, drain);

        self.dispatch(AppEvent::AutomapFinished(report.clone()));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::client::MockMappingApi;
    use crate::api::Severity;
    use crate::mapping::row_view::tests::map_row;
    use crate::mapping::{MapRow, PageInfo, TargetRow};

    fn store(api: MockMappingApi, role: Role, rows: Vec<MapRow>) -> MappingStore<MockMappingApi> {
        let mut store = MappingStore::new(
            Arc::new(api),
            ViewSource::Task { map_id: 1, task_id: 7 },
            Some(role),
        );
        store.dispatch(AppEvent::PageLoaded {
            rows,
            page: PageInfo::default(),
        });
        store
    }

    fn unavailable() -> ApiError {
        ApiError::Unavailable("connection refused".to_string())
    }

    #[tokio::test]
    async fn test_target_edit_forces_draft_and_commits_on_save() {
        let mut api = MockMappingApi::new();
        api.expect_create_target()
            .withf(|t: &TargetRow| t.row_id == 3 && t.target_code.as_deref() == Some("22298006"))
            .times(1)
            .returning(|t| {
                let mut saved = t.clone();
                saved.id = Some(99);
                Ok(saved)
            });
        api.expect_update_status()
            .withf(|row_id, status| *row_id == 3 && *status == MappingStatus::Draft)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut store = store(api, Role::Author, vec![map_row(3, "MAPPED")]);
        store
            .edit_target(
                3,
                Some("22298006".to_string()),
                Some("Myocardial infarction".to_string()),
                Some(Relationship::Equivalent),
            )
            .unwrap();
        store.save_target(3).await.unwrap();

        let row = store.state().row(3).unwrap();
        assert_eq!(row.status(), MappingStatus::Draft);
        assert_eq!(row.committed().status, MappingStatus::Draft);
        assert_eq!(row.target_id, Some(99));
        assert!(!row.has_changed());
    }

    #[tokio::test]
    async fn test_failed_target_save_discards_edits() {
        let mut api = MockMappingApi::new();
        api.expect_create_target().times(1).returning(|_| Err(unavailable()));

        let mut store = store(api, Role::Author, vec![map_row(3, "MAPPED")]);
        store
            .edit_target(3, Some("1".to_string()), Some("x".to_string()), None)
            .unwrap();
        let err = store.save_target(3).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Api(ApiError::Unavailable(_))));

        let row = store.state().row(3).unwrap();
        assert_eq!(row.status(), MappingStatus::Mapped);
        assert_eq!(row.live.target_code, None);
        assert_eq!(store.state().notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_saved_target_keeps_draft_pending_when_status_fails() {
        let mut api = MockMappingApi::new();
        api.expect_create_target().times(1).returning(|t| {
            let mut saved = t.clone();
            saved.id = Some(41);
            Ok(saved)
        });
        let mut calls = 0;
        api.expect_update_status()
            .withf(|row_id, status| *row_id == 3 && *status == MappingStatus::Draft)
            .times(2)
            .returning(move |_, _| {
                calls += 1;
                if calls == 1 {
                    Err(unavailable())
                } else {
                    Ok(())
                }
            });

        let mut store = store(api, Role::Author, vec![map_row(3, "MAPPED")]);
        store
            .edit_target(
                3,
                Some("22298006".to_string()),
                Some("Myocardial infarction".to_string()),
                Some(Relationship::Equivalent),
            )
            .unwrap();
        let err = store.save_target(3).await.unwrap_err();
        assert!(matches!(err, WorkflowError::Api(ApiError::Unavailable(_))));

        let row = store.state().row(3).unwrap();
        assert_eq!(row.target_id, Some(41));
        assert_eq!(row.committed().target_code.as_deref(), Some("22298006"));
        assert_eq!(row.status(), MappingStatus::Draft);
        assert_eq!(row.committed().status, MappingStatus::Mapped);
        assert_eq!(row.diff(), vec![RowField::Status]);
        assert_eq!(store.state().notifications[0].severity, Severity::Warning);

        store.save_target(3).await.unwrap();
        let row = store.state().row(3).unwrap();
        assert_eq!(row.committed().status, MappingStatus::Draft);
        assert!(!row.has_changed());
    }

    #[tokio::test]
    async fn test_status_change_rolls_back_on_failure() {
        let mut api = MockMappingApi::new();
        api.expect_update_status().times(1).returning(|_, _| Err(unavailable()));

        let mut store = store(api, Role::Author, vec![map_row(5, "DRAFT")]);
        assert!(store.change_status(5, MappingStatus::Mapped).await.is_err());
        let row = store.state().row(5).unwrap();
        assert_eq!(row.status(), MappingStatus::Draft);
        assert_eq!(row.committed().status, MappingStatus::Draft);
    }

    #[tokio::test]
    async fn test_status_change_commits_on_success() {
        let mut api = MockMappingApi::new();
        api.expect_update_status()
            .withf(|_, status| *status == MappingStatus::Accepted)
            .times(1)
            .returning(|_, _| Ok(()));

        let mut store = store(api, Role::Review, vec![map_row(5, "INREVIEW")]);
        store.change_status(5, MappingStatus::Accepted).await.unwrap();
        assert_eq!(store.state().row(5).unwrap().status(), MappingStatus::Accepted);
    }

    #[tokio::test]
    async fn test_guards_reject_without_io() {
        // No expectations: any API call panics.
        let api = MockMappingApi::new();
        let mut store = store(
            api,
            Role::Review,
            vec![map_row(1, "DRAFT"), map_row(2, "MAPPED")],
        );

        assert!(matches!(
            store.edit_target(2, None, None, None),
            Err(WorkflowError::NotPermitted(_))
        ));
        assert!(matches!(
            store.change_status(1, MappingStatus::Accepted).await,
            Err(WorkflowError::NotPermitted(_))
        ));
        assert!(matches!(
            store.change_status(2, MappingStatus::Draft).await,
            Err(WorkflowError::NotPermitted(_))
        ));
        assert!(matches!(
            store.change_no_map(2, true).await,
            Err(WorkflowError::NotPermitted(_))
        ));
        assert!(matches!(
            store.change_status(42, MappingStatus::Mapped).await,
            Err(WorkflowError::UnknownRow(42))
        ));
    }

    #[tokio::test]
    async fn test_author_cannot_edit_row_in_review() {
        let api = MockMappingApi::new();
        let mut store = store(api, Role::Author, vec![map_row(1, "ACCEPTED")]);
        assert!(matches!(
            store.edit_target(1, Some("1".to_string()), None, None),
            Err(WorkflowError::NotPermitted(_))
        ));
        assert!(matches!(
            store.toggle_flag(1).await,
            Err(WorkflowError::NotPermitted(_))
        ));
    }

    #[tokio::test]
    async fn test_toggle_flag_saves_existing_target() {
        let mut api = MockMappingApi::new();
        api.expect_update_target()
            .withf(|t: &TargetRow| t.flagged && t.id == Some(50))
            .times(1)
            .returning(|t| Ok(t.clone()));

        let mut row = map_row(8, "INREVIEW");
        row.target_id = Some(50);
        row.target_code = Some("123".to_string());
        let mut store = store(api, Role::Review, vec![row]);
        store.toggle_flag(8).await.unwrap();

        let row = store.state().row(8).unwrap();
        assert!(row.committed().flagged);
        assert_eq!(row.status(), MappingStatus::InReview);
    }

    #[tokio::test]
    async fn test_load_page_failure_raises_notification() {
        let mut api = MockMappingApi::new();
        api.expect_task_view()
            .returning(|_, _| Err(ApiError::from_status(503, "")));

        let mut store = store(api, Role::Author, vec![]);
        assert!(store.load_page().await.is_err());
        assert!(!store.state().loading);
        assert_eq!(store.state().notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_bulk_update_checks_role() {
        let api = MockMappingApi::new();
        let mut store = store(api, Role::Author, vec![]);
        let update = BulkUpdate {
            status: Some(MappingStatus::Accepted),
            ..Default::default()
        };
        assert!(matches!(
            store.bulk_update(&update).await,
            Err(WorkflowError::NotPermitted(_))
        ));
    }
}
