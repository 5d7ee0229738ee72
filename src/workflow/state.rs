// Application state and the pure reducer that advances it.

use tracing::{debug, warn};

use crate::api::Notification;
use crate::automap::{AutomapProgress, AutomapReport};
use crate::mapping::{
    MapRow, MapViewFilter, MappingRowView, MappingStatus, PageInfo, Relationship, RowSnapshot,
    Role, TargetRow,
};

/// Where the rows on screen come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewSource {
    Map(u64),
    Task { map_id: u64, task_id: u64 },
}

impl ViewSource {
    pub fn map_id(&self) -> u64 {
        match self {
            ViewSource::Map(map_id) => *map_id,
            ViewSource::Task { map_id, .. } => *map_id,
        }
    }

    pub fn task_id(&self) -> Option<u64> {
        match self {
            ViewSource::Map(_) => None,
            ViewSource::Task { task_id, .. } => Some(*task_id),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AutomapState {
    #[default]
    Idle,
    Running(AutomapProgress),
    Finished(AutomapReport),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppState {
    pub source: ViewSource,
    /// Role of the current task; None when browsing the whole map.
    pub role: Option<Role>,
    pub filter: MapViewFilter,
    pub rows: Vec<MappingRowView>,
    pub page: PageInfo,
    pub loading: bool,
    pub notifications: Vec<Notification>,
    pub automap: AutomapState,
}

impl AppState {
    pub fn new(source: ViewSource, role: Option<Role>) -> Self {
        Self {
            source,
            role,
            filter: MapViewFilter::default(),
            rows: Vec::new(),
            page: PageInfo::default(),
            loading: false,
            notifications: Vec::new(),
            automap: AutomapState::Idle,
        }
    }

    pub fn row(&self, row_id: u64) -> Option<&MappingRowView> {
        self.rows.iter().find(|r| r.row_id == row_id)
    }

    fn row_mut(&mut self, row_id: u64) -> Option<&mut MappingRowView> {
        let row = self.rows.iter_mut().find(|r| r.row_id == row_id);
        if row.is_none() {
            debug!(row_id, "Event for a row that is not loaded");
        }
        row
    }

    pub fn unsaved_rows(&self) -> impl Iterator<Item = &MappingRowView> {
        self.rows.iter().filter(|r| r.has_changed())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    FilterChanged(MapViewFilter),
    PageRequested,
    PageLoaded {
        rows: Vec<MapRow>,
        page: PageInfo,
    },
    PageFailed(Notification),
    /// Live edit of target fields, not yet saved.
    TargetEdited {
        row_id: u64,
        target_code: Option<String>,
        target_display: Option<String>,
        relationship: Option<Relationship>,
    },
    /// Live edit of status or flag ahead of a save.
    StatusEdited {
        row_id: u64,
        status: MappingStatus,
    },
    FlagEdited {
        row_id: u64,
        flagged: bool,
    },
    TargetSaved(TargetRow),
    StatusSaved {
        row_id: u64,
        status: MappingStatus,
    },
    NoMapSaved {
        row_id: u64,
        no_map: bool,
    },
    /// Optimistic commit to undo: restores `previous` into both copies.
    RowReverted {
        row_id: u64,
        previous: RowSnapshot,
        notification: Notification,
    },
    /// Save failed: discard live edits.
    RowSaveFailed {
        row_id: u64,
        notification: Notification,
    },
    /// Target was saved but the status was not. Live edits stay so the status
    /// is sent again on the next save.
    StatusSaveDeferred {
        row_id: u64,
        notification: Notification,
    },
    NotificationDismissed(usize),
    AutomapStarted {
        total: usize,
    },
    AutomapProgressed(AutomapProgress),
    AutomapFinished(AutomapReport),
}

/// Apply one event. No I/O happens here.
pub fn reduce(state: &mut AppState, event: AppEvent) {
    match event {
        AppEvent::FilterChanged(filter) => {
            state.filter = filter;
        }
        AppEvent::PageRequested => {
            state.loading = true;
        }
        AppEvent::PageLoaded { rows, page } => {
            state.loading = false;
            state.page = page;
            state.rows.clear();
            for row in rows {
                let row_id = row.row_id;
                match MappingRowView::try_from(row) {
                    Ok(view) => state.rows.push(view),
                    Err(e) => {
                        warn!(row_id, error = %e, "Dropping row with unknown status");
                    }
                }
            }
        }
        AppEvent::PageFailed(notification) => {
            state.loading = false;
            state.notifications.push(notification);
        }
        AppEvent::TargetEdited {
            row_id,
            target_code,
            target_display,
            relationship,
        } => {
            if let Some(row) = state.row_mut(row_id) {
                row.live.target_code = target_code;
                row.live.target_display = target_display;
                row.live.relationship = relationship;
            }
        }
        AppEvent::StatusEdited { row_id, status } => {
            if let Some(row) = state.row_mut(row_id) {
                row.live.status = status;
            }
        }
        AppEvent::FlagEdited { row_id, flagged } => {
            if let Some(row) = state.row_mut(row_id) {
                row.live.flagged = flagged;
            }
        }
        AppEvent::TargetSaved(target) => {
            if let Some(row) = state.row_mut(target.row_id) {
                row.update_from_target(&target);
            }
        }
        AppEvent::StatusSaved { row_id, status } => {
            if let Some(row) = state.row_mut(row_id) {
                row.update_status(status);
            }
        }
        AppEvent::NoMapSaved { row_id, no_map } => {
            if let Some(row) = state.row_mut(row_id) {
                row.update_no_map(no_map);
            }
        }
        AppEvent::RowReverted {
            row_id,
            previous,
            notification,
        } => {
            if let Some(row) = state.row_mut(row_id) {
                row.restore(previous);
            }
            state.notifications.push(notification);
        }
        AppEvent::RowSaveFailed {
            row_id,
            notification,
        } => {
            if let Some(row) = state.row_mut(row_id) {
                row.reset();
            }
            state.notifications.push(notification);
        }
        AppEvent::StatusSaveDeferred {
            row_id,
            notification,
        } => {
            if let Some(row) = state.row(row_id) {
                debug!(row_id, pending = ?row.diff(), "Status left unsaved");
            }
            state.notifications.push(notification);
        }
        AppEvent::NotificationDismissed(index) => {
            if index < state.notifications.len() {
                state.notifications.remove(index);
            }
        }
        AppEvent::AutomapStarted { total } => {
            state.automap = AutomapState::Running(AutomapProgress {
                processed: 0,
                total,
            });
        }
        AppEvent::AutomapProgressed(progress) => {
            state.automap = AutomapState::Running(progress);
        }
        AppEvent::AutomapFinished(report) => {
            for target in &report.saved {
                if let Some(row) = state.row_mut(target.row_id) {
                    row.update_from_target(target);
                    row.update_status(MappingStatus::Draft);
                }
            }
            // Target is on the server but the status is not; leave DRAFT as
            // an unsaved edit so the next save sends it.
            for target in &report.pending_status {
                if let Some(row) = state.row_mut(target.row_id) {
                    row.update_from_target(target);
                    row.live.status = MappingStatus::Draft;
                }
            }
            state.automap = AutomapState::Finished(report);
        }
    }
}
