// Editable view of a mapping row with a committed snapshot for rollback.

use super::status::{MappingStatus, ParseEnumError};
use super::types::{MapRow, Relationship, TargetRow};

/// Mutable part of a row. Kept twice: what the curator sees and what the
/// backend last confirmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowSnapshot {
    pub target_code: Option<String>,
    pub target_display: Option<String>,
    pub relationship: Option<Relationship>,
    pub status: MappingStatus,
    pub no_map: bool,
    pub flagged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowField {
    TargetCode,
    TargetDisplay,
    Relationship,
    Status,
    NoMap,
    Flagged,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MappingRowView {
    pub row_id: u64,
    pub target_id: Option<u64>,
    pub source_index: u64,
    pub source_code: String,
    pub source_display: String,
    pub live: RowSnapshot,
    committed: RowSnapshot,
}

impl TryFrom<MapRow> for MappingRowView {
    type Error = ParseEnumError;

    fn try_from(row: MapRow) -> Result<Self, Self::Error> {
        let status = row.status.parse::<MappingStatus>()?;
        let snapshot = RowSnapshot {
            target_code: row.target_code,
            target_display: row.target_display,
            relationship: row.relationship,
            status,
            no_map: row.no_map,
            flagged: row.flagged,
        };
        Ok(Self {
            row_id: row.row_id,
            target_id: row.target_id,
            source_index: row.source_index,
            source_code: row.source_code,
            source_display: row.source_display,
            committed: snapshot.clone(),
            live: snapshot,
        })
    }
}

impl MappingRowView {
    pub fn committed(&self) -> &RowSnapshot {
        &self.committed
    }

    pub fn status(&self) -> MappingStatus {
        self.live.status
    }

    /// Status changes are persisted on their own; the commit happens up front
    /// and a failed save is undone with [`MappingRowView::restore`] from the
    /// previous snapshot held by the caller.
    pub fn update_status(&mut self, status: MappingStatus) {
        self.live.status = status;
        self.committed.status = status;
    }

    pub fn update_no_map(&mut self, no_map: bool) {
        self.live.no_map = no_map;
        self.committed.no_map = no_map;
    }

    /// Apply a target the backend has accepted.
    pub fn update_from_target(&mut self, target: &TargetRow) {
        self.target_id = target.id;
        self.live.target_code = target.target_code.clone();
        self.live.target_display = target.target_display.clone();
        self.live.relationship = target.relationship;
        self.live.flagged = target.flagged;
        self.committed.target_code = target.target_code.clone();
        self.committed.target_display = target.target_display.clone();
        self.committed.relationship = target.relationship;
        self.committed.flagged = target.flagged;
    }

    pub fn reset(&mut self) {
        self.live = self.committed.clone();
    }

    /// Restore both copies, used when an optimistic commit must be undone.
    pub fn restore(&mut self, snapshot: RowSnapshot) {
        self.committed = snapshot.clone();
        self.live = snapshot;
    }

    pub fn diff(&self) -> Vec<RowField> {
        let live = &self.live;
        let committed = &self.committed;
        let mut changed = Vec::new();
        if live.target_code != committed.target_code {
            changed.push(RowField::TargetCode);
        }
        if live.target_display != committed.target_display {
            changed.push(RowField::TargetDisplay);
        }
        if live.relationship != committed.relationship {
            changed.push(RowField::Relationship);
        }
        if live.status != committed.status {
            changed.push(RowField::Status);
        }
        if live.no_map != committed.no_map {
            changed.push(RowField::NoMap);
        }
        if live.flagged != committed.flagged {
            changed.push(RowField::Flagged);
        }
        changed
    }

    pub fn has_changed(&self) -> bool {
        self.live != self.committed
    }

    /// Decides whether a target edit has to send the row back to DRAFT.
    pub fn has_target_or_relationship_changed(&self) -> bool {
        self.live.target_code != self.committed.target_code
            || self.live.target_display != self.committed.target_display
            || self.live.relationship != self.committed.relationship
    }

    pub fn has_no_map_changed(&self) -> bool {
        self.live.no_map != self.committed.no_map
    }

    /// Target payload for the current live values.
    pub fn to_target_row(&self) -> TargetRow {
        TargetRow {
            id: self.target_id,
            row_id: self.row_id,
            target_code: self.live.target_code.clone(),
            target_display: self.live.target_display.clone(),
            relationship: self.live.relationship,
            flagged: self.live.flagged,
        }
    }
}
