// Typed payloads exchanged with the mapping REST API

use super::status::{MappingStatus, ParseEnumError, Role};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Relationship {
    Equivalent,
    Broader,
    Narrower,
    Inexact,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Equivalent => "EQUIVALENT",
            Relationship::Broader => "BROADER",
            Relationship::Narrower => "NARROWER",
            Relationship::Inexact => "INEXACT",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EQUIVALENT" => Ok(Relationship::Equivalent),
            "BROADER" => Ok(Relationship::Broader),
            "NARROWER" => Ok(Relationship::Narrower),
            "INEXACT" => Ok(Relationship::Inexact),
            _ => Err(ParseEnumError {
                kind: "relationship",
                value: s.to_string(),
            }),
        }
    }
}

/// One row of the map view as returned by the backend.
///
/// `status` stays a raw string here; it is parsed when the row is turned into
/// a [`crate::mapping::MappingRowView`] so unknown values are rejected at the
/// boundary instead of deep inside the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapRow {
    pub row_id: u64,
    pub source_index: u64,
    pub source_code: String,
    pub source_display: String,
    #[serde(default)]
    pub no_map: bool,
    pub target_id: Option<u64>,
    pub target_code: Option<String>,
    pub target_display: Option<String>,
    pub relationship: Option<Relationship>,
    pub status: String,
    #[serde(default)]
    pub flagged: bool,
    pub latest_note: Option<String>,
    pub assigned_author: Option<String>,
    pub assigned_reviewer: Option<String>,
    pub last_author: Option<String>,
    pub last_reviewer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    pub row_id: u64,
    pub target_code: Option<String>,
    pub target_display: Option<String>,
    pub relationship: Option<Relationship>,
    #[serde(default)]
    pub flagged: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub size: u32,
    pub number: u32,
    pub total_elements: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub content: Vec<T>,
    #[serde(default)]
    pub page: PageInfo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,
    pub direction: SortDirection,
}

/// Server-side paging, sorting and filtering for map and task views.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapViewFilter {
    pub page: u32,
    pub size: u32,
    pub sort: Option<Sort>,
    pub source_code: Option<String>,
    pub source_display: Option<String>,
    pub target_code: Option<String>,
    pub target_display: Option<String>,
    pub relationship: Vec<Relationship>,
    pub status: Vec<MappingStatus>,
    pub no_map: Option<bool>,
    pub flagged: Option<bool>,
    pub assigned_author: Vec<String>,
    pub assigned_reviewer: Vec<String>,
}

impl Default for MapViewFilter {
    fn default() -> Self {
        Self {
            page: 0,
            size: 20,
            sort: None,
            source_code: None,
            source_display: None,
            target_code: None,
            target_display: None,
            relationship: Vec::new(),
            status: Vec::new(),
            no_map: None,
            flagged: None,
            assigned_author: Vec::new(),
            assigned_reviewer: Vec::new(),
        }
    }
}

impl MapViewFilter {
    /// Query parameters in the order the backend documents them. Multi-valued
    /// filters repeat the key; empty filters are left out.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query = vec![
            ("page".to_string(), self.page.to_string()),
            ("size".to_string(), self.size.to_string()),
        ];

        if let Some(sort) = &self.sort {
            let direction = match sort.direction {
                SortDirection::Asc => "asc",
                SortDirection::Desc => "desc",
            };
            query.push(("sort".to_string(), format!("{},{}", sort.field, direction)));
        }

        let text_filters = [
            ("sourceCode", &self.source_code),
            ("sourceDisplay", &self.source_display),
            ("targetCode", &self.target_code),
            ("targetDisplay", &self.target_display),
        ];
        for (key, value) in text_filters {
            if let Some(value) = value.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
                query.push((key.to_string(), value.to_string()));
            }
        }

        query.extend(
            self.relationship
                .iter()
                .map(|r| ("relationship".to_string(), r.to_string())),
        );
        query.extend(
            self.status
                .iter()
                .map(|s| ("status".to_string(), s.to_string())),
        );
        if let Some(no_map) = self.no_map {
            query.push(("noMap".to_string(), no_map.to_string()));
        }
        if let Some(flagged) = self.flagged {
            query.push(("flagged".to_string(), flagged.to_string()));
        }
        query.extend(
            self.assigned_author
                .iter()
                .map(|a| ("assignedAuthor".to_string(), a.clone())),
        );
        query.extend(
            self.assigned_reviewer
                .iter()
                .map(|r| ("assignedReviewer".to_string(), r.clone())),
        );
        query
    }
}

/// Fields a bulk update may set on every row matching a filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<MappingStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_map: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship: Option<Relationship>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flagged: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkUpdateResult {
    pub rows_updated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Tsv,
    Xlsx,
}

impl ExportFormat {
    pub fn accept_header(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Tsv => "text/tab-separated-values",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "tsv" => Ok(ExportFormat::Tsv),
            "xlsx" => Ok(ExportFormat::Xlsx),
            _ => Err(ParseEnumError {
                kind: "export format",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mapping {
    pub id: u64,
    pub project_id: u64,
    pub mapping_version: String,
    pub to_version: String,
    pub to_scope: String,
    pub source_id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: u64,
    pub map_id: u64,
    #[serde(rename = "type")]
    pub role: Role,
    pub assignee: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

/// Terminology concept returned by the FHIR-proxied search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub system: Option<String>,
    pub code: String,
    pub display: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_row_decodes_backend_shape() {
        let json = serde_json::json!({
            "rowId": 7,
            "sourceIndex": 3,
            "sourceCode": "A01",
            "sourceDisplay": "Cholera",
            "noMap": false,
            "targetId": null,
            "status": "UNMAPPED",
            "flagged": false
        });
        let row: MapRow = serde_json::from_value(json).unwrap();
        assert_eq!(row.row_id, 7);
        assert_eq!(row.target_code, None);
        assert_eq!(row.status, "UNMAPPED");
    }

    #[test]
    fn test_default_filter_only_pages() {
        let query = MapViewFilter::default().to_query();
        assert_eq!(
            query,
            vec![
                ("page".to_string(), "0".to_string()),
                ("size".to_string(), "20".to_string()),
            ]
        );
    }

    #[test]
    fn test_filter_repeats_multi_valued_keys() {
        let filter = MapViewFilter {
            sort: Some(Sort {
                field: "sourceCode".to_string(),
                direction: SortDirection::Desc,
            }),
            source_code: Some("  ".to_string()),
            target_display: Some("fever".to_string()),
            status: vec![MappingStatus::Draft, MappingStatus::Mapped],
            flagged: Some(true),
            ..Default::default()
        };
        let query = filter.to_query();
        assert!(query.contains(&("sort".to_string(), "sourceCode,desc".to_string())));
        assert!(query.contains(&("targetDisplay".to_string(), "fever".to_string())));
        assert!(!query.iter().any(|(k, _)| k == "sourceCode"));
        let statuses: Vec<_> = query.iter().filter(|(k, _)| k == "status").collect();
        assert_eq!(statuses.len(), 2);
        assert!(query.contains(&("flagged".to_string(), "true".to_string())));
    }

    #[test]
    fn test_bulk_update_omits_unset_fields() {
        let update = BulkUpdate {
            status: Some(MappingStatus::Mapped),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            serde_json::json!({"status": "MAPPED"})
        );
    }
}
