//! Data models for Marginalia
//!
//! Defines the annotation record and the per-document collection that is the
//! unit of storage. Field names are serialized in camelCase so the files stay
//! readable by other tooling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current on-disk schema version for [`DocumentAnnotations`]
pub const SCHEMA_VERSION: u32 = 1;

/// Kind of markup an annotation represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    Highlight,
    Underline,
    Strikethrough,
    Note,
}

/// RGBA color with channels in `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f64,
    pub g: f64,
    pub b: f64,
    pub a: f64,
}

impl Color {
    pub fn new(r: f64, g: f64, b: f64, a: f64) -> Self {
        Self { r, g, b, a }
    }

    /// Build a color from byte channels
    pub fn from_rgba8(r: u8, g: u8, b: u8, a: u8) -> Self {
        let channel = |v: u8| f64::from(v) / 255.0;
        Self::new(channel(r), channel(g), channel(b), channel(a))
    }

    fn channels(&self) -> [f64; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// A point in page-local coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in page-local coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// A single piece of user markup on a page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnotationRecord {
    /// Unique identifier, used for upsert and delete matching
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: AnnotationKind,
    pub color: Color,
    pub bounds: Rect,
    /// Zero-based page the annotation belongs to
    pub page_index: u32,
    /// Plain-text snapshot of the annotated content
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Exact render geometry for underline-style records (four points)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quadrilateral_points: Option<Vec<Point>>,
    pub created_at: DateTime<Utc>,
}

impl AnnotationRecord {
    /// Create a new record with a fresh id and creation time
    pub fn new(kind: AnnotationKind, page_index: u32, bounds: Rect, color: Color) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            color,
            bounds,
            page_index,
            text: None,
            quadrilateral_points: None,
            created_at: Utc::now(),
        }
    }

    /// Attach a text snapshot
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attach quadrilateral render geometry
    pub fn with_quadrilateral(mut self, points: [Point; 4]) -> Self {
        self.quadrilateral_points = Some(points.to_vec());
        self
    }

    /// Check the geometric and color invariants of the record
    ///
    /// Returns a description of the first violated invariant.
    pub fn validate(&self) -> Result<(), String> {
        let b = &self.bounds;
        if ![b.x, b.y, b.width, b.height].iter().all(|v| v.is_finite()) {
            return Err("bounds must be finite".to_string());
        }
        if b.width < 0.0 || b.height < 0.0 {
            return Err(format!(
                "bounds must have non-negative size, got {}x{}",
                b.width, b.height
            ));
        }
        if !self
            .color
            .channels()
            .iter()
            .all(|c| c.is_finite() && (0.0..=1.0).contains(c))
        {
            return Err("color channels must be within [0, 1]".to_string());
        }
        if let Some(points) = &self.quadrilateral_points {
            if points.len() != 4 {
                return Err(format!(
                    "quadrilateral needs exactly 4 points, got {}",
                    points.len()
                ));
            }
            if !points.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
                return Err("quadrilateral points must be finite".to_string());
            }
        }
        Ok(())
    }
}

/// All annotations stored for one document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentAnnotations {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Identity key of the owning document
    pub document_key: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub annotations: Vec<AnnotationRecord>,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

impl DocumentAnnotations {
    /// Create an empty collection for a document key
    pub fn new(document_key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            document_key: document_key.into(),
            display_name: display_name.into(),
            updated_at: None,
            annotations: Vec::new(),
        }
    }

    /// Insert a record, or replace the one with the same id in place
    pub fn upsert(&mut self, record: AnnotationRecord) {
        match self.annotations.iter_mut().find(|a| a.id == record.id) {
            Some(existing) => *existing = record,
            None => self.annotations.push(record),
        }
    }

    /// Remove a record by id, returning it if it was present
    pub fn remove(&mut self, id: Uuid) -> Option<AnnotationRecord> {
        let pos = self.annotations.iter().position(|a| a.id == id)?;
        Some(self.annotations.remove(pos))
    }

    pub fn get(&self, id: Uuid) -> Option<&AnnotationRecord> {
        self.annotations.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }

    /// Split records into those valid for a document with `page_count`
    /// pages and those pointing past its last page
    pub fn partition_by_page_count(
        &self,
        page_count: u32,
    ) -> (Vec<AnnotationRecord>, Vec<AnnotationRecord>) {
        self.annotations
            .iter()
            .cloned()
            .partition(|a| a.page_index < page_count)
    }
}
