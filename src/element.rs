//! Drawing elements and the per-room element log.
//!
//! DESIGN
//! ======
//! An `Element` is one drawing primitive, wire-compatible with the web
//! client (camelCase fields, `type` tag). The `ElementLog` is the room's
//! canonical content: insertion-ordered, uniquely keyed by element id.
//! Updates replace the whole record; there is no field-level merge.

use serde::{Deserialize, Serialize};

// =============================================================================
// ELEMENT
// =============================================================================

/// A point on the drawing surface. Used for freehand stroke paths.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// The closed set of drawing primitives the client can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Pencil,
    Rectangle,
    Circle,
    Arrow,
    Text,
}

/// One drawing primitive. Identity is `id`; two elements never share an
/// id within a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Element {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f64>,
    /// Stroke path, pencil only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<Vec<Point>>,
    pub color: String,
    pub stroke_width: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
}

// =============================================================================
// ELEMENT LOG
// =============================================================================

/// Insertion-ordered collection of elements with unique ids.
///
/// Rooms stay small (a handful of users drawing by hand), so lookups are
/// linear scans over the backing `Vec`, which also preserves z-order for
/// resyncs.
#[derive(Debug, Clone, Default)]
pub struct ElementLog {
    entries: Vec<Element>,
}

impl ElementLog {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Build a log from a stored snapshot. Duplicate ids collapse to the
    /// last occurrence so the unique-id invariant holds even for a
    /// corrupt seed.
    #[must_use]
    pub fn from_snapshot(elements: Vec<Element>) -> Self {
        let mut log = Self::new();
        for element in elements {
            log.upsert(element);
        }
        log
    }

    /// Insert an element. If the id is already present the existing
    /// record is replaced in place (last writer wins); a duplicate entry
    /// is never appended. Returns `true` when the element was new.
    pub fn upsert(&mut self, element: Element) -> bool {
        match self.position(&element.id) {
            Some(index) => {
                self.entries[index] = element;
                false
            }
            None => {
                self.entries.push(element);
                true
            }
        }
    }

    /// Replace the record with a matching id. Returns `false` (and leaves
    /// the log untouched) when the id is absent.
    pub fn replace(&mut self, element: Element) -> bool {
        match self.position(&element.id) {
            Some(index) => {
                self.entries[index] = element;
                true
            }
            None => false,
        }
    }

    /// Remove the record with a matching id. Returns `false` when the id
    /// is absent.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.position(id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Element> {
        self.position(id).map(|index| &self.entries[index])
    }

    /// Ordered copy of the full log, as sent in `elements:sync`.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Element> {
        self.entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }
}

// =============================================================================
// TESTS
// =============================================================================
