//! Normalized card entity structs.
//!
//! Records mirror the remote service's JSON card objects. Fields the filters
//! do not look at are kept in `extra` so a stored record round-trips intact.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// One of the five mana colors, ordered W, U, B, R, G.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Color {
    #[serde(rename = "W")]
    White,
    #[serde(rename = "U")]
    Blue,
    #[serde(rename = "B")]
    Black,
    #[serde(rename = "R")]
    Red,
    #[serde(rename = "G")]
    Green,
}

impl Color {
    pub const ALL: [Color; 5] = [
        Color::White,
        Color::Blue,
        Color::Black,
        Color::Red,
        Color::Green,
    ];

    /// Parse a single color symbol, case-insensitive.
    pub fn from_symbol(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'W' => Some(Color::White),
            'U' => Some(Color::Blue),
            'B' => Some(Color::Black),
            'R' => Some(Color::Red),
            'G' => Some(Color::Green),
            _ => None,
        }
    }

    pub fn symbol(self) -> char {
        match self {
            Color::White => 'W',
            Color::Blue => 'U',
            Color::Black => 'B',
            Color::Red => 'R',
            Color::Green => 'G',
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.symbol())
    }
}

pub type ColorSet = BTreeSet<Color>;

/// Parse a compact color string such as `"wub"` into a set.
///
/// Returns `None` if any character is not a color symbol. `"c"` (colorless)
/// and the empty string both yield the empty set.
pub fn parse_colors(input: &str) -> Option<ColorSet> {
    let trimmed = input.trim();
    if trimmed.eq_ignore_ascii_case("c") {
        return Some(ColorSet::new());
    }
    trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ',')
        .map(Color::from_symbol)
        .collect()
}

/// Image URIs as published by the remote service. Only the sizes the
/// presentation layer asks for are named; the rest stay in `extra`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ImageUris {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One printed side of a multi-sided card.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CardFace {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana_cost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uris: Option<ImageUris>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CardRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_line: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mana_cost: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_uris: Option<ImageUris>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_faces: Option<Vec<CardFace>>,
    #[serde(default)]
    pub color_identity: ColorSet,
    #[serde(default)]
    pub cmc: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub games: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub promo_types: Vec<String>,
    #[serde(default)]
    pub oversized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_stamp: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub legalities: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Borrowed view over the two record shapes.
#[derive(Debug, Clone, Copy)]
pub enum CardShape<'a> {
    SingleFace(&'a CardRecord),
    MultiFace(&'a [CardFace]),
}

impl CardRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// A record carrying faces is multi-face even if a combined `type_line`
    /// is also present.
    pub fn shape(&self) -> CardShape<'_> {
        match self.card_faces.as_deref() {
            Some(faces) if !faces.is_empty() => CardShape::MultiFace(faces),
            _ => CardShape::SingleFace(self),
        }
    }

    /// The type line stored alongside the payload for token exclusion.
    pub fn projected_type_line(&self) -> &str {
        match self.type_line.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => self
                .card_faces
                .as_deref()
                .and_then(|faces| faces.first())
                .and_then(|f| f.type_line.as_deref())
                .unwrap_or(""),
        }
    }

    /// Case-insensitive containment against any face's type line or the
    /// record's own. `needle` must already be lower-cased.
    pub fn type_line_contains(&self, needle: &str) -> bool {
        let own = self
            .type_line
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(needle));
        match self.shape() {
            CardShape::SingleFace(_) => own,
            CardShape::MultiFace(faces) => {
                own || faces.iter().any(|f| {
                    f.type_line
                        .as_deref()
                        .is_some_and(|t| t.to_lowercase().contains(needle))
                })
            }
        }
    }

    /// Oracle text of a single-face record, or every face's text joined by
    /// a space.
    pub fn combined_oracle_text(&self) -> String {
        match self.shape() {
            CardShape::SingleFace(card) => card.oracle_text.clone().unwrap_or_default(),
            CardShape::MultiFace(faces) => faces
                .iter()
                .map(|f| f.oracle_text.as_deref().unwrap_or(""))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// Lower-cased set code, empty when unknown.
    pub fn set_code(&self) -> String {
        self.set.as_deref().unwrap_or("").to_lowercase()
    }

    /// `normal` and `small` image URLs of the record or of each face.
    pub fn image_urls(&self) -> Vec<&str> {
        fn push<'a>(uris: Option<&'a ImageUris>, out: &mut Vec<&'a str>) {
            if let Some(uris) = uris {
                out.extend(uris.normal.as_deref());
                out.extend(uris.small.as_deref());
            }
        }
        let mut urls = Vec::new();
        if self.image_uris.is_some() {
            push(self.image_uris.as_ref(), &mut urls);
        } else if let CardShape::MultiFace(faces) = self.shape() {
            for face in faces {
                push(face.image_uris.as_ref(), &mut urls);
            }
        }
        urls
    }

    pub fn is_multi_face(&self) -> bool {
        matches!(self.shape(), CardShape::MultiFace(_))
    }
}
