//! Filter sets and the local predicate engine.
//!
//! [`CardFilter::matches`] is the reference semantics for a [`FilterSpec`];
//! the remote translator in [`crate::search::translate`] mirrors it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::{CrossoverConfig, UB_OTHER_KEY};
use crate::model::types::{CardRecord, ColorSet};

pub const INCLUDE_ALCHEMY: &str = "include_alchemy";
pub const INCLUDE_SILVER: &str = "include_silver";
pub const INCLUDE_PLAYTEST: &str = "include_playtest";
pub const INCLUDE_OVERSIZED: &str = "include_oversized";
pub const INCLUDE_FUNNY: &str = "include_funny";

/// Named boolean toggles.
///
/// `include_*` keys default to `false` (category excluded); crossover keys
/// default to `true` (category included).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchPrefs(BTreeMap<String, bool>);

impl SearchPrefs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: bool) -> Self {
        self.set(key, value);
        self
    }

    pub fn set(&mut self, key: &str, value: bool) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.0.get(key).copied()
    }

    /// Whether an `include_*` category is allowed. Missing means no.
    pub fn include(&self, key: &str) -> bool {
        self.get(key).unwrap_or(false)
    }

    /// Whether a crossover group (or `ub_other`) is allowed. Missing means yes.
    pub fn crossover_enabled(&self, key: &str) -> bool {
        self.get(key).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commander_identity: Option<ColorSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<ColorSet>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub card_type: Option<String>,
    /// Comma-separated subtype terms, all required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Comparator expression such as `>=3`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cmc: Option<String>,
    /// Whitespace-separated oracle keywords, all required.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub prefs: SearchPrefs,
}

impl FilterSpec {
    /// Type filter, `None` when absent or blank.
    pub fn type_term(&self) -> Option<&str> {
        self.card_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    pub fn subtype_terms(&self) -> Vec<&str> {
        self.subtype
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn text_keywords(&self) -> Vec<&str> {
        self.text
            .as_deref()
            .map(|t| t.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Intersection of `commander_identity` and `colors`, whichever are set.
    pub fn allowed_colors(&self) -> Option<ColorSet> {
        match (&self.commander_identity, &self.colors) {
            (Some(cmd), Some(sel)) => Some(cmd.intersection(sel).copied().collect()),
            (Some(only), None) | (None, Some(only)) => Some(only.clone()),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    pub fn symbol(self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        }
    }
}

/// Parsed mana value comparator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManaValueFilter {
    pub op: Comparison,
    pub value: f64,
}

impl ManaValueFilter {
    /// Parse `>=3`, `<2.5`, `=4`, `4`, ... Returns `None` for anything else.
    pub fn parse(expr: &str) -> Option<Self> {
        let expr = expr.trim();
        // two-character operators first so ">=" is not read as ">" + "=3"
        let (op, rest) = [
            (">=", Comparison::Ge),
            ("<=", Comparison::Le),
            (">", Comparison::Gt),
            ("<", Comparison::Lt),
            ("=", Comparison::Eq),
        ]
        .into_iter()
        .find_map(|(prefix, op)| expr.strip_prefix(prefix).map(|rest| (op, rest)))
        .unwrap_or((Comparison::Eq, expr));

        let value: f64 = rest.trim().parse().ok()?;
        value.is_finite().then_some(Self { op, value })
    }

    pub fn matches(&self, cmc: f64) -> bool {
        match self.op {
            Comparison::Eq => (cmc - self.value).abs() < f64::EPSILON,
            Comparison::Lt => cmc < self.value,
            Comparison::Le => cmc <= self.value,
            Comparison::Gt => cmc > self.value,
            Comparison::Ge => cmc >= self.value,
        }
    }
}

/// The first rule that excluded a card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    CommanderIdentity,
    Colors,
    Type,
    Subtype(String),
    ManaValue,
    Text(String),
    NotPaper,
    SilverBorder,
    Playtest,
    Oversized,
    Funny,
    Crossover(String),
    OtherCrossover,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::CommanderIdentity => write!(f, "outside commander identity"),
            Rejection::Colors => write!(f, "outside selected colors"),
            Rejection::Type => write!(f, "type mismatch"),
            Rejection::Subtype(term) => write!(f, "missing subtype '{term}'"),
            Rejection::ManaValue => write!(f, "mana value out of range"),
            Rejection::Text(word) => write!(f, "oracle text lacks '{word}'"),
            Rejection::NotPaper => write!(f, "not available in paper"),
            Rejection::SilverBorder => write!(f, "silver border"),
            Rejection::Playtest => write!(f, "playtest card"),
            Rejection::Oversized => write!(f, "oversized"),
            Rejection::Funny => write!(f, "un-set"),
            Rejection::Crossover(key) => write!(f, "crossover group '{key}' excluded"),
            Rejection::OtherCrossover => write!(f, "other crossover excluded"),
        }
    }
}

/// Local predicate engine. Holds the crossover table it classifies against.
#[derive(Debug, Clone)]
pub struct CardFilter {
    crossover: Arc<CrossoverConfig>,
}

impl CardFilter {
    pub fn new(crossover: Arc<CrossoverConfig>) -> Self {
        Self { crossover }
    }

    pub fn crossover(&self) -> &CrossoverConfig {
        &self.crossover
    }

    pub fn matches(&self, card: &CardRecord, spec: &FilterSpec) -> bool {
        self.check(card, spec).is_ok()
    }

    /// Evaluate every rule in order, stopping at the first rejection.
    pub fn check(&self, card: &CardRecord, spec: &FilterSpec) -> Result<(), Rejection> {
        if let Some(cmd) = &spec.commander_identity
            && !card.color_identity.is_subset(cmd)
        {
            return Err(Rejection::CommanderIdentity);
        }

        if let Some(colors) = &spec.colors
            && !card.color_identity.is_subset(colors)
        {
            return Err(Rejection::Colors);
        }

        if let Some(t) = spec.type_term()
            && !card.type_line_contains(&t.to_lowercase())
        {
            return Err(Rejection::Type);
        }

        for term in spec.subtype_terms() {
            if !card.type_line_contains(&term.to_lowercase()) {
                return Err(Rejection::Subtype(term.to_string()));
            }
        }

        // unparseable comparators constrain nothing
        if let Some(mv) = spec.cmc.as_deref().and_then(ManaValueFilter::parse)
            && !mv.matches(card.cmc)
        {
            return Err(Rejection::ManaValue);
        }

        let keywords = spec.text_keywords();
        if !keywords.is_empty() {
            let text = card.combined_oracle_text().to_lowercase();
            if let Some(missing) = keywords
                .iter()
                .find(|k| !text.contains(&k.to_lowercase()))
            {
                return Err(Rejection::Text((*missing).to_string()));
            }
        }

        self.check_prefs(card, &spec.prefs)?;
        self.check_crossover(card, &spec.prefs)
    }

    fn check_prefs(&self, card: &CardRecord, prefs: &SearchPrefs) -> Result<(), Rejection> {
        if !prefs.include(INCLUDE_ALCHEMY) && !card.games.iter().any(|g| g == "paper") {
            return Err(Rejection::NotPaper);
        }

        if !prefs.include(INCLUDE_SILVER) && card.border_color.as_deref() == Some("silver") {
            return Err(Rejection::SilverBorder);
        }

        if !prefs.include(INCLUDE_PLAYTEST)
            && (card.set_type.as_deref() == Some("memorabilia")
                || card.promo_types.iter().any(|p| p == "playtest"))
        {
            return Err(Rejection::Playtest);
        }

        if !prefs.include(INCLUDE_OVERSIZED) && card.oversized {
            return Err(Rejection::Oversized);
        }

        if !prefs.include(INCLUDE_FUNNY) && card.set_type.as_deref() == Some("funny") {
            return Err(Rejection::Funny);
        }

        Ok(())
    }

    fn check_crossover(&self, card: &CardRecord, prefs: &SearchPrefs) -> Result<(), Rejection> {
        let code = card.set_code();
        let group = self.crossover.group_for_set(&code);

        if let Some(group) = group {
            if !prefs.crossover_enabled(&group.key) {
                return Err(Rejection::Crossover(group.key.clone()));
            }
            return Ok(());
        }

        let stamped = card.security_stamp.as_deref() == Some("triangle");
        if stamped && !prefs.crossover_enabled(UB_OTHER_KEY) {
            return Err(Rejection::OtherCrossover);
        }
        Ok(())
    }
}
