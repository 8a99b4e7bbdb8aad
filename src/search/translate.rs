//! Translate a [`FilterSpec`] into the remote search dialect.
//!
//! Each rule of [`crate::search::filter::CardFilter`] maps to one or more
//! query terms so both search paths agree on what a filter set admits.

use std::sync::Arc;

use crate::config::{CrossoverConfig, UB_OTHER_KEY};
use crate::search::filter::{
    Comparison, FilterSpec, INCLUDE_ALCHEMY, INCLUDE_FUNNY, INCLUDE_OVERSIZED, INCLUDE_PLAYTEST,
    INCLUDE_SILVER, ManaValueFilter, SearchPrefs,
};

#[derive(Debug, Clone)]
pub struct QueryTranslator {
    crossover: Arc<CrossoverConfig>,
}

impl QueryTranslator {
    pub fn new(crossover: Arc<CrossoverConfig>) -> Self {
        Self { crossover }
    }

    /// Build the full query string: the caller's raw text, the token
    /// exclusion, then one term per active constraint, space-joined.
    pub fn translate(&self, raw_query: &str, spec: &FilterSpec) -> String {
        let mut parts: Vec<String> = Vec::new();

        let raw = raw_query.trim();
        if !raw.is_empty() {
            parts.push(raw.to_string());
        }
        parts.push("-type:token".to_string());

        if let Some(allowed) = spec.allowed_colors() {
            if allowed.is_empty() {
                parts.push("id:c".to_string());
            } else {
                let colors: String = allowed
                    .iter()
                    .map(|c| c.symbol().to_ascii_lowercase())
                    .collect();
                parts.push(format!("id<={colors}"));
            }
        }

        if let Some(t) = spec.type_term() {
            parts.push(format!("t:{}", quote_term(t)));
        }
        for term in spec.subtype_terms() {
            parts.push(format!("t:{}", quote_term(term)));
        }

        if let Some(mv) = spec.cmc.as_deref().and_then(ManaValueFilter::parse) {
            parts.push(mana_value_term(&mv));
        }

        for word in spec.text_keywords() {
            parts.push(format!("o:{}", quote_term(word)));
        }

        push_preference_terms(&spec.prefs, &mut parts);
        self.push_crossover_terms(&spec.prefs, &mut parts);

        parts.join(" ")
    }

    fn push_crossover_terms(&self, prefs: &SearchPrefs, parts: &mut Vec<String>) {
        let groups = self.crossover.groups();
        let other_enabled = prefs.crossover_enabled(UB_OTHER_KEY);
        let any_enabled = other_enabled || groups.iter().any(|g| prefs.crossover_enabled(&g.key));

        if !any_enabled {
            parts.push("-is:ub".to_string());
            return;
        }

        let exclusions: Vec<String> = groups
            .iter()
            .filter(|g| !prefs.crossover_enabled(&g.key))
            .map(|g| format!("({})", set_disjunction(g.sets.iter().map(String::as_str))))
            .collect();
        if !exclusions.is_empty() {
            parts.push(format!("-({})", exclusions.join(" or ")));
        }

        // reaching here with `ub_other` off implies at least one group exists
        if !other_enabled {
            let known = set_disjunction(self.crossover.all_sets());
            parts.push(format!("-(is:ub -({known}))"));
        }
    }
}

fn push_preference_terms(prefs: &SearchPrefs, parts: &mut Vec<String>) {
    if !prefs.include(INCLUDE_ALCHEMY) {
        parts.push("game:paper".to_string());
    }
    if !prefs.include(INCLUDE_SILVER) {
        parts.push("-border:silver".to_string());
    }
    if !prefs.include(INCLUDE_PLAYTEST) {
        parts.push("-is:playtest".to_string());
    }
    if !prefs.include(INCLUDE_OVERSIZED) {
        parts.push("-is:oversized".to_string());
    }
    if !prefs.include(INCLUDE_FUNNY) {
        parts.push("-is:funny".to_string());
    }
}

fn set_disjunction<'a>(codes: impl Iterator<Item = &'a str>) -> String {
    codes
        .map(|c| format!("set:{c}"))
        .collect::<Vec<_>>()
        .join(" or ")
}

/// Equality renders as `mv:N`; the remote grammar spells the rest `mv>=N`.
fn mana_value_term(mv: &ManaValueFilter) -> String {
    let value = mv.value;
    match mv.op {
        Comparison::Eq => format!("mv:{value}"),
        op => format!("mv{}{value}", op.symbol()),
    }
}

/// Multi-word values (e.g. a type of "Legendary Creature") need quoting to
/// stay a single term.
fn quote_term(term: &str) -> String {
    if term.chars().any(char::is_whitespace) {
        format!("\"{}\"", term.replace('"', ""))
    } else {
        term.to_string()
    }
}
