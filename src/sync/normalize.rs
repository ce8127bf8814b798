//! Name and unit normalization.
//!
//! Item identity is decided on normalized values, so "2 Cans" from Grocy
//! and "2 cans" already on the OurGroceries list count as the same item.
//! Units fold plural to singular through an equivalence table plus a
//! generic trailing-s rule.

use std::collections::{HashMap, HashSet};

/// Irregular plurals the generic fold cannot handle.
const BUILTIN_EQUIVALENTS: &[(&str, &str)] = &[
    ("loaves", "loaf"),
    ("leaves", "leaf"),
    ("halves", "half"),
    ("knives", "knife"),
];

/// Unit equivalence table: canonical singular forms plus exemptions for
/// units that look plural but are not.
#[derive(Debug, Clone)]
pub struct UnitTable {
    equivalents: HashMap<String, String>,
    plural_exempt: HashSet<String>,
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl UnitTable {
    /// Table with only the built-in irregular plurals.
    pub fn new() -> Self {
        let equivalents = BUILTIN_EQUIVALENTS
            .iter()
            .map(|(from, to)| (from.to_string(), to.to_string()))
            .collect();
        Self {
            equivalents,
            plural_exempt: HashSet::new(),
        }
    }

    /// Builds the table from config entries merged over the built-ins.
    /// Config entries win on conflict; keys and values are lowercased.
    pub fn with_config(equivalents: &HashMap<String, String>, plural_exempt: &[String]) -> Self {
        let mut table = Self::new();
        for (from, to) in equivalents {
            table.equivalents.insert(
                from.trim().to_lowercase(),
                to.trim().to_lowercase(),
            );
        }
        for unit in plural_exempt {
            table.plural_exempt.insert(unit.trim().to_lowercase());
        }
        table
    }

    fn canonical(&self, unit: &str) -> Option<&str> {
        self.equivalents.get(unit).map(String::as_str)
    }

    fn is_exempt(&self, unit: &str) -> bool {
        self.plural_exempt.contains(unit)
    }
}

/// Lowercases, trims and collapses internal whitespace.
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Normalizes a unit to its canonical singular form.
///
/// Lowercase + trim, then: exact table lookup, exemption check, generic
/// plural fold. `None` and blank input normalize to the empty string.
pub fn normalize_unit(raw: Option<&str>, table: &UnitTable) -> String {
    let unit = raw.unwrap_or("").trim().to_lowercase();
    if unit.is_empty() {
        return unit;
    }
    if let Some(canonical) = table.canonical(&unit) {
        return canonical.to_string();
    }
    if table.is_exempt(&unit) {
        return unit;
    }
    fold_plural(&unit)
}

/// Strips a trailing "es" when the stem ends in a sibilant, otherwise a
/// single trailing "s". Units ending in "ss" are left alone.
fn fold_plural(unit: &str) -> String {
    if let Some(stem) = unit.strip_suffix("es") {
        let sibilant = stem.ends_with('s')
            || stem.ends_with('x')
            || stem.ends_with('z')
            || stem.ends_with("ch")
            || stem.ends_with("sh");
        if !stem.is_empty() && sibilant {
            return stem.to_string();
        }
    }
    if let Some(stem) = unit.strip_suffix('s') {
        if !stem.is_empty() && !stem.ends_with('s') {
            return stem.to_string();
        }
    }
    unit.to_string()
}

/// Normalized identity of a list item: (name, unit).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemKey {
    pub name: String,
    pub unit: String,
}

impl ItemKey {
    pub fn new(name: &str, unit: Option<&str>, table: &UnitTable) -> Self {
        Self {
            name: normalize_name(name),
            unit: normalize_unit(unit, table),
        }
    }
}

impl std::fmt::Display for ItemKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} [{}]", self.name, self.unit)
        }
    }
}

/// Formats an amount for display: two decimals, near-whole values as
/// integers, trailing zeros trimmed.
pub fn format_amount(amount: f64) -> String {
    let rounded = (amount * 100.0).round() / 100.0;
    if (rounded - rounded.round()).abs() < 0.05 {
        format!("{}", rounded.round() as i64)
    } else {
        let text = format!("{rounded:.2}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Picks the display form of a unit for an amount: singular at one,
/// explicit plural when the source provides it, otherwise singular + "s".
pub fn display_unit(amount: f64, singular: &str, plural: Option<&str>) -> String {
    let rounded = (amount * 100.0).round() / 100.0;
    if (rounded - 1.0).abs() < 0.05 {
        singular.to_string()
    } else {
        match plural {
            Some(p) if !p.trim().is_empty() => p.to_string(),
            _ => format!("{singular}s"),
        }
    }
}
