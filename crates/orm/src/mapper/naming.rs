//! Table naming convention
//!
//! `AlbumTrack` maps to `album_tracks`: snake_case, then the last word is
//! pluralised. Overrides take precedence over the convention.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct TableNaming {
    overrides: HashMap<String, String>,
}

impl TableNaming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(overrides: HashMap<String, String>) -> Self {
        Self { overrides }
    }

    /// Map `type_name` to `table` regardless of the convention
    pub fn override_table(&mut self, type_name: impl Into<String>, table: impl Into<String>) {
        self.overrides.insert(type_name.into(), table.into());
    }

    /// Physical table name for a logical type name. Path prefixes such as
    /// `crate::models::` are ignored.
    pub fn table_name(&self, type_name: &str) -> String {
        let short_name = type_name.rsplit("::").next().unwrap_or(type_name);

        self.overrides
            .get(type_name)
            .or_else(|| self.overrides.get(short_name))
            .cloned()
            .unwrap_or_else(|| Self::pluralize(&Self::to_snake_case(short_name)))
    }

    /// Convert CamelCase to snake_case; snake_case input is returned as is
    pub fn to_snake_case(name: &str) -> String {
        let chars: Vec<char> = name.chars().collect();
        let mut result = String::with_capacity(name.len() + 4);

        for (i, &c) in chars.iter().enumerate() {
            if c.is_uppercase() {
                let prev = i.checked_sub(1).map(|p| chars[p]);
                let next = chars.get(i + 1);
                let word_boundary = match prev {
                    Some(p) if p.is_lowercase() || p.is_ascii_digit() => true,
                    Some(p) if p.is_uppercase() => next.map_or(false, |n| n.is_lowercase()),
                    _ => false,
                };
                if word_boundary && !result.ends_with('_') {
                    result.push('_');
                }
                result.extend(c.to_lowercase());
            } else {
                result.push(c);
            }
        }

        result
    }

    /// Simple English pluralisation of the trailing word
    pub fn pluralize(name: &str) -> String {
        let ends_with_consonant_y = name.ends_with('y')
            && !["ay", "ey", "iy", "oy", "uy"].iter().any(|suffix| name.ends_with(suffix));

        if ends_with_consonant_y {
            format!("{}ies", &name[..name.len() - 1])
        } else if ["s", "sh", "ch", "x", "z"].iter().any(|suffix| name.ends_with(suffix)) {
            format!("{}es", name)
        } else {
            format!("{}s", name)
        }
    }
}
