use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Question record as delivered by the content service. The engine only
/// reads ids, theme, tags and difficulty; everything else stays with the
/// caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
    pub id: String,
    pub theme: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// 1 = easy, 2 = standard, 3+ = hard.
    pub difficulty: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub id: String,
    pub theme: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Curriculum placement of a tag. A tag without metadata is unpublished and
/// ignored by quest selection and zone grouping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagMeta {
    pub subject: String,
    pub theme: String,
    pub label: String,
    pub order: u32,
}

impl TagMeta {
    pub fn zone_key(&self) -> String {
        zone_key(&self.subject, &self.theme)
    }
}

/// Zone identifier derived from curriculum placement. Double colon keeps
/// the key safe as a map key in dotted-path updates.
pub fn zone_key(subject: &str, theme: &str) -> String {
    format!("{}::{}", subject, theme)
}

pub trait ContentStore: Send + Sync {
    fn list_exercises_by_tag(&self, tag: &str) -> Vec<Exercise>;
    fn list_exercises(&self, theme: &str) -> Vec<Exercise>;
    fn list_readings(&self, theme: &str) -> Vec<Reading>;
}

pub trait TagTaxonomy: Send + Sync {
    fn tag_meta(&self, tag: &str) -> Option<TagMeta>;
}

/// In-memory content pack. Hosts preload their catalogs into one of these;
/// tests build small fixtures with it.
#[derive(Debug, Clone, Default)]
pub struct StaticContent {
    pub exercises: Vec<Exercise>,
    pub readings: Vec<Reading>,
    pub tags: BTreeMap<String, TagMeta>,
}

impl StaticContent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_exercise(&mut self, id: &str, theme: &str, tags: &[&str], difficulty: u8) -> &mut Self {
        self.exercises.push(Exercise {
            id: id.to_string(),
            theme: theme.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            difficulty,
        });
        self
    }

    pub fn add_reading(&mut self, id: &str, theme: &str, tags: &[&str]) -> &mut Self {
        self.readings.push(Reading {
            id: id.to_string(),
            theme: theme.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        });
        self
    }

    pub fn add_tag(&mut self, tag: &str, subject: &str, theme: &str, order: u32) -> &mut Self {
        self.tags.insert(
            tag.to_string(),
            TagMeta {
                subject: subject.to_string(),
                theme: theme.to_string(),
                label: tag.to_string(),
                order,
            },
        );
        self
    }
}

impl ContentStore for StaticContent {
    fn list_exercises_by_tag(&self, tag: &str) -> Vec<Exercise> {
        self.exercises
            .iter()
            .filter(|e| e.tags.iter().any(|t| t == tag))
            .cloned()
            .collect()
    }

    fn list_exercises(&self, theme: &str) -> Vec<Exercise> {
        self.exercises
            .iter()
            .filter(|e| e.theme == theme)
            .cloned()
            .collect()
    }

    fn list_readings(&self, theme: &str) -> Vec<Reading> {
        self.readings
            .iter()
            .filter(|r| r.theme == theme)
            .cloned()
            .collect()
    }
}

impl TagTaxonomy for StaticContent {
    fn tag_meta(&self, tag: &str) -> Option<TagMeta> {
        self.tags.get(tag).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_content_filters_by_tag_and_theme() {
        let mut content = StaticContent::new();
        content
            .add_exercise("e1", "numbers", &["fractions"], 1)
            .add_exercise("e2", "shapes", &["geometry"], 2)
            .add_reading("r1", "numbers", &["fractions"])
            .add_tag("fractions", "math", "numbers", 1);

        assert_eq!(content.list_exercises_by_tag("fractions").len(), 1);
        assert_eq!(content.list_exercises("numbers").len(), 1);
        assert_eq!(content.list_readings("numbers").len(), 1);
        assert!(content.list_exercises_by_tag("spelling").is_empty());
        assert!(content.list_readings("grammar").is_empty());
        assert_eq!(content.tag_meta("fractions").unwrap().zone_key(), "math::numbers");
        assert!(content.tag_meta("spelling").is_none());
    }
}
