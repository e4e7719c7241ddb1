//! Resident lookup for the assistant bot.

use std::sync::Arc;

use crate::{
    domain::{CareTask, Resident, ResidentId, UserId},
    ports::{CareStore, TaskQuery},
    query::TimeRange,
    Result,
};

/// Upper bound on directory fetches; the facility is far smaller in practice.
const DIRECTORY_LIMIT: usize = 50;

pub struct ResidentDirectory {
    store: Arc<dyn CareStore>,
}

impl ResidentDirectory {
    pub fn new(store: Arc<dyn CareStore>) -> Self {
        Self { store }
    }

    pub async fn all(&self) -> Result<Vec<Resident>> {
        self.store.all_residents(DIRECTORY_LIMIT).await
    }

    /// Resolve a spoken/typed name to a resident.
    ///
    /// Match ladder, most to least exact: full-name equality, substring,
    /// then any query word (longer than two letters) equal to a name word.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Resident>> {
        let needle = normalize_name(name);
        if needle.is_empty() {
            return Ok(None);
        }
        let residents = self.all().await?;

        if let Some(found) = residents
            .iter()
            .find(|r| r.full_name.to_lowercase() == needle)
        {
            return Ok(Some(found.clone()));
        }

        if let Some(found) = residents
            .iter()
            .find(|r| r.full_name.to_lowercase().contains(&needle))
        {
            return Ok(Some(found.clone()));
        }

        let words: Vec<&str> = needle.split_whitespace().filter(|w| w.len() > 2).collect();
        if let Some(found) = residents.iter().find(|r| {
            let name_words: Vec<String> = r
                .full_name
                .to_lowercase()
                .split_whitespace()
                .map(|w| w.to_string())
                .collect();
            words.iter().any(|w| name_words.iter().any(|nw| nw == w))
        }) {
            return Ok(Some(found.clone()));
        }

        Ok(None)
    }

    /// Up to five similarly named residents, for "did you mean" replies.
    pub async fn suggestions_for(&self, name: &str) -> Result<Vec<String>> {
        let needle = normalize_name(name);
        if needle.is_empty() {
            return Ok(Vec::new());
        }
        let residents = self.all().await?;
        Ok(residents
            .iter()
            .filter(|r| {
                let full = r.full_name.to_lowercase();
                full.contains(&needle) || needle.contains(&full)
            })
            .take(5)
            .map(|r| r.full_name.clone())
            .collect())
    }

    /// Tasks assigned for one resident, newest window first per backend order.
    pub async fn tasks_for(
        &self,
        resident_id: &ResidentId,
        range: Option<TimeRange>,
    ) -> Result<Vec<CareTask>> {
        let query = TaskQuery {
            assigned_for: Some(resident_id.0.clone()),
            start: range.map(|r| r.start),
            end: range.map(|r| r.end),
            ..Default::default()
        };
        self.store.query_tasks(&query).await
    }

    pub async fn add_note(
        &self,
        resident_id: &ResidentId,
        note: &str,
        author: Option<&UserId>,
    ) -> Result<bool> {
        self.store.add_resident_note(resident_id, note, author).await
    }
}

fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Render the "did you mean" tail of a not-found reply.
pub fn suggestion_text(suggestions: &[String]) -> String {
    if suggestions.is_empty() {
        return "Please check the spelling or try another resident name.".to_string();
    }
    format!(
        "Did you mean one of these residents?\n• {}",
        suggestions.join("\n• ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{resident, FakeStore};

    fn directory(names: &[(&str, &str)]) -> ResidentDirectory {
        ResidentDirectory::new(Arc::new(FakeStore {
            residents: names.iter().map(|(id, n)| resident(id, n)).collect(),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn exact_match_beats_substring() {
        let dir = directory(&[("r1", "Ann Lee Tan"), ("r2", "Ann Lee")]);
        let found = dir.find_by_name("ann lee").await.unwrap().unwrap();
        assert_eq!(found.id.0, "r2");
    }

    #[tokio::test]
    async fn substring_match_is_case_insensitive() {
        let dir = directory(&[("r1", "Margaret Chen")]);
        let found = dir.find_by_name("MARGARET").await.unwrap().unwrap();
        assert_eq!(found.id.0, "r1");
    }

    #[tokio::test]
    async fn word_match_ignores_short_words() {
        let dir = directory(&[("r1", "Tan Ah Kow")]);
        // "ah" is too short to count as a word match.
        assert!(dir.find_by_name("ah").await.unwrap().is_none());
        let found = dir.find_by_name("mr kow please").await.unwrap().unwrap();
        assert_eq!(found.id.0, "r1");
    }

    #[tokio::test]
    async fn whitespace_is_normalized() {
        let dir = directory(&[("r1", "Margaret Chen")]);
        let found = dir.find_by_name("  margaret   chen ").await.unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn empty_name_finds_nothing() {
        let dir = directory(&[("r1", "Margaret Chen")]);
        assert!(dir.find_by_name("   ").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn suggestions_cap_at_five() {
        let names: Vec<(String, String)> = (0..8)
            .map(|i| (format!("r{i}"), format!("Tan Number {i}")))
            .collect();
        let refs: Vec<(&str, &str)> = names
            .iter()
            .map(|(id, n)| (id.as_str(), n.as_str()))
            .collect();
        let dir = directory(&refs);
        let got = dir.suggestions_for("tan").await.unwrap();
        assert_eq!(got.len(), 5);
    }

    #[test]
    fn suggestion_text_fallback() {
        assert_eq!(
            suggestion_text(&[]),
            "Please check the spelling or try another resident name."
        );
        let with = suggestion_text(&["Mary Tan".to_string(), "Mary Lim".to_string()]);
        assert_eq!(
            with,
            "Did you mean one of these residents?\n• Mary Tan\n• Mary Lim"
        );
    }
}
