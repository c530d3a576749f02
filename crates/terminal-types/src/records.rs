//! User-owned collections and the rules every collection shares: draft
//! validation, identity-preserving updates, search, facet filtering and the
//! default ordering each list view uses.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Idea, Link, Note, Prompt, Task, TaskStatus};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    Required(&'static str),

    #[error("invalid url '{0}': must start with http:// or https://")]
    InvalidUrl(String),
}

/// A collection row persisted as JSON under `(collection, id)`.
pub trait Record: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// Stable collection key, used as the storage discriminator and in events.
    const COLLECTION: &'static str;

    type Draft: DeserializeOwned + Send + 'static;

    fn id(&self) -> Uuid;

    fn create(id: Uuid, draft: Self::Draft, now: DateTime<Utc>) -> Result<Self, ValidationError>;

    /// Replace the user-editable fields. `id` and `created_at` are kept.
    fn update(&mut self, draft: Self::Draft, now: DateTime<Utc>) -> Result<(), ValidationError>;

    /// Case-insensitive search over the fields the list view searches.
    /// `term` is already lowercased.
    fn matches(&self, term: &str) -> bool;

    /// The value the facet filter compares against (status or category).
    fn facet(&self) -> Option<&str> {
        None
    }

    /// Default list order.
    fn order(a: &Self, b: &Self) -> Ordering;
}

fn required(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Required(field));
    }
    Ok(())
}

fn contains(haystack: &str, term: &str) -> bool {
    haystack.to_lowercase().contains(term)
}

pub fn validate_url(raw: &str) -> Result<(), ValidationError> {
    match url::Url::parse(raw.trim()) {
        Ok(u) if matches!(u.scheme(), "http" | "https") && u.has_host() => Ok(()),
        _ => Err(ValidationError::InvalidUrl(raw.to_string())),
    }
}

// -- Tasks --

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub status: Option<TaskStatus>,
}

impl TaskDraft {
    fn validate(&self) -> Result<NaiveDate, ValidationError> {
        required(&self.title, "title")?;
        required(&self.description, "description")?;
        self.due_date.ok_or(ValidationError::Required("dueDate"))
    }
}

impl Record for Task {
    const COLLECTION: &'static str = "tasks";
    type Draft = TaskDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn create(id: Uuid, draft: TaskDraft, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        let due_date = draft.validate()?;
        Ok(Self {
            id,
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            due_date,
            status: draft.status.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&mut self, draft: TaskDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
        let due_date = draft.validate()?;
        self.title = draft.title.trim().to_string();
        self.description = draft.description.trim().to_string();
        self.due_date = due_date;
        if let Some(status) = draft.status {
            self.status = status;
        }
        self.updated_at = now;
        Ok(())
    }

    fn matches(&self, term: &str) -> bool {
        contains(&self.title, term) || contains(&self.description, term)
    }

    fn facet(&self) -> Option<&str> {
        Some(self.status.as_str())
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        a.due_date.cmp(&b.due_date)
    }
}

// -- Notes --

#[derive(Debug, Clone, Deserialize)]
pub struct NoteDraft {
    pub title: String,
    pub content: String,
}

impl Record for Note {
    const COLLECTION: &'static str = "notes";
    type Draft = NoteDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn create(id: Uuid, draft: NoteDraft, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        required(&draft.title, "title")?;
        required(&draft.content, "content")?;
        Ok(Self {
            id,
            title: draft.title.trim().to_string(),
            content: draft.content,
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&mut self, draft: NoteDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
        required(&draft.title, "title")?;
        required(&draft.content, "content")?;
        self.title = draft.title.trim().to_string();
        self.content = draft.content;
        self.updated_at = now;
        Ok(())
    }

    fn matches(&self, term: &str) -> bool {
        contains(&self.title, term) || contains(&self.content, term)
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        b.updated_at.cmp(&a.updated_at)
    }
}

// -- Links --

#[derive(Debug, Clone, Deserialize)]
pub struct LinkDraft {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub description: String,
    pub category: String,
}

impl LinkDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        required(&self.title, "title")?;
        required(&self.url, "url")?;
        required(&self.category, "category")?;
        validate_url(&self.url)
    }
}

impl Record for Link {
    const COLLECTION: &'static str = "links";
    type Draft = LinkDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn create(id: Uuid, draft: LinkDraft, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        draft.validate()?;
        Ok(Self {
            id,
            title: draft.title.trim().to_string(),
            url: draft.url.trim().to_string(),
            description: draft.description.trim().to_string(),
            category: draft.category.trim().to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&mut self, draft: LinkDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
        draft.validate()?;
        self.title = draft.title.trim().to_string();
        self.url = draft.url.trim().to_string();
        self.description = draft.description.trim().to_string();
        self.category = draft.category.trim().to_string();
        self.updated_at = now;
        Ok(())
    }

    fn matches(&self, term: &str) -> bool {
        contains(&self.title, term) || contains(&self.description, term)
    }

    fn facet(&self) -> Option<&str> {
        Some(&self.category)
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        a.title.to_lowercase().cmp(&b.title.to_lowercase())
    }
}

// -- Ideas --

#[derive(Debug, Clone, Deserialize)]
pub struct IdeaDraft {
    pub title: String,
    pub description: String,
    pub category: String,
}

impl IdeaDraft {
    fn validate(&self) -> Result<(), ValidationError> {
        required(&self.title, "title")?;
        required(&self.description, "description")?;
        required(&self.category, "category")
    }
}

impl Record for Idea {
    const COLLECTION: &'static str = "ideas";
    type Draft = IdeaDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn create(id: Uuid, draft: IdeaDraft, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        draft.validate()?;
        Ok(Self {
            id,
            title: draft.title.trim().to_string(),
            description: draft.description.trim().to_string(),
            category: draft.category.trim().to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&mut self, draft: IdeaDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
        draft.validate()?;
        self.title = draft.title.trim().to_string();
        self.description = draft.description.trim().to_string();
        self.category = draft.category.trim().to_string();
        self.updated_at = now;
        Ok(())
    }

    fn matches(&self, term: &str) -> bool {
        contains(&self.title, term) || contains(&self.description, term)
    }

    fn facet(&self) -> Option<&str> {
        Some(&self.category)
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }
}

// -- Prompts --

#[derive(Debug, Clone, Deserialize)]
pub struct PromptDraft {
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub category: String,
}

impl Record for Prompt {
    const COLLECTION: &'static str = "prompts";
    type Draft = PromptDraft;

    fn id(&self) -> Uuid {
        self.id
    }

    fn create(id: Uuid, draft: PromptDraft, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        required(&draft.title, "title")?;
        required(&draft.category, "category")?;
        Ok(Self {
            id,
            title: draft.title.trim().to_string(),
            content: draft.content,
            category: draft.category.trim().to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    fn update(&mut self, draft: PromptDraft, now: DateTime<Utc>) -> Result<(), ValidationError> {
        required(&draft.title, "title")?;
        required(&draft.category, "category")?;
        self.title = draft.title.trim().to_string();
        self.content = draft.content;
        self.category = draft.category.trim().to_string();
        self.updated_at = now;
        Ok(())
    }

    fn matches(&self, term: &str) -> bool {
        contains(&self.title, term) || contains(&self.content, term) || contains(&self.category, term)
    }

    fn facet(&self) -> Option<&str> {
        Some(&self.category)
    }

    fn order(a: &Self, b: &Self) -> Ordering {
        b.created_at.cmp(&a.created_at)
    }
}

// -- Listing --

/// Query string accepted by every list endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    /// Facet value; `all` or absent disables the filter.
    pub filter: Option<String>,
}

/// Apply search, facet filter and the collection's default order.
pub fn apply_query<R: Record>(mut records: Vec<R>, query: &ListQuery) -> Vec<R> {
    let term = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase);
    let facet = query.filter.as_deref().filter(|f| *f != "all" && !f.is_empty());

    records.retain(|r| {
        term.as_deref().is_none_or(|t| r.matches(t)) && facet.is_none_or(|f| r.facet() == Some(f))
    });
    records.sort_by(R::order);
    records
}

/// Distinct facet values, sorted.
pub fn categories<R: Record>(records: &[R]) -> Vec<String> {
    records
        .iter()
        .filter_map(|r| r.facet())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
