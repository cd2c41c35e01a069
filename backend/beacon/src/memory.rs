//! In-process store for local development and tests.
//!
//! A single `parking_lot` lock guards all maps. Every check-then-write runs
//! entirely under the write guard and no guard is held across an `.await`.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::errors::Result;
use crate::models::{Project, ProjectKey, Question};
use crate::store::QaStore;

#[derive(Default)]
struct Inner {
    projects: HashMap<String, Project>,
    project_ids: HashMap<ProjectKey, String>,
    questions: HashMap<String, Question>,
}

impl Inner {
    fn question_count(&self, project_id: &str) -> u64 {
        self.questions
            .values()
            .filter(|q| q.project_id == project_id)
            .count() as u64
    }

    fn with_count(&self, project: &Project) -> Project {
        Project {
            total_questions: self.question_count(&project.id),
            ..project.clone()
        }
    }
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QaStore for MemoryStore {
    async fn list_projects(&self) -> Result<Vec<Project>> {
        let inner = self.inner.read();
        Ok(inner.projects.values().map(|p| inner.with_count(p)).collect())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let inner = self.inner.read();
        Ok(inner.projects.get(id).map(|p| inner.with_count(p)))
    }

    async fn insert_project_if_absent(&self, project: Project) -> Result<(Project, bool)> {
        let mut inner = self.inner.write();
        let key = project.dedup_key();

        if let Some(existing) = inner
            .project_ids
            .get(&key)
            .and_then(|id| inner.projects.get(id))
        {
            return Ok((inner.with_count(existing), false));
        }

        inner.project_ids.insert(key, project.id.clone());
        inner.projects.insert(project.id.clone(), project.clone());
        Ok((inner.with_count(&project), true))
    }

    async fn list_questions(&self, project_id: &str) -> Result<Vec<Question>> {
        let inner = self.inner.read();
        Ok(inner
            .questions
            .values()
            .filter(|q| q.project_id == project_id)
            .cloned()
            .collect())
    }

    async fn get_question(&self, id: &str) -> Result<Option<Question>> {
        Ok(self.inner.read().questions.get(id).cloned())
    }

    async fn insert_question(&self, question: &Question) -> Result<()> {
        self.inner
            .write()
            .questions
            .insert(question.id.clone(), question.clone());
        Ok(())
    }

    async fn add_voter(&self, question_id: &str, wallet: &str) -> Result<Option<Question>> {
        let mut inner = self.inner.write();
        let Some(question) = inner.questions.get_mut(question_id) else {
            return Ok(None);
        };

        if !question.has_voted(wallet) {
            question.voters.push(wallet.to_string());
            question.votes = question.voters.len() as u64;
        }
        Ok(Some(question.clone()))
    }
}
