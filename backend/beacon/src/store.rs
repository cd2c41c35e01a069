//! Persistence contract for projects and questions.
//!
//! Both mutating paths are atomic per key: [`QaStore::insert_project_if_absent`]
//! on the `(token, chain)` dedup key and [`QaStore::add_voter`] on the
//! question id. Implementations must never apply a read-modify-write of a
//! whole record without holding that key exclusively.

use async_trait::async_trait;

use crate::errors::Result;
use crate::models::{Project, Question};

#[async_trait]
pub trait QaStore: Send + Sync {
    /// All projects with `total_questions` filled in, in no particular order.
    async fn list_projects(&self) -> Result<Vec<Project>>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>>;

    /// Store `project` unless one already exists for its dedup key.
    ///
    /// Returns the stored project and whether it was inserted by this call.
    async fn insert_project_if_absent(&self, project: Project) -> Result<(Project, bool)>;

    /// Questions belonging to `project_id`, in no particular order.
    async fn list_questions(&self, project_id: &str) -> Result<Vec<Question>>;

    async fn get_question(&self, id: &str) -> Result<Option<Question>>;

    async fn insert_question(&self, question: &Question) -> Result<()>;

    /// Add `wallet` to the question's voters and bump `votes` if it was not
    /// already present. Returns `None` when the question does not exist.
    async fn add_voter(&self, question_id: &str, wallet: &str) -> Result<Option<Question>>;
}
