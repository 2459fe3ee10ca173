// Parent-Resource Collaborator Port
// The engine reads a project to locate inputs and the projection, and
// writes derived references back; ownership stays with the API layer.

use crate::domain::Project;
use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Project>>;

    /// Write the full project document back (document-store semantics).
    async fn upsert(&self, project: &Project) -> Result<()>;
}

pub mod mocks {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryProjectStore {
        projects: Mutex<HashMap<String, Project>>,
    }

    impl MemoryProjectStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_project(project: Project) -> Self {
            let store = Self::new();
            store
                .projects
                .lock()
                .unwrap()
                .insert(project.id.clone(), project);
            store
        }
    }

    #[async_trait]
    impl ProjectStore for MemoryProjectStore {
        async fn get(&self, id: &str) -> Result<Option<Project>> {
            Ok(self.projects.lock().unwrap().get(id).cloned())
        }

        async fn upsert(&self, project: &Project) -> Result<()> {
            self.projects
                .lock()
                .unwrap()
                .insert(project.id.clone(), project.clone());
            Ok(())
        }
    }
}
