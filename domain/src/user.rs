//! User lookup for enriching admitted connections.
//!
//! Users are loaded once at startup from a JSON file (an array of
//! `{"id": 1, "email": "...", "display_name": "..."}` objects). The real
//! user store lives behind the REST layer; this directory only needs to
//! answer "who is identity X" for logging and status output.

use crate::error::Error;
use async_trait::async_trait;
use log::*;
use serde::Deserialize;
use session::admission::{IdentityResolver, UserRecord};
use session::Identity;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct UserFileEntry {
    id: i64,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default)]
pub struct Directory {
    users: HashMap<Identity, UserRecord>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = UserRecord>) -> Self {
        Self {
            users: records
                .into_iter()
                .map(|record| (record.user_id, record))
                .collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path)?;
        let directory = Self::from_json(&contents)?;
        info!(
            "Loaded {} user(s) from {}",
            directory.len(),
            path.display()
        );
        Ok(directory)
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let entries: Vec<UserFileEntry> = serde_json::from_str(json)?;
        Ok(Self::from_records(entries.into_iter().map(|entry| {
            UserRecord {
                user_id: Identity::new(entry.id),
                email: entry.email,
                display_name: entry.display_name,
            }
        })))
    }

    pub fn find_by_id(&self, identity: Identity) -> Option<&UserRecord> {
        self.users.get(&identity)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl IdentityResolver for Directory {
    async fn resolve(&self, identity: Identity) -> Option<UserRecord> {
        self.find_by_id(identity).cloned()
    }
}
