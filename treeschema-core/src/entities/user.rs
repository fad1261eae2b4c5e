//! Users, keyed by e-mail address.

use serde::{Deserialize, Serialize};

use super::users;
use crate::client::TreeSchema;
use crate::error::{Result, TreeSchemaError};
use crate::resolver::{CreatePayload, Lookup, UserRef, require};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

/// Payload for inviting a user to the account.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUser {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

impl NewUser {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            first_name: None,
            last_name: None,
        }
    }

    pub fn name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }
}

impl CreatePayload for NewUser {
    fn natural_key(&self) -> &str {
        &self.email
    }

    fn validate(&self) -> Result<()> {
        require("email", &self.email)?;
        if !self.email.contains('@') {
            return Err(TreeSchemaError::validation(format!(
                "'{}' is not an e-mail address",
                self.email
            )));
        }
        Ok(())
    }
}

impl From<NewUser> for Lookup<NewUser> {
    fn from(payload: NewUser) -> Self {
        Lookup::Create(payload)
    }
}

/// Handle to a catalog user.
#[derive(Debug, Clone)]
pub struct User {
    session: TreeSchema,
    record: UserRecord,
}

impl User {
    pub(crate) fn from_record(session: TreeSchema, record: UserRecord) -> Self {
        Self { session, record }
    }

    pub fn id(&self) -> i64 {
        self.record.id
    }

    pub fn email(&self) -> &str {
        &self.record.email
    }

    pub fn record(&self) -> &UserRecord {
        &self.record
    }

    /// Re-fetch this user from the server.
    pub async fn refresh(&mut self) -> Result<&Self> {
        self.record = users(&self.session).get(self.record.id).await?;
        Ok(self)
    }
}

impl From<&User> for UserRef {
    fn from(user: &User) -> Self {
        UserRef(user.id())
    }
}

impl From<User> for UserRef {
    fn from(user: User) -> Self {
        UserRef(user.id())
    }
}
