//! REST collaborators.
//!
//! Room metadata, get-or-create, read-marking, backward history pages,
//! soft delete, and the global unread total. Every call carries the
//! session bearer token; 401/403 surface as the auth error for the
//! session collaborator. History fetches are never retried automatically.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{ChatError, Result};
use crate::models::{HistoryPage, RoomId, RoomSummary, SubjectId};

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_token: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, auth_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth_token: auth_token.into(),
        }
    }

    /// All rooms for this session's account.
    pub async fn rooms(&self) -> Result<Vec<RoomSummary>> {
        self.get_json("/rooms").await
    }

    /// Get or create the room for an animal listing.
    pub async fn room_for_subject(&self, subject_id: SubjectId) -> Result<RoomSummary> {
        self.get_json(&format!("/room/{subject_id}")).await
    }

    /// Open a room; the server resets its unread count as a side effect.
    pub async fn open_room(&self, room_id: RoomId) -> Result<RoomSummary> {
        self.get_json(&format!("/rooms/{room_id}")).await
    }

    /// One backward history page. Errors are `HistoryFetch` (except auth):
    /// the caller decides whether to retry, never this client.
    pub async fn history(&self, room_id: RoomId, page: u32, size: u32) -> Result<HistoryPage> {
        let url = format!("{}/history/{room_id}?page={page}&size={size}", self.base_url);
        debug!(room = room_id, page, "fetching history page");
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| ChatError::HistoryFetch {
                room_id,
                reason: e.to_string(),
            })?;
        match Self::check_status(resp) {
            Ok(resp) => resp.json().await.map_err(|e| ChatError::HistoryFetch {
                room_id,
                reason: e.to_string(),
            }),
            Err(ChatError::Auth) => Err(ChatError::Auth),
            Err(e) => Err(ChatError::HistoryFetch {
                room_id,
                reason: e.to_string(),
            }),
        }
    }

    /// Soft-hide a room for this user.
    pub async fn hide_room(&self, room_id: RoomId) -> Result<()> {
        let url = format!("{}/rooms/{room_id}", self.base_url);
        let resp = self
            .http
            .delete(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Self::check_status(resp)?;
        Ok(())
    }

    /// The account-wide unread total.
    pub async fn unread_count(&self) -> Result<u32> {
        self.get_json("/unread/count").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .http
            .get(&url)
            .bearer_auth(&self.auth_token)
            .send()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))?;
        Self::check_status(resp)?
            .json()
            .await
            .map_err(|e| ChatError::Transport(e.to_string()))
    }

    fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ChatError::Auth),
            status if !status.is_success() => {
                Err(ChatError::Transport(format!("unexpected status {status}")))
            }
            _ => Ok(resp),
        }
    }
}
