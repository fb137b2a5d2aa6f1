use std::sync::Arc;

use dynrender_model::{RenderRequest, StatusMessageId, UserId};
use dynrender_store::SettingsStore;
use serde_json::Value;

use crate::error::{RenderError, RenderResult};
use crate::settings::RENDER_QUEUE_KEY;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Appended; `position` is 1-based (1 = head).
    Queued { position: usize },
    Full { max: usize },
    /// An entry with the same status message id is already queued.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelMark {
    Marked,
    AlreadyRequested,
    NotPermitted,
    NotFound,
}

fn decode(value: &Value) -> anyhow::Result<Vec<RenderRequest>> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_value(value.clone())?)
}

fn encode(list: &[RenderRequest]) -> anyhow::Result<Value> {
    Ok(serde_json::to_value(list)?)
}

/// The persisted, arrival-ordered list of render requests. Head holds the render slot.
///
/// Every mutation goes through the store's exclusive `modify` section, so
/// concurrent render tasks never lose each other's updates.
#[derive(Clone)]
pub struct RenderQueue {
    store: Arc<dyn SettingsStore>,
}

impl RenderQueue {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self { store }
    }

    async fn edit<T: Send>(
        &self,
        f: impl FnOnce(&mut Vec<RenderRequest>) -> T + Send,
    ) -> RenderResult<T> {
        let mut out = None;
        let slot = &mut out;
        self.store
            .modify(
                RENDER_QUEUE_KEY,
                Box::new(move |value| {
                    let mut list = decode(value)?;
                    *slot = Some(f(&mut list));
                    *value = encode(&list)?;
                    Ok(())
                }),
            )
            .await
            .map_err(RenderError::store)?;
        out.ok_or_else(|| RenderError::Store("render queue edit did not run".to_string()))
    }

    pub async fn list(&self) -> RenderResult<Vec<RenderRequest>> {
        let value = self
            .store
            .get(RENDER_QUEUE_KEY)
            .await
            .map_err(RenderError::store)?
            .unwrap_or(Value::Null);
        decode(&value).map_err(RenderError::store)
    }

    pub async fn try_enqueue(
        &self,
        request: RenderRequest,
        max_size: usize,
    ) -> RenderResult<EnqueueOutcome> {
        self.edit(move |list| {
            if list
                .iter()
                .any(|r| r.status_message_id == request.status_message_id)
            {
                return EnqueueOutcome::Duplicate;
            }
            if list.len() >= max_size {
                return EnqueueOutcome::Full { max: max_size };
            }
            list.push(request);
            EnqueueOutcome::Queued {
                position: list.len(),
            }
        })
        .await
    }

    pub async fn peek_head(&self) -> RenderResult<Option<RenderRequest>> {
        Ok(self.list().await?.into_iter().next())
    }

    pub async fn find_by_key(&self, key: &StatusMessageId) -> RenderResult<Option<RenderRequest>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|r| &r.status_message_id == key))
    }

    pub async fn position(&self, key: &StatusMessageId) -> RenderResult<Option<usize>> {
        Ok(self
            .list()
            .await?
            .iter()
            .position(|r| &r.status_message_id == key)
            .map(|i| i + 1))
    }

    /// Removes the entry for `key`. Returns whether one was present.
    pub async fn remove_by_key(&self, key: &StatusMessageId) -> RenderResult<bool> {
        let key = key.clone();
        self.edit(move |list| {
            let before = list.len();
            list.retain(|r| r.status_message_id != key);
            list.len() != before
        })
        .await
    }

    /// Empties the queue. Renders in flight will most likely fail afterwards.
    pub async fn clear(&self) -> RenderResult<usize> {
        self.edit(|list| {
            let n = list.len();
            list.clear();
            n
        })
        .await
    }

    /// Records `user` as the canceller of `key` if `permitted` allows it.
    pub async fn request_cancellation(
        &self,
        key: &StatusMessageId,
        user: &UserId,
        permitted: impl FnOnce(&RenderRequest) -> bool + Send,
    ) -> RenderResult<CancelMark> {
        let key = key.clone();
        let user = user.clone();
        self.edit(move |list| {
            let Some(entry) = list.iter_mut().find(|r| r.status_message_id == key) else {
                return CancelMark::NotFound;
            };
            if !permitted(entry) {
                return CancelMark::NotPermitted;
            }
            if entry.cancelling_user_id.is_some() {
                return CancelMark::AlreadyRequested;
            }
            entry.cancelling_user_id = Some(user);
            CancelMark::Marked
        })
        .await
    }
}
