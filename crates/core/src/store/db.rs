//! `PostgreSQL` backed store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fanout_common::{AppError, AppResult, IdGenerator};
use fanout_db::entities::{account, custom_emoji, emoji_reaction, status};
use fanout_db::repositories::{
    AccountRepository, CustomEmojiRepository, EmojiReactionRepository, FollowRepository,
    StatusReferenceRepository, StatusRepository,
};
use sea_orm::{DatabaseConnection, IntoActiveModel, Set};
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{EmojiReactionStore, StatusStore};
use crate::model::{
    AccountId, CustomEmoji, EmojiId, EmojiReaction, ReactionSummary, RemoteStatus, Status,
    StatusId, Visibility,
};

/// Store backed by the `fanout-db` repositories.
#[derive(Clone)]
pub struct DbStore {
    accounts: AccountRepository,
    statuses: StatusRepository,
    references: StatusReferenceRepository,
    follows: FollowRepository,
    emojis: CustomEmojiRepository,
    reactions: EmojiReactionRepository,
    id_gen: IdGenerator,
}

impl DbStore {
    /// Create a store over a shared connection pool.
    #[must_use]
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            accounts: AccountRepository::new(db.clone()),
            statuses: StatusRepository::new(db.clone()),
            references: StatusReferenceRepository::new(db.clone()),
            follows: FollowRepository::new(db.clone()),
            emojis: CustomEmojiRepository::new(db.clone()),
            reactions: EmojiReactionRepository::new(db),
            id_gen: IdGenerator::new(),
        }
    }

    async fn ensure_remote_account(&self, uri: &str) -> AppResult<AccountId> {
        if let Some(account) = self.accounts.find_by_uri(uri).await? {
            return Ok(account.id);
        }

        let parsed = Url::parse(uri)
            .map_err(|e| AppError::Federation(format!("invalid actor URI {uri}: {e}")))?;
        let username = parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .unwrap_or("unknown")
            .to_string();

        let model = account::ActiveModel {
            id: Set(self.id_gen.generate_numeric()),
            username: Set(username),
            domain: Set(parsed.host_str().map(ToString::to_string)),
            uri: Set(uri.to_string()),
            created_at: Set(Utc::now().into()),
        };

        let account = self.accounts.create(model).await?;
        debug!(account_id = account.id, uri, "Created remote account");
        Ok(account.id)
    }
}

const fn from_db_visibility(visibility: status::Visibility) -> Visibility {
    match visibility {
        status::Visibility::Public => Visibility::Public,
        status::Visibility::Unlisted => Visibility::Unlisted,
        status::Visibility::Private => Visibility::Private,
        status::Visibility::Limited => Visibility::Limited,
        status::Visibility::Direct => Visibility::Direct,
        status::Visibility::Personal => Visibility::Personal,
    }
}

const fn to_db_visibility(visibility: Visibility) -> status::Visibility {
    match visibility {
        Visibility::Public => status::Visibility::Public,
        Visibility::Unlisted => status::Visibility::Unlisted,
        Visibility::Private => status::Visibility::Private,
        Visibility::Limited => status::Visibility::Limited,
        Visibility::Direct => status::Visibility::Direct,
        Visibility::Personal => status::Visibility::Personal,
    }
}

fn to_status(model: status::Model) -> AppResult<Status> {
    let created_at = model.created_at.with_timezone(&Utc);
    Ok(Status {
        id: model.id,
        account_id: model.account_id,
        local: model.local,
        visibility: from_db_visibility(model.visibility),
        uri: model.uri,
        url: model.url,
        text: model.text,
        mentioned_account_ids: serde_json::from_value(model.mentioned_account_ids)?,
        reference_urls: serde_json::from_value(model.reference_urls)?,
        created_at,
        updated_at: model
            .updated_at
            .map_or(created_at, |t| t.with_timezone(&Utc)),
    })
}

fn to_emoji(model: custom_emoji::Model) -> CustomEmoji {
    CustomEmoji {
        id: model.id,
        shortcode: model.shortcode,
        domain: model.domain,
        image_url: model.image_url,
        static_image_url: model.static_image_url,
        disabled: model.disabled,
    }
}

fn to_reaction(model: emoji_reaction::Model) -> EmojiReaction {
    EmojiReaction {
        id: model.id,
        account_id: model.account_id,
        status_id: model.status_id,
        name: model.name,
        custom_emoji_id: model.custom_emoji_id,
    }
}

#[async_trait]
impl StatusStore for DbStore {
    async fn get_status(&self, id: StatusId) -> AppResult<Status> {
        to_status(self.statuses.get_by_id(id).await?)
    }

    async fn find_status_by_uri(&self, uri: &str) -> AppResult<Option<Status>> {
        if let Some(model) = self.statuses.find_by_uri(uri).await? {
            return to_status(model).map(Some);
        }
        self.statuses
            .find_by_url(uri)
            .await?
            .map(to_status)
            .transpose()
    }

    async fn upsert_remote_status(&self, remote: &RemoteStatus) -> AppResult<Status> {
        let account_id = self.ensure_remote_account(&remote.account_uri).await?;

        if let Some(existing) = self.statuses.find_by_uri(&remote.uri).await? {
            let mut model = existing.into_active_model();
            model.visibility = Set(to_db_visibility(remote.visibility));
            model.url = Set(remote.url.clone());
            model.text = Set(remote.text.clone());
            model.updated_at = Set(Some(Utc::now().into()));
            return to_status(self.statuses.update(model).await?);
        }

        let model = status::ActiveModel {
            id: Set(self.id_gen.generate_numeric()),
            account_id: Set(account_id),
            local: Set(false),
            visibility: Set(to_db_visibility(remote.visibility)),
            uri: Set(remote.uri.clone()),
            url: Set(remote.url.clone()),
            text: Set(remote.text.clone()),
            mentioned_account_ids: Set(json!([])),
            reference_urls: Set(json!([])),
            emoji_reactions: Set(json!([])),
            created_at: Set(remote.published.into()),
            updated_at: Set(None),
        };

        to_status(self.statuses.create(model).await?)
    }

    async fn account_id_by_uri(&self, uri: &str) -> AppResult<Option<AccountId>> {
        Ok(self.accounts.find_by_uri(uri).await?.map(|a| a.id))
    }

    async fn filter_local_accounts(&self, ids: &[AccountId]) -> AppResult<Vec<AccountId>> {
        self.accounts.filter_local_ids(ids.to_vec()).await
    }

    async fn create_reference(&self, status_id: StatusId, target_id: StatusId) -> AppResult<bool> {
        self.references.create_if_absent(status_id, target_id).await
    }

    async fn list_reference_ids(&self, status_id: StatusId) -> AppResult<Vec<StatusId>> {
        self.references.find_target_ids(status_id).await
    }

    async fn local_follower_ids(&self, account_id: AccountId) -> AppResult<Vec<AccountId>> {
        let follower_ids = self.follows.find_follower_ids(account_id).await?;
        self.accounts.filter_local_ids(follower_ids).await
    }

    async fn is_following(
        &self,
        account_id: AccountId,
        target_account_id: AccountId,
    ) -> AppResult<bool> {
        self.follows.is_following(account_id, target_account_id).await
    }
}

#[async_trait]
impl EmojiReactionStore for DbStore {
    async fn status_ids_with_emojis(&self, emoji_ids: &[EmojiId]) -> AppResult<Vec<StatusId>> {
        self.reactions
            .find_status_ids_by_emoji_ids(emoji_ids.to_vec())
            .await
    }

    async fn emoji_reactions(&self, status_id: StatusId) -> AppResult<Vec<EmojiReaction>> {
        Ok(self
            .reactions
            .find_by_status(status_id)
            .await?
            .into_iter()
            .map(to_reaction)
            .collect())
    }

    async fn custom_emojis(&self, ids: &[EmojiId]) -> AppResult<Vec<CustomEmoji>> {
        Ok(self
            .emojis
            .find_by_ids(ids.to_vec())
            .await?
            .into_iter()
            .map(to_emoji)
            .collect())
    }

    async fn save_reaction_summaries(
        &self,
        status_id: StatusId,
        summaries: &[ReactionSummary],
    ) -> AppResult<bool> {
        let value = serde_json::to_value(summaries)?;
        self.statuses.update_emoji_reactions(status_id, value).await
    }
}
