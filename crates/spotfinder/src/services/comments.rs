use std::sync::Arc;

use futures::Stream;

use super::{comments_collection, profiles::ProfileService};
use crate::{
    auth::Identity,
    db::models::{decode_all, Comment, Record, Spot},
    error::{AppError, Result},
    store::{Direction, DocumentStore, Query, Subscription},
};

#[derive(Clone)]
pub struct CommentService {
    store: Arc<dyn DocumentStore>,
    identity: Arc<dyn Identity>,
    profiles: ProfileService,
}

impl CommentService {
    pub fn new(store: Arc<dyn DocumentStore>, identity: Arc<dyn Identity>) -> Self {
        let profiles = ProfileService::new(Arc::clone(&store), Arc::clone(&identity));
        Self {
            store,
            identity,
            profiles,
        }
    }

    pub fn profiles(&self) -> &ProfileService {
        &self.profiles
    }

    /// Returns the new comment's id, or `None` when there was nothing to post.
    pub async fn add_comment(&self, spot: &Spot, text: &str) -> Result<Option<String>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let Some(spot_id) = spot.id.as_deref() else {
            tracing::debug!("Spot has no id, dropping comment");
            return Ok(None);
        };

        let user = self
            .identity
            .current_user()
            .ok_or(AppError::Unauthenticated)?;

        let username = self.profiles.resolve_username(&user).await;
        let comment = Comment::new(text, user.id, Some(username));

        let id = self
            .store
            .add_document(&comments_collection(spot_id), comment.to_data()?)
            .await
            .inspect_err(|e| tracing::error!(%spot_id, error = %e, "Error adding comment"))?;

        tracing::info!(%spot_id, comment_id = %id, "Comment added");
        Ok(Some(id))
    }

    /// Live comments for `spot`, oldest first.
    pub async fn listen_to_comments(&self, spot: &Spot) -> CommentFeed {
        let Some(spot_id) = spot.id.as_deref() else {
            return CommentFeed::once(Vec::new());
        };

        let query =
            Query::all(comments_collection(spot_id)).order_by("createdAt", Direction::Ascending);

        match self.store.subscribe(query).await {
            Ok(subscription) => CommentFeed {
                state: FeedState::Live(subscription),
            },
            Err(e) => {
                tracing::warn!(%spot_id, error = %e, "Error fetching comments");
                CommentFeed::once(Vec::new())
            }
        }
    }
}

enum FeedState {
    Once(Option<Vec<Comment>>),
    Live(Subscription),
}

/// Successive full comment lists for one spot. Dropping it unsubscribes.
pub struct CommentFeed {
    state: FeedState,
}

impl CommentFeed {
    fn once(comments: Vec<Comment>) -> Self {
        Self {
            state: FeedState::Once(Some(comments)),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self.state, FeedState::Live(_))
    }

    pub async fn next(&mut self) -> Option<Vec<Comment>> {
        match &mut self.state {
            FeedState::Once(pending) => pending.take(),
            FeedState::Live(subscription) => {
                let delivery = subscription.next_snapshot().await?;
                Some(match delivery {
                    Ok(docs) => decode_all(docs),
                    Err(e) => {
                        tracing::warn!(error = %e, "Error fetching comments");
                        Vec::new()
                    }
                })
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Vec<Comment>> {
        futures::stream::unfold(self, |mut feed| async move {
            let comments = feed.next().await?;
            Some((comments, feed))
        })
    }

    pub fn close(self) {
        drop(self);
    }
}
