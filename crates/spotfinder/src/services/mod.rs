pub mod comments;
pub mod profiles;
pub mod spots;

use crate::{
    auth::{AuthUser, Identity},
    db::models::Spot,
    error::{AppError, Result},
    store::CollectionPath,
};

pub const SPOTS_COLLECTION: &str = "skateSpots";
pub const COMMENTS_COLLECTION: &str = "comments";
pub const USERS_COLLECTION: &str = "users";

pub fn spots_collection() -> CollectionPath {
    CollectionPath::root(SPOTS_COLLECTION)
}

pub fn comments_collection(spot_id: &str) -> CollectionPath {
    spots_collection().doc(spot_id).collection(COMMENTS_COLLECTION)
}

pub fn users_collection() -> CollectionPath {
    CollectionPath::root(USERS_COLLECTION)
}

/// Every mutation of a spot goes through here: the caller must be signed in
/// and must be the spot's creator.
pub fn authorize_owner(identity: &dyn Identity, spot: &Spot, action: &str) -> Result<AuthUser> {
    let user = identity.current_user().ok_or(AppError::Unauthenticated)?;

    if !spot.is_owned_by(&user.id) {
        return Err(AppError::PermissionDenied(format!(
            "You can only {action} spots you created"
        )));
    }

    Ok(user)
}
