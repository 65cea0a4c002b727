//! Join-token issuance
//!
//! A thin mapping from an authenticated request to a single-use random
//! token; identity itself is verified upstream and arrives as a
//! gateway-injected header.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use vmeet_core::models::{RoomId, UserId};

use crate::http::{AppError, AppResult, AppState};

const USER_ID_HEADER: &str = "x-user-id";

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinTokenData {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinResponse {
    pub success: bool,
    pub data: JoinTokenData,
}

/// POST /api/rooms/{room_id}/join
pub async fn issue_join_token(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<JoinResponse>> {
    let user_id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::bad_request("missing x-user-id header"))?;

    let room_id = RoomId::from(room_id);
    let user_id = UserId::from(user_id);

    if !state.directory.can_join(&room_id, &user_id).await? {
        return Err(AppError::forbidden("user may not join this room"));
    }

    let token = state.tokens.issue(room_id.clone(), user_id.clone());
    info!(%room_id, %user_id, "join token issued");

    Ok(Json(JoinResponse {
        success: true,
        data: JoinTokenData { token },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::test_state;

    fn headers_with_user(user: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, user.parse().expect("header"));
        headers
    }

    #[tokio::test]
    async fn test_issued_token_authenticates_once() {
        let (state, directory) = test_state();
        directory.seed_room(vmeet_core::directory::RoomInfo {
            room_id: RoomId::from("r1"),
            owner_id: UserId::from("owner"),
            expected_users: 2,
        });

        let Json(response) = issue_join_token(
            State(state.clone()),
            Path("r1".to_string()),
            headers_with_user("u1"),
        )
        .await
        .expect("issue");
        assert!(response.success);

        let consumed = state.tokens.consume(&response.data.token).expect("consume");
        assert_eq!(consumed.room_id, RoomId::from("r1"));
        assert_eq!(consumed.user_id, UserId::from("u1"));

        // Single use.
        assert!(state.tokens.consume(&response.data.token).is_err());
    }

    #[tokio::test]
    async fn test_missing_identity_header_rejected() {
        let (state, _) = test_state();
        let err = issue_join_token(State(state), Path("r1".to_string()), HeaderMap::new())
            .await
            .expect_err("missing header");
        assert_eq!(err.code, 10);
    }

    #[tokio::test]
    async fn test_banned_user_rejected() {
        let (state, directory) = test_state();
        directory.seed_room(vmeet_core::directory::RoomInfo {
            room_id: RoomId::from("r1"),
            owner_id: UserId::from("owner"),
            expected_users: 2,
        });
        directory.ban(RoomId::from("r1"), UserId::from("u1"));

        let err = issue_join_token(
            State(state),
            Path("r1".to_string()),
            headers_with_user("u1"),
        )
        .await
        .expect_err("banned");
        assert_eq!(err.code, 7);
    }
}
