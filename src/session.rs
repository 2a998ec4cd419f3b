use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppError, AppResult};

pub const USER_ID: &str = "user_id";

pub async fn current_user(session: &Session) -> AppResult<Uuid> {
    let Some(user_id) = session.get::<String>(USER_ID).await? else {
        return Err(AppError::unauthorized("not logged in"));
    };
    Ok(Uuid::parse_str(&user_id)?)
}
