use std::sync::Arc;

use crate::{db::DbPool, mailer::Mailer};

#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub mailer: Arc<dyn Mailer>,
}
