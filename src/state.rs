use std::sync::Arc;

use sqlx::SqlitePool;

use super::{
    config::Config,
    database::init_db,
    external::{LogNotifier, NotificationSender, ReceiptStorage, UrlShapeReceipts},
};

pub struct State {
    pub config: Config,
    pub pool: SqlitePool,
    pub notifier: Arc<dyn NotificationSender>,
    pub receipts: Arc<dyn ReceiptStorage>,
}

impl State {
    pub async fn new() -> Arc<Self> {
        let config = Config::load();

        let pool = init_db(&config.database_url).await;

        Arc::new(Self {
            config,
            pool,
            notifier: Arc::new(LogNotifier),
            receipts: Arc::new(UrlShapeReceipts),
        })
    }
}
