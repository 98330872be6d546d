use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;

use shop_catalog_server::image_events::EventPayload;
use shop_catalog_server::{
    make_app, run_consumer, CatalogStore, ChannelSubscription, ImageEventConsumer,
    ImageEventTopics, RequestsLoggingLevel, ServerConfig, SqliteCatalogStore,
};

pub const ADMIN_TOKEN: &str = "e2e-admin-token";

/// A catalog server bound to an ephemeral port, backed by a fresh
/// temporary database, with the image event consumer attached.
pub struct TestServer {
    pub base_url: String,
    image_event_tx: mpsc::Sender<(String, EventPayload)>,
    _db_dir: TempDir,
}

impl TestServer {
    pub async fn spawn() -> Self {
        let db_dir = TempDir::new().unwrap();
        let store: Arc<dyn CatalogStore> = Arc::new(
            SqliteCatalogStore::new(db_dir.path().join("catalog.db"), 2).unwrap(),
        );

        let (image_event_tx, subscription) = ChannelSubscription::channel(16);
        let consumer = ImageEventConsumer::new(store.clone());
        tokio::spawn(async move {
            let _ = run_consumer(consumer, ImageEventTopics::default(), subscription).await;
        });

        let config = ServerConfig {
            admin_token: Some(ADMIN_TOKEN.to_string()),
            requests_logging_level: RequestsLoggingLevel::None,
            ..Default::default()
        };
        let app = make_app(config, store).unwrap();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base_url: format!("http://{}", addr),
            image_event_tx,
            _db_dir: db_dir,
        }
    }

    /// Push one raw JSON message onto the given broker topic.
    pub async fn send_image_event(&self, topic: &str, payload: Value) {
        self.image_event_tx
            .send((topic.to_string(), EventPayload::Value(payload)))
            .await
            .unwrap();
    }
}

pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        TestClient {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(ADMIN_TOKEN)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_put(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .put(format!("{}{}", self.base_url, path))
            .bearer_auth(ADMIN_TOKEN)
            .json(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn admin_delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(format!("{}{}", self.base_url, path))
            .bearer_auth(ADMIN_TOKEN)
            .send()
            .await
            .unwrap()
    }
}
