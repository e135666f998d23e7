//! Common test utilities for E2E tests

use scrapevault::data::{ExportFlags, MediaRecord};
use scrapevault::{AppState, config};
use tempfile::TempDir;
use tokio::net::TcpListener;

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub _temp_dir: TempDir,
    pub client: reqwest::Client,
}

impl TestServer {
    /// Create a new test server instance
    pub async fn new() -> Self {
        Self::with_origin(None).await
    }

    /// Create a test server that only admits `origin` cross-origin
    pub async fn with_origin(origin: Option<&str>) -> Self {
        // Create temporary directory for test database
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        // Create test configuration
        let config = config::AppConfig {
            server: config::ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
                allowed_origin: origin.map(str::to_string),
            },
            database: config::DatabaseConfig {
                path: db_path,
                max_connections: 4,
                busy_timeout_ms: 5000,
            },
            thumbnails: config::ThumbnailConfig {
                fetch_timeout_seconds: 2,
                fetch_delay_ms: 0,
                ..config::ThumbnailConfig::default()
            },
            stats: config::StatsConfig {
                chunk_pause_ms: 0,
                chunk_size: 2,
                ..config::StatsConfig::default()
            },
            transfer: config::TransferConfig {
                page_size: 3,
                ..config::TransferConfig::default()
            },
            logging: config::LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
        };

        // Initialize app state
        let state = AppState::new(config).await.unwrap();

        // Create HTTP client
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let addr_str = format!("http://{}", addr);

        let app = scrapevault::build_router(state.clone());

        // Spawn server in background
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr: addr_str,
            state,
            _temp_dir: temp_dir,
            client,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Seed media records directly through the store
    pub async fn seed_media(&self, records: &[MediaRecord]) {
        self.state.db.put_all_media(records).await.unwrap();
    }
}

/// Build a media record for `user`
#[allow(dead_code)]
pub fn media(id: &str, user: &str, platform: &str, scraped_at: i64) -> MediaRecord {
    MediaRecord {
        id: id.to_string(),
        user_id: user.to_string(),
        platform: platform.to_string(),
        original_url: format!("https://www.tiktok.com/@{}/video/{}", user, id),
        thumbnail_url: Some(format!("https://cdn.example.com/{}.jpg", id)),
        scraped_at,
        export_flags: ExportFlags::NONE,
        legacy_exported: None,
        extra: serde_json::Map::new(),
    }
}
