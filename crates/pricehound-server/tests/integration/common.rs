use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use pricehound_core::error::SourceError;
use pricehound_core::testutil::{MockAdapter, MockBackend, record};
use pricehound_core::{EngineConfig, PriceSearchService, SourceAdapter, ThrottleConfig};
use pricehound_server::routes;
use pricehound_server::state::AppState;

pub const TEST_API_KEY: &str = "test-secret-key";

pub struct TestApp {
    pub router: Router,
    pub amazon: MockAdapter,
    pub eprice: MockAdapter,
    pub service: Arc<PriceSearchService>,
}

/// Router over mock sources: amazon at 79.99, eprice at 84.50, unieuro blocked,
/// trovaprezzi at 74.90.
pub fn setup_test_app() -> TestApp {
    let amazon = MockAdapter::new("amazon", vec![record("amazon", 79.99)]);
    let eprice = MockAdapter::new("eprice", vec![record("eprice", 84.50)]);
    let unieuro = MockAdapter::with_error("unieuro", SourceError::Blocked("CAPTCHA".into()));
    let trovaprezzi = MockAdapter::new("trovaprezzi", vec![record("trovaprezzi", 74.90)]);

    let config = EngineConfig {
        throttle: ThrottleConfig::new(Duration::ZERO),
        ..Default::default()
    };
    let adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(amazon.clone()),
        Arc::new(eprice.clone()),
        Arc::new(unieuro),
        Arc::new(trovaprezzi),
    ];
    let service = Arc::new(PriceSearchService::from_config(
        &config,
        Arc::new(MockBackend::new()),
        adapters,
    ));

    let state = Arc::new(AppState {
        service: Arc::clone(&service),
        api_key: TEST_API_KEY.to_string(),
    });

    TestApp {
        router: routes::router(state),
        amazon,
        eprice,
        service,
    }
}
