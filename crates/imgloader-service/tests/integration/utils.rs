use std::sync::Arc;
use std::time::Duration;

use imgloader_service::config::LoaderConfig;
use imgloader_service::fetch::HttpFetcher;
use imgloader_service::loader::ImageLoader;
use imgloader_test as test;

pub use test::ImageServer;

/// Setup tests and create a loader fetching over HTTP.
///
/// The loader is configured with short timeouts and retry delays, so that tests against
/// misbehaving routes finish quickly. The `update_config` closure can modify any default
/// configuration before the loader is created.
pub fn setup_loader(update_config: impl FnOnce(&mut LoaderConfig)) -> ImageLoader {
    test::setup();

    let mut config = LoaderConfig {
        timeout: Duration::from_millis(500),
        retry_delay: Duration::from_millis(20),
        ..Default::default()
    };
    update_config(&mut config);

    let fetcher = HttpFetcher::new(&config).unwrap();
    ImageLoader::new(config, Arc::new(fetcher))
}
