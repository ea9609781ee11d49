use std::time::Duration;

use imgloader_service::loader::LoadOptions;
use imgloader_service::{LoadError, ResolvedResource, ResourceKey};
use imgloader_test::PNG;

use crate::{ImageServer, setup_loader};

fn key(server: &ImageServer, path: &str) -> ResourceKey {
    server.url(path).to_string().into()
}

#[tokio::test]
async fn test_load_and_cache() {
    let loader = setup_loader(|_| {});
    let server = ImageServer::new();
    let key = key(&server, "images/hero.png");

    let outcome = loader.load_detailed(key.clone(), LoadOptions::default()).await;
    let image = outcome.resource.as_loaded().unwrap();
    assert_eq!(&image.data[..], PNG);
    assert_eq!(image.content_type.as_deref(), Some("image/png"));

    // the second load is served from the cache
    let again = loader.load(key, LoadOptions::default()).await;
    assert_eq!(again, outcome.resource);
    assert_eq!(server.accesses(), 1);
}

#[tokio::test]
async fn test_concurrent_loads_hit_server_once() {
    let loader = setup_loader(|_| {});
    let server = ImageServer::new();
    let key = key(&server, "delay/100ms/images/gallery.png");

    let loads = (0..4).map(|_| loader.load(key.clone(), LoadOptions::default()));
    let results = futures::future::join_all(loads).await;

    assert!(results.iter().all(ResolvedResource::is_loaded));
    assert_eq!(server.hits("delay/100ms/images/gallery.png"), 1);
    assert_eq!(server.hits("images/gallery.png"), 1);
}

#[tokio::test]
async fn test_not_found_falls_back() {
    let loader = setup_loader(|config| {
        config.fallback_url = Some("/static/fallback.png".into());
    });
    let server = ImageServer::new();
    let key = key(&server, "missing/cover.png");

    let outcome = loader.load_detailed(key.clone(), LoadOptions::default()).await;
    assert_eq!(
        outcome.resource,
        ResolvedResource::Substitute("/static/fallback.png".into())
    );
    assert_eq!(
        outcome.error,
        Some(LoadError::AllAttemptsExhausted {
            attempts: 2,
            last: Box::new(LoadError::NotFound),
        })
    );
    assert!(loader.is_failed(&key));
    assert_eq!(server.accesses(), 2);
}

#[tokio::test]
async fn test_server_errors() {
    let loader = setup_loader(|config| config.retry_attempts = 1);
    let server = ImageServer::new();

    let outcome = loader
        .load_detailed(
            key(&server, "respond_statuscode/500/a.png"),
            LoadOptions::default(),
        )
        .await;
    assert_eq!(
        outcome.error,
        Some(LoadError::AllAttemptsExhausted {
            attempts: 1,
            last: Box::new(LoadError::Download("500 Internal Server Error".into())),
        })
    );

    let outcome = loader
        .load_detailed(
            key(&server, "respond_statuscode/403/a.png"),
            LoadOptions::default(),
        )
        .await;
    assert_eq!(
        outcome.error,
        Some(LoadError::AllAttemptsExhausted {
            attempts: 1,
            last: Box::new(LoadError::PermissionDenied("403 Forbidden".into())),
        })
    );
}

#[tokio::test]
async fn test_flaky_server_recovers_on_retry() {
    let loader = setup_loader(|_| {});
    let server = ImageServer::new();
    let key = key(&server, "flaky/1/images/avatar.png");

    let outcome = loader.load_detailed(key.clone(), LoadOptions::default()).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.attempts, 2);
    assert!(!loader.is_failed(&key));
    assert_eq!(server.hits("flaky/1/images/avatar.png"), 2);
}

#[tokio::test]
async fn test_html_response_is_rejected() {
    let loader = setup_loader(|config| config.retry_attempts = 1);
    let server = ImageServer::new();

    let outcome = loader
        .load_detailed(key(&server, "not_an_image/login"), LoadOptions::default())
        .await;
    assert_eq!(
        outcome.error,
        Some(LoadError::AllAttemptsExhausted {
            attempts: 1,
            last: Box::new(LoadError::Malformed(
                "expected an image, got `text/html`".into()
            )),
        })
    );
    assert!(matches!(outcome.resource, ResolvedResource::Placeholder(_)));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let loader = setup_loader(|config| {
        config.timeout = Duration::from_millis(100);
        config.retry_attempts = 2;
    });
    let server = ImageServer::new();
    let key = key(&server, "delay/1h/images/never.png");

    let outcome = loader.load_detailed(key, LoadOptions::default()).await;
    let Some(LoadError::AllAttemptsExhausted { attempts, last }) = outcome.error else {
        panic!("expected the load to fail");
    };
    assert_eq!(attempts, 2);
    // the client and the loader share the same time budget, either may fire first
    assert!(matches!(*last, LoadError::Timeout(_) | LoadError::Download(_)));
    assert_eq!(server.hits("delay/1h/images/never.png"), 2);
}
