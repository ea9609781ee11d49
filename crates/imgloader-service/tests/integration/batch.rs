use std::sync::Arc;

use imgloader_service::binding::DisplayTarget;
use imgloader_service::loader::{BatchOptions, BatchTargetOptions, TargetConfig};
use imgloader_service::{ResolvedResource, ResourceKey};

use crate::{ImageServer, setup_loader};

#[tokio::test]
async fn test_batch_with_failures() {
    let loader = setup_loader(|config| config.retry_attempts = 1);
    let server = ImageServer::new();

    let keys: Vec<ResourceKey> = [
        "images/1.png",
        "missing/2.png",
        "images/3.png",
        "images/4.png",
        "not_an_image/5",
    ]
    .iter()
    .map(|path| server.url(path).to_string().into())
    .collect();

    let outcome = loader
        .load_all(
            keys.clone(),
            BatchOptions {
                concurrency: Some(2),
                ..Default::default()
            },
        )
        .await;

    assert_eq!(outcome.results.len(), 3);
    let failed: Vec<_> = outcome.errors.iter().map(|e| e.key.clone()).collect();
    assert_eq!(failed, [keys[1].clone(), keys[4].clone()]);
    assert_eq!(server.accesses(), 5);
}

#[derive(Default)]
struct Slot {
    shown: std::sync::Mutex<Option<String>>,
    loaded: std::sync::atomic::AtomicBool,
}

impl DisplayTarget for Slot {
    fn set_loading_state(&self) {}

    fn set_loaded_state(&self) {
        self.loaded.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn set_error_state(&self) {}

    fn assign_resource(&self, resource: &ResolvedResource) {
        *self.shown.lock().unwrap() = Some(resource.url().into_owned());
    }
}

#[tokio::test]
async fn test_gallery_to_targets() {
    let loader = setup_loader(|_| {});
    let server = ImageServer::new();

    let slots: Vec<Arc<Slot>> = (0..4).map(|_| Arc::default()).collect();
    let configs = slots
        .iter()
        .enumerate()
        .map(|(i, slot)| {
            let key = server.url(&format!("images/gallery/{i}.png")).to_string();
            TargetConfig::new(key, slot.clone())
        })
        .collect();

    let outcome = loader
        .load_all_to_targets(configs, BatchTargetOptions::default())
        .await;
    assert_eq!(outcome.results.len(), 4);

    for (i, slot) in slots.iter().enumerate() {
        assert!(slot.loaded.load(std::sync::atomic::Ordering::SeqCst));
        let shown = slot.shown.lock().unwrap().clone().unwrap();
        assert!(shown.ends_with(&format!("/images/gallery/{i}.png")));
    }
    assert_eq!(loader.get_stats().cached, 4);
}
