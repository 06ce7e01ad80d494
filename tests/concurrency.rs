use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use kiln::common::EngineSettings;
use kiln::engine::registry::RuleRegistry;
use kiln::{CookOptions, Cooker, Host, SiteSettings};

/// Counts how many engine calls are inside the host at once.
#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    calls: AtomicUsize,
}

impl Host for Probe {
    fn lookup_upload_urls(&self, identifiers: &[String]) -> HashMap<String, String> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        thread::sleep(Duration::from_millis(2));

        self.active.fetch_sub(1, Ordering::SeqCst);
        identifiers
            .iter()
            .map(|id| (id.clone(), format!("/uploads/{}", id.trim_start_matches("upload://"))))
            .collect()
    }
}

fn cooker(probe: &Arc<Probe>) -> Cooker {
    let host: Arc<dyn Host> = Arc::clone(probe) as Arc<dyn Host>;
    Cooker::new(SiteSettings::default(), EngineSettings::default(), RuleRegistry::new(), host)
}

#[test]
fn engine_calls_never_overlap() {
    let probe = Arc::new(Probe::default());
    let cooker = cooker(&probe);

    thread::scope(|scope| {
        for i in 0..8 {
            let cooker = &cooker;
            scope.spawn(move || {
                for j in 0..5 {
                    let html = cooker
                        .cook(&format!("![x](upload://{i}-{j}.png)"), &CookOptions::default())
                        .unwrap();
                    assert!(html.contains(&format!("src=\"/uploads/{i}-{j}.png\"")));
                }
            });
        }
    });

    assert_eq!(probe.calls.load(Ordering::SeqCst), 40);
    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}

#[test]
fn resets_interleave_with_cooking() {
    let probe = Arc::new(Probe::default());
    let cooker = cooker(&probe);

    thread::scope(|scope| {
        for _ in 0..4 {
            scope.spawn(|| {
                for _ in 0..10 {
                    let html = cooker
                        .cook("![x](upload://a.png)", &CookOptions::default())
                        .unwrap();
                    assert!(html.contains("src=\"/uploads/a.png\""));
                }
            });
        }

        scope.spawn(|| {
            for _ in 0..10 {
                cooker.reset();
                thread::sleep(Duration::from_millis(1));
            }
        });
    });

    assert_eq!(probe.peak.load(Ordering::SeqCst), 1);
}
